use serde::{Deserialize, Serialize};

// MARK: - Camera

/// Static identity of one network camera, loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    /// Display name, e.g. "Hole1_White".
    pub name: String,
    /// Network address of the camera's control service.
    pub host: String,
    /// Service port.
    pub port: u16,
    /// Channel number on the device (multi-channel encoders; default 0).
    #[serde(default)]
    pub channel: u32,
    /// Short label used in snapshot file names, e.g. "1W".
    /// Falls back to a sanitised `name` when absent.
    #[serde(default)]
    pub label: Option<String>,
}

impl Camera {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            channel: 0,
            label: None,
        }
    }

    pub fn with_channel(mut self, channel: u32) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label used in snapshot file names.
    pub fn short_label(&self) -> String {
        match &self.label {
            Some(label) if !label.is_empty() => label.clone(),
            _ => self
                .name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
                .collect(),
        }
    }
}

impl std::fmt::Display for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}:{}, ch:{})", self.name, self.host, self.port, self.channel)
    }
}

// MARK: - Credentials

/// Shared credential pair used for every camera login.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// Keep the password out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

// MARK: - Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_label_prefers_explicit_label() {
        let cam = Camera::new("Hole1_White", "172.16.1.228", 1001).with_label("1W");
        assert_eq!(cam.short_label(), "1W");
    }

    #[test]
    fn short_label_sanitises_name() {
        let cam = Camera::new("Hole1 White#2", "172.16.1.228", 1001);
        assert_eq!(cam.short_label(), "Hole1-White-2");
    }

    #[test]
    fn debug_hides_password() {
        let creds = Credentials::new("admin", "secret");
        let out = format!("{:?}", creds);
        assert!(!out.contains("secret"));
        assert!(out.contains("admin"));
    }
}
