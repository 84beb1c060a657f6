use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::{Camera, Credentials};

// MARK: - KioskConfig

/// Top-level kiosk configuration, loaded from one JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KioskConfig {
    pub cameras: Vec<Camera>,
    pub credentials: Credentials,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    #[serde(default)]
    pub cycle: CycleSettings,
}

impl KioskConfig {
    /// Read and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cameras.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "camera list is empty".into(),
            });
        }
        if self.engine.max_ports == 0 {
            return Err(ConfigError::Invalid {
                reason: "engine.max_ports must be at least 1".into(),
            });
        }
        Ok(())
    }
}

// MARK: - EngineSettings

/// Decode/render engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Size of the decode port pool.
    #[serde(alias = "maxPorts")]
    pub max_ports: u32,
    /// Input buffer hint handed to the engine when a stream is opened.
    #[serde(alias = "streamBufferBytes")]
    pub stream_buffer_bytes: u32,
    /// Thread count hint for the software decoder fallback.
    #[serde(alias = "decodeThreads")]
    pub decode_threads: u32,
    /// Grace interval before a stopped port's hardware resources are
    /// closed and the port returned to the pool. Platform/GPU dependent.
    #[serde(alias = "drainGraceMs")]
    pub drain_grace_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_ports: 16,
            stream_buffer_bytes: 2 * 1024 * 1024,
            decode_threads: 4,
            drain_grace_ms: 1000,
        }
    }
}

// MARK: - CaptureSettings

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Root directory for snapshots; one dated subdirectory per day.
    #[serde(alias = "rootDir")]
    pub root_dir: PathBuf,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("captures"),
        }
    }
}

// MARK: - CycleSettings

/// Unattended kiosk cycle: dwell on each camera, take snapshots, move on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleSettings {
    #[serde(alias = "dwellSecs")]
    pub dwell_secs: u64,
    #[serde(alias = "snapshotsPerStop")]
    pub snapshots_per_stop: u32,
    #[serde(alias = "snapshotIntervalSecs")]
    pub snapshot_interval_secs: u64,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            dwell_secs: 20,
            snapshots_per_stop: 1,
            snapshot_interval_secs: 5,
        }
    }
}

// MARK: - ConfigError

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("configuration invalid: {reason}")]
    Invalid { reason: String },
}

// MARK: - Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "cameras": [
                {"name": "Hole1_White", "host": "172.16.1.228", "port": 1001, "label": "1W"}
            ],
            "credentials": {"username": "admin", "password": "pw"}
        }"#
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: KioskConfig = serde_json::from_str(minimal_json()).expect("valid config");
        assert_eq!(cfg.cameras.len(), 1);
        assert_eq!(cfg.engine.max_ports, 16);
        assert_eq!(cfg.engine.stream_buffer_bytes, 2 * 1024 * 1024);
        assert_eq!(cfg.engine.drain_grace_ms, 1000);
        assert_eq!(cfg.capture.root_dir, PathBuf::from("captures"));
        assert_eq!(cfg.cycle.snapshots_per_stop, 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserializes_camel_case_engine_fields() {
        let json = r#"{
            "cameras": [{"name": "c", "host": "10.0.0.1", "port": 1001}],
            "credentials": {"username": "admin", "password": "pw"},
            "engine": {"maxPorts": 4, "streamBufferBytes": 1048576, "drainGraceMs": 250}
        }"#;
        let cfg: KioskConfig = serde_json::from_str(json).expect("valid camelCase config");
        assert_eq!(cfg.engine.max_ports, 4);
        assert_eq!(cfg.engine.stream_buffer_bytes, 1_048_576);
        assert_eq!(cfg.engine.drain_grace_ms, 250);
        // Unspecified fields keep their defaults.
        assert_eq!(cfg.engine.decode_threads, 4);
    }

    #[test]
    fn empty_camera_list_is_rejected() {
        let json = r#"{
            "cameras": [],
            "credentials": {"username": "admin", "password": "pw"}
        }"#;
        let cfg: KioskConfig = serde_json::from_str(json).expect("parses");
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn channel_defaults_to_zero() {
        let cfg: KioskConfig = serde_json::from_str(minimal_json()).expect("valid config");
        assert_eq!(cfg.cameras[0].channel, 0);
    }
}
