pub mod camera;
pub mod config;

pub use camera::{Camera, Credentials};
pub use config::{CaptureSettings, ConfigError, CycleSettings, EngineSettings, KioskConfig};
