//! teecam-session — the camera stream session manager.
//!
//! Owns at most one live audio/video session at a time: one authenticated
//! control-service login, one real-time stream subscription, and one
//! decode/render port, bound to one camera. Connecting walks a strict
//! forward chain across the two external services and unwinds exactly the
//! resources already acquired when any step fails; disconnecting releases
//! in strict reverse order, with the hardware-backed port handed to a
//! detached drain task so a fresh connect never waits on (or observes)
//! the old port.

use thiserror::Error;

use teecam_engine::EngineError;

pub mod manager;
pub mod router;

pub use manager::SessionManager;
pub use router::PortFrameRouter;

// MARK: - SessionError

/// Why a session operation failed. Every connect-time failure has already
/// rolled back whatever the earlier steps acquired by the time the caller
/// sees it; all outcomes are retryable.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera login rejected (code {code})")]
    AuthFailure { code: i32 },

    #[error("no free decode port")]
    ResourceExhausted,

    #[error("decoder failed to start: {0}")]
    DeviceStartFailure(EngineError),

    #[error("stream subscription rejected (code {code})")]
    SubscriptionFailure { code: i32 },

    #[error("no active camera session")]
    NotConnected,

    #[error("snapshot failed: {0}")]
    CaptureFailed(EngineError),
}
