//! teecam-control — the remote camera control-service boundary.
//!
//! The session manager talks to the camera's control service only through
//! [`ControlService`]: login/logout, real-time stream subscription, and
//! frame-sink registration. Frame delivery runs on the service's own task,
//! concurrently with control operations; sinks therefore never share
//! mutable state with the session (see `teecam-session`).
//!
//! [`sim::SimulatedControlService`] stands in for the vendor device
//! service during development and CI.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use teecam_core::Credentials;

pub mod sim;

pub use sim::SimulatedControlService;

// MARK: - Handles

/// Opaque handle for an authenticated control-service session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlHandle(pub u64);

/// Opaque handle for an active real-time stream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

/// Proof of a registered frame sink. Not `Clone`: unregistering consumes
/// the token, so a sink cannot be detached twice or from the wrong place.
#[derive(Debug, PartialEq, Eq)]
pub struct SinkToken(pub u64);

// MARK: - Login / subscription options

/// Transport capability requested at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityCapability {
    #[default]
    Tcp,
    Udp,
    Tls,
}

/// Which encoded stream to subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamProfile {
    /// Full-resolution main stream.
    #[default]
    Main,
    /// Low-bitrate sub stream.
    Sub,
}

// MARK: - Frame delivery

/// Classification of a delivered frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Raw mixed audio/video payload, the only kind the kiosk decodes.
    RawAvMix,
    /// Demuxed elementary video.
    Video,
    /// Demuxed elementary audio.
    Audio,
    /// Vendor-specific classification.
    Other(u32),
}

/// One frame buffer as delivered by the control service.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub kind: PayloadKind,
    pub data: Bytes,
}

/// Receives frames on the control service's delivery context.
///
/// Implementations must be cheap and non-blocking; they run on the
/// delivery task for every frame of the subscription.
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: &FramePacket);
}

// MARK: - ControlService trait

/// Remote camera control service: authentication and real-time stream
/// subscription. Thread-safe; logout-direction operations are best-effort
/// and never fail.
#[async_trait]
pub trait ControlService: Send + Sync {
    /// Authenticate against the device at `host:port`. The returned handle
    /// stays valid until [`ControlService::logout`].
    async fn login(
        &self,
        host: &str,
        port: u16,
        credentials: &Credentials,
        capability: SecurityCapability,
    ) -> Result<ControlHandle, ControlError>;

    async fn logout(&self, handle: ControlHandle);

    /// Open a real-time subscription for one channel of a logged-in device.
    async fn subscribe(
        &self,
        handle: ControlHandle,
        channel: u32,
        profile: StreamProfile,
    ) -> Result<StreamHandle, ControlError>;

    async fn unsubscribe(&self, stream: StreamHandle);

    /// Attach a frame sink to a subscription. Frames flow until the token
    /// is unregistered or the subscription ends.
    async fn register_frame_sink(&self, stream: StreamHandle, sink: Arc<dyn FrameSink>)
        -> SinkToken;

    /// Detach a previously registered sink.
    async fn unregister_frame_sink(&self, token: SinkToken);

    /// Vendor diagnostic code of the most recent failure. Logging only.
    fn last_error(&self) -> i32;
}

// MARK: - ControlError

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("login rejected (code {code})")]
    LoginRejected { code: i32 },

    #[error("subscription rejected (code {code})")]
    SubscribeRejected { code: i32 },

    #[error("unknown control handle")]
    UnknownHandle,

    #[error("connection failed: {reason}")]
    ConnectionFailed { reason: String },
}
