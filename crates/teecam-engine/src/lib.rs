//! teecam-engine — the decode/render engine boundary.
//!
//! The session manager consumes the engine only through [`RenderEngine`]:
//! a finite pool of decode ports, a decode stream + render surface per
//! port, frame input, and still-image capture. The GStreamer-backed
//! implementation lives in [`gst`] (feature `gst`, on by default).

use std::path::Path;

use thiserror::Error;

pub mod pool;

#[cfg(feature = "gst")]
pub mod gst;
#[cfg(feature = "gst")]
pub mod runtime;

#[cfg(feature = "gst")]
pub use gst::GstEngine;
#[cfg(feature = "gst")]
pub use runtime::EngineRuntime;

/// Identifier for one unit of decode/render capacity.
pub type PortId = u32;

// MARK: - RenderEngine trait

/// Decode/render engine consumed by the session manager.
///
/// Port lifecycle: `allocate_port` → `open_stream` → `start_render` →
/// (`input_frame`* / `snapshot`*) → `stop_render` → `close_stream` →
/// `release_port`. An id stays allocated from `allocate_port` until
/// `release_port`, so an id whose hardware is still draining is never
/// handed out twice.
///
/// All methods are synchronous library calls; release-direction methods
/// are best-effort and log rather than fail.
pub trait RenderEngine: Send + Sync {
    /// Claim a fresh port from the pool, or `None` when exhausted.
    fn allocate_port(&self) -> Option<PortId>;

    /// Return a port to the pool.
    fn release_port(&self, port: PortId);

    /// Open the decode stream for a port. `buffer_hint` caps the input
    /// queue in bytes.
    fn open_stream(&self, port: PortId, buffer_hint: u32) -> Result<(), EngineError>;

    /// Tear down the decode stream. No-op on a port with no open stream.
    fn close_stream(&self, port: PortId);

    /// Attach a render target and start decoding/rendering.
    fn start_render(&self, port: PortId, target: &RenderTarget) -> Result<(), EngineError>;

    /// Stop rendering; the stream stays open.
    fn stop_render(&self, port: PortId);

    /// Discard buffered input not yet decoded.
    fn flush(&self, port: PortId) -> Result<(), EngineError>;

    /// Feed one raw frame buffer into the decode stream.
    fn input_frame(&self, port: PortId, data: &[u8]) -> Result<(), EngineError>;

    /// Write the most recently decoded frame to `path`.
    fn snapshot(&self, port: PortId, path: &Path, format: SnapshotFormat)
        -> Result<(), EngineError>;

    /// Bytes of input buffered but not yet consumed by the decoder.
    /// Diagnostic only.
    fn buffered_bytes_remaining(&self, port: PortId) -> u64;
}

// MARK: - RenderTarget

/// Where a port's decoded video goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderTarget {
    /// On-screen window via the platform's auto-selected video sink.
    Screen,
    /// Explicit sink element description, e.g. `"kmssink"` or
    /// `"waylandsink fullscreen=true"`.
    Sink(String),
    /// No visible output. CI and soak tests.
    Headless,
}

impl RenderTarget {
    /// GStreamer launch fragment for the render branch tail.
    pub fn sink_fragment(&self) -> String {
        match self {
            Self::Screen => "autovideosink sync=false".into(),
            Self::Sink(desc) => desc.clone(),
            Self::Headless => "fakesink sync=false".into(),
        }
    }
}

// MARK: - SnapshotFormat

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Jpeg,
    Png,
}

// MARK: - EngineError

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine initialisation failed: {reason}")]
    InitFailed { reason: String },

    #[error("no usable H.264 decoder element found")]
    NoDecoder,

    #[error("port {0} is not allocated")]
    UnknownPort(PortId),

    #[error("port {0} already has an open stream")]
    StreamAlreadyOpen(PortId),

    #[error("port {0} has no open stream")]
    StreamNotOpen(PortId),

    #[error("pipeline error: {reason}")]
    Pipeline { reason: String },

    #[error("frame input rejected: {reason}")]
    InputFailed { reason: String },

    #[error("no decoded frame available yet")]
    NoFrameAvailable,

    #[error("snapshot failed: {reason}")]
    SnapshotFailed { reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
