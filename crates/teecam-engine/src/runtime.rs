//! One-time global engine initialisation.
//!
//! GStreamer must be initialised exactly once, before any pipeline is
//! built. The token is acquired once at process start and handed to
//! [`crate::GstEngine::new`] as a dependency, so an engine cannot be
//! constructed against an uninitialised runtime.

use std::sync::OnceLock;

use gstreamer as gst;
use tracing::info;

use crate::EngineError;

static INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Proof that global engine initialisation has run.
#[derive(Debug, Clone, Copy)]
pub struct EngineRuntime(());

impl EngineRuntime {
    /// Initialise GStreamer on first call; later calls return the same
    /// token (or the same failure).
    pub fn acquire() -> Result<Self, EngineError> {
        let result = INIT.get_or_init(|| match gst::init() {
            Ok(()) => {
                info!("engine runtime ready: {}", gst::version_string());
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        });

        match result {
            Ok(()) => Ok(Self(())),
            Err(reason) => Err(EngineError::InitFailed {
                reason: reason.clone(),
            }),
        }
    }
}
