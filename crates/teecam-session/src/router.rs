//! Frame routing from the control service into the decode engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::warn;

use teecam_control::{FramePacket, FrameSink, PayloadKind};
use teecam_engine::{PortId, RenderEngine};

/// Forwards raw A/V packets to one decode port.
///
/// The port id is fixed when the router is built, at subscription time,
/// and is never re-read from session state. A concurrent disconnect can
/// therefore clear the session's port without racing the delivery path:
/// frames delivered before the unsubscribe still go to the (still-valid,
/// still-allocated) old port, and after the unsubscribe the router is
/// gone.
pub struct PortFrameRouter {
    engine: Arc<dyn RenderEngine>,
    port: PortId,
    input_errors: AtomicU64,
}

impl PortFrameRouter {
    pub fn new(engine: Arc<dyn RenderEngine>, port: PortId) -> Self {
        Self {
            engine,
            port,
            input_errors: AtomicU64::new(0),
        }
    }

    pub fn port(&self) -> PortId {
        self.port
    }
}

impl FrameSink for PortFrameRouter {
    fn on_frame(&self, frame: &FramePacket) {
        // Only the raw mixed A/V payload is decodable here; demuxed
        // elementary kinds are not part of the kiosk pipeline.
        if frame.kind != PayloadKind::RawAvMix {
            return;
        }
        if let Err(e) = self.engine.input_frame(self.port, &frame.data) {
            let n = self.input_errors.fetch_add(1, Ordering::Relaxed) + 1;
            if n <= 10 || n % 100 == 0 {
                warn!("port {} frame input error #{}: {}", self.port, n, e);
            }
        }
    }
}
