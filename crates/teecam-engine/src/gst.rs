//! GStreamer-backed [`RenderEngine`].
//!
//! One pipeline per decode port:
//!
//! ```text
//! appsrc → h264parse → [decoder] → videoconvert → video/x-raw,format=BGRA
//!        → tee ┬→ queue → appsink            (snapshot branch, keeps last frame)
//!              └→ queue → videoconvert → sink (render branch, added at start_render)
//! ```
//!
//! `open_stream` builds the decode chain and leaves it in `Ready`;
//! `start_render` links the render branch for the given [`RenderTarget`]
//! and sets the pipeline playing. Camera streams carry no usable
//! timestamps, so the appsrc stamps buffers on arrival.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use tracing::{debug, info, warn};

use teecam_core::EngineSettings;

use crate::pool::PortPool;
use crate::runtime::EngineRuntime;
use crate::{EngineError, PortId, RenderEngine, RenderTarget, SnapshotFormat};

/// Decoder candidates in priority order. Kiosk hardware is typically an
/// embedded SoC, so the V4L2 stateful decoder comes first.
static DECODER_PRIORITY: &[(&str, &str)] = &[
    ("v4l2h264dec",  "V4L2 stateful H.264 (embedded SoCs)"),
    ("vaapih264dec", "AMD/Intel VA-API H.264"),
    ("nvh264dec",    "NVIDIA NVDEC H.264"),
    ("avdec_h264",   "software libavcodec (last resort)"),
];

/// Highest-priority H.264 decoder element present on this system.
/// Requires an initialised [`EngineRuntime`].
pub fn probe_best_decoder() -> Option<&'static str> {
    for (element, label) in DECODER_PRIORITY {
        if gst::ElementFactory::find(element).is_some() {
            info!("selected decoder: {} ({})", element, label);
            return Some(element);
        }
        debug!("decoder '{}' not found, trying next", element);
    }
    None
}

// ── Per-port pipeline ──────────────────────────────────────────────────────────

struct PortStream {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    snap_sink: AppSink,
}

struct EngineState {
    pool: PortPool,
    streams: HashMap<PortId, PortStream>,
}

// ── GstEngine ──────────────────────────────────────────────────────────────────

/// GStreamer implementation of [`RenderEngine`].
pub struct GstEngine {
    settings: EngineSettings,
    decoder: &'static str,
    inner: Mutex<EngineState>,
}

impl GstEngine {
    /// Probe the decoder and set up the port pool. The runtime token
    /// proves global initialisation already ran.
    pub fn new(_runtime: EngineRuntime, settings: EngineSettings) -> Result<Self, EngineError> {
        let decoder = probe_best_decoder().ok_or(EngineError::NoDecoder)?;
        let pool = PortPool::new(settings.max_ports);
        Ok(Self {
            settings,
            decoder,
            inner: Mutex::new(EngineState {
                pool,
                streams: HashMap::new(),
            }),
        })
    }

    pub fn decoder_name(&self) -> &str {
        self.decoder
    }

    pub fn is_hardware_accelerated(&self) -> bool {
        self.decoder != "avdec_h264"
    }

    fn build_pipeline(&self, port: PortId, buffer_hint: u32) -> Result<PortStream, EngineError> {
        // The software fallback honours the configured thread count, like
        // the hardware decoders manage their own queues.
        let threads = if self.decoder == "avdec_h264" {
            format!(" max-threads={}", self.settings.decode_threads)
        } else {
            String::new()
        };

        let desc = format!(
            "appsrc name=src is-live=true format=time do-timestamp=true max-bytes={buffer_hint} \
             ! h264parse \
             ! {decoder}{threads} \
             ! videoconvert \
             ! video/x-raw,format=BGRA \
             ! tee name=split \
             split. ! queue leaky=downstream max-size-buffers=1 \
                    ! appsink name=snap sync=false drop=true max-buffers=1",
            decoder = self.decoder,
        );

        let pipeline = gst::parse::launch(&desc)
            .map_err(|e| EngineError::Pipeline {
                reason: e.to_string(),
            })?
            .downcast::<gst::Pipeline>()
            .map_err(|_| EngineError::Pipeline {
                reason: "not a pipeline".into(),
            })?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|e| e.downcast::<AppSrc>().ok())
            .ok_or_else(|| EngineError::Pipeline {
                reason: "no appsrc".into(),
            })?;

        let snap_sink = pipeline
            .by_name("snap")
            .and_then(|e| e.downcast::<AppSink>().ok())
            .ok_or_else(|| EngineError::Pipeline {
                reason: "no snapshot appsink".into(),
            })?;

        // Let h264parse auto-detect whether input is AVCC or AnnexB.
        let src_caps = gst::Caps::builder("video/x-h264")
            .field("alignment", "au")
            .build();
        appsrc.set_caps(Some(&src_caps));

        pipeline
            .set_state(gst::State::Ready)
            .map_err(|_| EngineError::Pipeline {
                reason: "failed to ready pipeline".into(),
            })?;

        debug!("port {} decode stream open ({} bytes input cap)", port, buffer_hint);
        Ok(PortStream {
            pipeline,
            appsrc,
            snap_sink,
        })
    }
}

impl RenderEngine for GstEngine {
    fn allocate_port(&self) -> Option<PortId> {
        let mut inner = self.inner.lock().unwrap();
        let port = inner.pool.allocate();
        match port {
            Some(id) => debug!("allocated decode port {}", id),
            None => warn!("decode port pool exhausted"),
        }
        port
    }

    fn release_port(&self, port: PortId) {
        let mut inner = self.inner.lock().unwrap();
        if inner.streams.contains_key(&port) {
            warn!("port {} released with stream still open", port);
        }
        if inner.pool.release(port) {
            debug!("decode port {} returned to pool", port);
        } else {
            warn!("release of unallocated port {}", port);
        }
    }

    fn open_stream(&self, port: PortId, buffer_hint: u32) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.pool.is_allocated(port) {
            return Err(EngineError::UnknownPort(port));
        }
        if inner.streams.contains_key(&port) {
            return Err(EngineError::StreamAlreadyOpen(port));
        }
        let stream = self.build_pipeline(port, buffer_hint)?;
        inner.streams.insert(port, stream);
        Ok(())
    }

    fn close_stream(&self, port: PortId) {
        let stream = {
            let mut inner = self.inner.lock().unwrap();
            inner.streams.remove(&port)
        };
        if let Some(stream) = stream {
            if stream.pipeline.set_state(gst::State::Null).is_err() {
                warn!("port {} pipeline refused state change to null", port);
            }
            debug!("port {} decode stream closed", port);
        }
    }

    fn start_render(&self, port: PortId, target: &RenderTarget) -> Result<(), EngineError> {
        let inner = self.inner.lock().unwrap();
        let stream = inner
            .streams
            .get(&port)
            .ok_or(EngineError::StreamNotOpen(port))?;

        let branch_desc = format!("queue ! videoconvert ! {}", target.sink_fragment());
        let branch =
            gst::parse::bin_from_description(&branch_desc, true).map_err(|e| {
                EngineError::Pipeline {
                    reason: format!("render branch: {e}"),
                }
            })?;

        stream
            .pipeline
            .add(&branch)
            .map_err(|e| EngineError::Pipeline {
                reason: format!("render branch add: {e}"),
            })?;

        let tee = stream
            .pipeline
            .by_name("split")
            .ok_or_else(|| EngineError::Pipeline {
                reason: "no tee".into(),
            })?;
        tee.link(&branch).map_err(|e| EngineError::Pipeline {
            reason: format!("render branch link: {e}"),
        })?;
        branch
            .sync_state_with_parent()
            .map_err(|e| EngineError::Pipeline {
                reason: format!("render branch sync: {e}"),
            })?;

        stream
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|_| EngineError::Pipeline {
                reason: "failed to start pipeline".into(),
            })?;

        info!("port {} rendering via {}", port, target.sink_fragment());
        Ok(())
    }

    fn stop_render(&self, port: PortId) {
        let inner = self.inner.lock().unwrap();
        if let Some(stream) = inner.streams.get(&port) {
            if stream.pipeline.set_state(gst::State::Paused).is_err() {
                warn!("port {} pipeline refused pause", port);
            }
            debug!("port {} render stopped", port);
        }
    }

    fn flush(&self, port: PortId) -> Result<(), EngineError> {
        let inner = self.inner.lock().unwrap();
        let stream = inner
            .streams
            .get(&port)
            .ok_or(EngineError::StreamNotOpen(port))?;
        let started = stream.appsrc.send_event(gst::event::FlushStart::new());
        let stopped = stream.appsrc.send_event(gst::event::FlushStop::new(true));
        if !(started && stopped) {
            return Err(EngineError::Pipeline {
                reason: "flush events rejected".into(),
            });
        }
        Ok(())
    }

    fn input_frame(&self, port: PortId, data: &[u8]) -> Result<(), EngineError> {
        let appsrc = {
            let inner = self.inner.lock().unwrap();
            inner
                .streams
                .get(&port)
                .ok_or(EngineError::StreamNotOpen(port))?
                .appsrc
                .clone()
        };

        let mut gst_buf =
            gst::Buffer::with_size(data.len()).map_err(|_| EngineError::InputFailed {
                reason: "buffer alloc failed".into(),
            })?;
        {
            let buf_ref = gst_buf.get_mut().ok_or_else(|| EngineError::InputFailed {
                reason: "buffer not writable".into(),
            })?;
            let mut map = buf_ref
                .map_writable()
                .map_err(|_| EngineError::InputFailed {
                    reason: "buffer map failed".into(),
                })?;
            map.copy_from_slice(data);
        }

        appsrc
            .push_buffer(gst_buf)
            .map_err(|flow| EngineError::InputFailed {
                reason: format!("appsrc rejected buffer: {flow:?}"),
            })?;
        Ok(())
    }

    fn snapshot(
        &self,
        port: PortId,
        path: &Path,
        format: SnapshotFormat,
    ) -> Result<(), EngineError> {
        let snap_sink = {
            let inner = self.inner.lock().unwrap();
            inner
                .streams
                .get(&port)
                .ok_or(EngineError::StreamNotOpen(port))?
                .snap_sink
                .clone()
        };

        let sample = snap_sink
            .property::<Option<gst::Sample>>("last-sample")
            .ok_or(EngineError::NoFrameAvailable)?;

        let caps = sample.caps().ok_or_else(|| EngineError::SnapshotFailed {
            reason: "sample without caps".into(),
        })?;
        let s = caps
            .structure(0)
            .ok_or_else(|| EngineError::SnapshotFailed {
                reason: "caps without structure".into(),
            })?;
        let width = s.get::<i32>("width").map_err(|_| EngineError::SnapshotFailed {
            reason: "caps without width".into(),
        })? as u32;
        let height = s
            .get::<i32>("height")
            .map_err(|_| EngineError::SnapshotFailed {
                reason: "caps without height".into(),
            })? as u32;

        let buffer = sample.buffer().ok_or_else(|| EngineError::SnapshotFailed {
            reason: "sample without buffer".into(),
        })?;
        let map = buffer
            .map_readable()
            .map_err(|_| EngineError::SnapshotFailed {
                reason: "buffer map failed".into(),
            })?;

        // Pipeline output is BGRA; the encoders want RGB.
        let bgra = map.as_slice();
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        for px in bgra.chunks_exact(4) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let image_format = match format {
            SnapshotFormat::Jpeg => image::ImageFormat::Jpeg,
            SnapshotFormat::Png => image::ImageFormat::Png,
        };
        image::save_buffer_with_format(path, &rgb, width, height, image::ColorType::Rgb8, image_format)
            .map_err(|e| EngineError::SnapshotFailed {
                reason: e.to_string(),
            })?;

        info!("port {} snapshot written: {}", port, path.display());
        Ok(())
    }

    fn buffered_bytes_remaining(&self, port: PortId) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner
            .streams
            .get(&port)
            .map(|s| s.appsrc.current_level_bytes())
            .unwrap_or(0)
    }
}
