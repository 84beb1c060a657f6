//! [`SessionManager`] — owns the single live camera session.
//!
//! Control operations (`connect` / `disconnect` / `capture`) take
//! `&mut self`: one in-flight control operation at a time is a
//! compile-time property, and the kiosk additionally funnels them
//! through one worker task. Frame delivery runs concurrently on the
//! control service's own context and touches nothing but the port id
//! captured at wiring time (see [`crate::PortFrameRouter`]).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use teecam_control::{ControlHandle, ControlService, SecurityCapability, SinkToken, StreamHandle,
    StreamProfile};
use teecam_core::{Camera, Credentials, EngineSettings};
use teecam_engine::{PortId, RenderEngine, RenderTarget, SnapshotFormat};

use crate::router::PortFrameRouter;
use crate::SessionError;

// MARK: - Session

/// The live binding of one camera to one decode port.
///
/// Populated field-by-field in acquisition order during connect, emptied
/// in strict reverse order during disconnect. `stream` present implies
/// `control` present; `port` present implies the decode pipeline is
/// started and the underlying port is allocated.
#[derive(Default)]
struct Session {
    control: Option<ControlHandle>,
    stream: Option<StreamHandle>,
    sink: Option<SinkToken>,
    port: Option<PortId>,
    camera: Option<Camera>,
}

impl Session {
    fn is_empty(&self) -> bool {
        self.control.is_none()
            && self.stream.is_none()
            && self.sink.is_none()
            && self.port.is_none()
            && self.camera.is_none()
    }
}

// MARK: - SessionManager

pub struct SessionManager {
    control: Arc<dyn ControlService>,
    engine: Arc<dyn RenderEngine>,
    credentials: Credentials,
    capability: SecurityCapability,
    stream_buffer_bytes: u32,
    drain_grace: Duration,
    session: Session,
    /// Detached drain tasks for ports released by past disconnects.
    /// Never awaited on the connect path; see [`Self::await_drains`].
    drains: Vec<JoinHandle<()>>,
}

impl SessionManager {
    pub fn new(
        control: Arc<dyn ControlService>,
        engine: Arc<dyn RenderEngine>,
        credentials: Credentials,
        settings: &EngineSettings,
    ) -> Self {
        Self {
            control,
            engine,
            credentials,
            capability: SecurityCapability::Tcp,
            stream_buffer_bytes: settings.stream_buffer_bytes,
            drain_grace: Duration::from_millis(settings.drain_grace_ms),
            session: Session::default(),
            drains: Vec::new(),
        }
    }

    pub fn with_capability(mut self, capability: SecurityCapability) -> Self {
        self.capability = capability;
        self
    }

    // MARK: - Connect

    /// Tear down any existing session, then bind `camera` to a fresh
    /// decode port rendering into `target`.
    ///
    /// Strict forward chain: login → port → decoder → subscription →
    /// delivery wiring. Whichever step fails, everything acquired before
    /// it is released again (in reverse order) and the session is left
    /// empty, so the caller can immediately retry.
    pub async fn connect(
        &mut self,
        camera: Camera,
        target: &RenderTarget,
    ) -> Result<(), SessionError> {
        self.disconnect().await;

        info!("connecting to {}", camera);

        let control = match self
            .control
            .login(&camera.host, camera.port, &self.credentials, self.capability)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                let code = self.control.last_error();
                error!("login to {}:{} failed: {}", camera.host, camera.port, e);
                return Err(SessionError::AuthFailure { code });
            }
        };

        // A fresh port every time. Ports from prior sessions stay
        // allocated until their drain task finishes, so the pool cannot
        // hand one of them back here.
        let Some(port) = self.engine.allocate_port() else {
            warn!("decode port pool exhausted");
            self.control.logout(control).await;
            return Err(SessionError::ResourceExhausted);
        };

        if let Err(e) = self.engine.open_stream(port, self.stream_buffer_bytes) {
            error!("decode stream open failed on port {}: {}", port, e);
            self.engine.release_port(port);
            self.control.logout(control).await;
            return Err(SessionError::DeviceStartFailure(e));
        }

        if let Err(e) = self.engine.start_render(port, target) {
            error!("render start failed on port {}: {}", port, e);
            self.rollback_port(port);
            self.control.logout(control).await;
            return Err(SessionError::DeviceStartFailure(e));
        }

        let stream = match self
            .control
            .subscribe(control, camera.channel, StreamProfile::Main)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                let code = self.control.last_error();
                error!("subscription failed for {} ch {}: {}", camera.name, camera.channel, e);
                self.rollback_port(port);
                self.control.logout(control).await;
                return Err(SessionError::SubscriptionFailure { code });
            }
        };

        // Frame delivery is addressed by the port id fixed here, never by
        // the session's live field, so a later disconnect cannot race it.
        let router = Arc::new(PortFrameRouter::new(Arc::clone(&self.engine), port));
        let sink = self.control.register_frame_sink(stream, router).await;

        self.session = Session {
            control: Some(control),
            stream: Some(stream),
            sink: Some(sink),
            port: Some(port),
            camera: Some(camera),
        };
        info!("connected on decode port {}", port);
        Ok(())
    }

    /// Synchronous port teardown while a failed connect unwinds. No frame
    /// has been fed to this pipeline yet, so there is no in-flight
    /// hardware work to drain and the port can return to the pool
    /// immediately.
    fn rollback_port(&self, port: PortId) {
        self.engine.stop_render(port);
        self.engine.close_stream(port);
        self.engine.release_port(port);
    }

    // MARK: - Disconnect

    /// Release the current session. Idempotent; every step is
    /// best-effort, so one failed release never strands the later ones.
    /// Returns as soon as the port drain is detached.
    pub async fn disconnect(&mut self) {
        if self.session.is_empty() {
            return;
        }
        if let Some(camera) = &self.session.camera {
            info!("disconnecting from {}", camera.name);
        }

        // Stop frame delivery first.
        if let Some(token) = self.session.sink.take() {
            self.control.unregister_frame_sink(token).await;
        }
        if let Some(stream) = self.session.stream.take() {
            self.control.unsubscribe(stream).await;
        }

        // Clearing the port field here, before the hardware teardown, is
        // the synchronisation point: from this moment neither capture nor
        // a later connect can address the old port.
        if let Some(port) = self.session.port.take() {
            self.engine.stop_render(port);
            if let Err(e) = self.engine.flush(port) {
                warn!("flush failed on port {}: {}", port, e);
            }
            self.spawn_drain(port);
        }

        if let Some(control) = self.session.control.take() {
            self.control.logout(control).await;
        }

        self.session.camera = None;
    }

    /// Detached teardown of a stopped port. The render pipeline is
    /// asynchronous hardware; the grace interval lets in-flight
    /// submissions settle before the stream is closed. The port stays
    /// allocated for the whole wait.
    fn spawn_drain(&mut self, port: PortId) {
        let engine = Arc::clone(&self.engine);
        let grace = self.drain_grace;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let remaining = engine.buffered_bytes_remaining(port);
            if remaining > 0 {
                debug!("port {} closing with {} buffered input bytes", port, remaining);
            }
            engine.close_stream(port);
            engine.release_port(port);
            info!("port {} drain complete", port);
        });
        self.drains.retain(|h| !h.is_finished());
        self.drains.push(handle);
    }

    // MARK: - Capture

    /// Write the most recent decoded frame of the live session to `path`
    /// as JPEG. No state is touched.
    pub fn capture(&self, path: &Path) -> Result<(), SessionError> {
        if self.session.control.is_none() || self.session.stream.is_none() {
            return Err(SessionError::NotConnected);
        }
        let Some(port) = self.session.port else {
            return Err(SessionError::NotConnected);
        };
        self.engine
            .snapshot(port, path, SnapshotFormat::Jpeg)
            .map_err(SessionError::CaptureFailed)
    }

    // MARK: - State

    pub fn is_connected(&self) -> bool {
        self.session.control.is_some() && self.session.stream.is_some()
    }

    pub fn current_camera(&self) -> Option<&Camera> {
        self.session.camera.as_ref()
    }

    /// Drain tasks not yet finished.
    pub fn pending_drains(&self) -> usize {
        self.drains.iter().filter(|h| !h.is_finished()).count()
    }

    /// Wait for every detached port drain to complete. Process shutdown
    /// and tests; the connect path never calls this.
    pub async fn await_drains(&mut self) {
        for handle in self.drains.drain(..) {
            let _ = handle.await;
        }
    }

    /// Full teardown: disconnect, then wait for outstanding drains.
    pub async fn shutdown(&mut self) {
        self.disconnect().await;
        self.await_drains().await;
    }
}

// MARK: - Tests

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use teecam_control::{ControlError, FramePacket, FrameSink, PayloadKind};
    use teecam_engine::pool::PortPool;
    use teecam_engine::EngineError;

    // ── Mock control service ──────────────────────────────────────────

    #[derive(Default)]
    struct ControlLog {
        logins: u32,
        logouts: u32,
        subscribes: u32,
        unsubscribes: u32,
        active_stream: Option<u64>,
        sink: Option<(u64, Arc<dyn FrameSink>)>,
    }

    struct MockControl {
        fail_login: AtomicBool,
        fail_subscribe: AtomicBool,
        next: AtomicU64,
        last_error: AtomicI32,
        log: Mutex<ControlLog>,
    }

    impl MockControl {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fail_login: AtomicBool::new(false),
                fail_subscribe: AtomicBool::new(false),
                next: AtomicU64::new(1),
                last_error: AtomicI32::new(0),
                log: Mutex::new(ControlLog::default()),
            })
        }

        /// Push one frame at the registered sink, the way the real
        /// service does from its delivery context.
        fn deliver(&self, packet: &FramePacket) {
            let sink = {
                let log = self.log.lock().unwrap();
                match (&log.active_stream, &log.sink) {
                    (Some(_), Some((_, sink))) => Some(Arc::clone(sink)),
                    _ => None,
                }
            };
            if let Some(sink) = sink {
                sink.on_frame(packet);
            }
        }

        fn counts(&self) -> (u32, u32, u32, u32) {
            let log = self.log.lock().unwrap();
            (log.logins, log.logouts, log.subscribes, log.unsubscribes)
        }
    }

    #[async_trait]
    impl ControlService for MockControl {
        async fn login(
            &self,
            _host: &str,
            _port: u16,
            _credentials: &Credentials,
            _capability: SecurityCapability,
        ) -> Result<ControlHandle, ControlError> {
            if self.fail_login.load(Ordering::Relaxed) {
                self.last_error.store(100, Ordering::Relaxed);
                return Err(ControlError::LoginRejected { code: 100 });
            }
            self.log.lock().unwrap().logins += 1;
            Ok(ControlHandle(self.next.fetch_add(1, Ordering::Relaxed)))
        }

        async fn logout(&self, _handle: ControlHandle) {
            self.log.lock().unwrap().logouts += 1;
        }

        async fn subscribe(
            &self,
            _handle: ControlHandle,
            _channel: u32,
            _profile: StreamProfile,
        ) -> Result<StreamHandle, ControlError> {
            if self.fail_subscribe.load(Ordering::Relaxed) {
                self.last_error.store(120, Ordering::Relaxed);
                return Err(ControlError::SubscribeRejected { code: 120 });
            }
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            let mut log = self.log.lock().unwrap();
            log.subscribes += 1;
            log.active_stream = Some(id);
            Ok(StreamHandle(id))
        }

        async fn unsubscribe(&self, stream: StreamHandle) {
            let mut log = self.log.lock().unwrap();
            log.unsubscribes += 1;
            if log.active_stream == Some(stream.0) {
                log.active_stream = None;
            }
        }

        async fn register_frame_sink(
            &self,
            _stream: StreamHandle,
            sink: Arc<dyn FrameSink>,
        ) -> SinkToken {
            let id = self.next.fetch_add(1, Ordering::Relaxed);
            self.log.lock().unwrap().sink = Some((id, sink));
            SinkToken(id)
        }

        async fn unregister_frame_sink(&self, token: SinkToken) {
            let mut log = self.log.lock().unwrap();
            if matches!(&log.sink, Some((id, _)) if *id == token.0) {
                log.sink = None;
            }
        }

        fn last_error(&self) -> i32 {
            self.last_error.load(Ordering::Relaxed)
        }
    }

    // ── Mock render engine ────────────────────────────────────────────

    #[derive(Default)]
    struct EngineLog {
        open: BTreeSet<PortId>,
        rendering: BTreeSet<PortId>,
        inputs: Vec<(PortId, usize)>,
        snapshots: Vec<(PortId, PathBuf)>,
        flushes: Vec<PortId>,
        closed: Vec<PortId>,
        released: Vec<PortId>,
    }

    struct MockEngine {
        pool: Mutex<PortPool>,
        fail_open: AtomicBool,
        fail_render: AtomicBool,
        fail_snapshot: AtomicBool,
        log: Mutex<EngineLog>,
    }

    impl MockEngine {
        fn new(capacity: u32) -> Arc<Self> {
            Arc::new(Self {
                pool: Mutex::new(PortPool::new(capacity)),
                fail_open: AtomicBool::new(false),
                fail_render: AtomicBool::new(false),
                fail_snapshot: AtomicBool::new(false),
                log: Mutex::new(EngineLog::default()),
            })
        }

        fn allocated_count(&self) -> usize {
            self.pool.lock().unwrap().allocated_count()
        }

        fn released(&self) -> Vec<PortId> {
            self.log.lock().unwrap().released.clone()
        }

        fn inputs(&self) -> Vec<(PortId, usize)> {
            self.log.lock().unwrap().inputs.clone()
        }

        fn is_open(&self, port: PortId) -> bool {
            self.log.lock().unwrap().open.contains(&port)
        }
    }

    impl RenderEngine for MockEngine {
        fn allocate_port(&self) -> Option<PortId> {
            self.pool.lock().unwrap().allocate()
        }

        fn release_port(&self, port: PortId) {
            self.pool.lock().unwrap().release(port);
            self.log.lock().unwrap().released.push(port);
        }

        fn open_stream(&self, port: PortId, _buffer_hint: u32) -> Result<(), EngineError> {
            if self.fail_open.load(Ordering::Relaxed) {
                return Err(EngineError::Pipeline {
                    reason: "open refused".into(),
                });
            }
            self.log.lock().unwrap().open.insert(port);
            Ok(())
        }

        fn close_stream(&self, port: PortId) {
            let mut log = self.log.lock().unwrap();
            log.open.remove(&port);
            log.closed.push(port);
        }

        fn start_render(&self, port: PortId, _target: &RenderTarget) -> Result<(), EngineError> {
            if self.fail_render.load(Ordering::Relaxed) {
                return Err(EngineError::Pipeline {
                    reason: "render refused".into(),
                });
            }
            self.log.lock().unwrap().rendering.insert(port);
            Ok(())
        }

        fn stop_render(&self, port: PortId) {
            self.log.lock().unwrap().rendering.remove(&port);
        }

        fn flush(&self, port: PortId) -> Result<(), EngineError> {
            self.log.lock().unwrap().flushes.push(port);
            Ok(())
        }

        fn input_frame(&self, port: PortId, data: &[u8]) -> Result<(), EngineError> {
            let mut log = self.log.lock().unwrap();
            if !log.open.contains(&port) {
                return Err(EngineError::StreamNotOpen(port));
            }
            log.inputs.push((port, data.len()));
            Ok(())
        }

        fn snapshot(
            &self,
            port: PortId,
            path: &Path,
            _format: SnapshotFormat,
        ) -> Result<(), EngineError> {
            if self.fail_snapshot.load(Ordering::Relaxed) {
                return Err(EngineError::SnapshotFailed {
                    reason: "no frame".into(),
                });
            }
            self.log.lock().unwrap().snapshots.push((port, path.to_path_buf()));
            Ok(())
        }

        fn buffered_bytes_remaining(&self, _port: PortId) -> u64 {
            0
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────

    fn camera_a() -> Camera {
        Camera::new("Hole1_White", "172.16.1.228", 1001).with_label("1W")
    }

    fn camera_b() -> Camera {
        Camera::new("Hole1_Lady", "172.16.1.236", 1003).with_label("1L")
    }

    fn manager(control: Arc<MockControl>, engine: Arc<MockEngine>) -> SessionManager {
        let settings = EngineSettings::default();
        SessionManager::new(control, engine, Credentials::new("admin", "pw"), &settings)
    }

    fn raw_packet() -> FramePacket {
        FramePacket {
            kind: PayloadKind::RawAvMix,
            data: Bytes::from_static(&[0, 0, 0, 1, 9, 9, 9, 9]),
        }
    }

    const GRACE: Duration = Duration::from_millis(1000);

    // ── Connect / rollback ────────────────────────────────────────────

    #[tokio::test]
    async fn connect_binds_camera_to_fresh_port() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        let mut mgr = manager(control.clone(), engine.clone());

        mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap();

        assert!(mgr.is_connected());
        assert_eq!(mgr.current_camera().map(|c| c.name.as_str()), Some("Hole1_White"));
        assert!(engine.is_open(0));
        assert_eq!(engine.allocated_count(), 1);
        assert_eq!(control.counts(), (1, 0, 1, 0));
    }

    #[tokio::test]
    async fn failed_login_leaves_session_empty() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        control.fail_login.store(true, Ordering::Relaxed);
        let mut mgr = manager(control.clone(), engine.clone());

        let err = mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap_err();

        assert!(matches!(err, SessionError::AuthFailure { code: 100 }));
        assert!(!mgr.is_connected());
        assert!(mgr.current_camera().is_none());
        assert_eq!(engine.allocated_count(), 0);
        // Nothing was acquired, so nothing to roll back.
        assert_eq!(control.counts(), (0, 0, 0, 0));
    }

    #[tokio::test]
    async fn port_exhaustion_rolls_back_the_login() {
        let control = MockControl::new();
        let engine = MockEngine::new(0);
        let mut mgr = manager(control.clone(), engine.clone());

        let err = mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap_err();

        assert!(matches!(err, SessionError::ResourceExhausted));
        assert!(!mgr.is_connected());
        assert_eq!(control.counts(), (1, 1, 0, 0));
    }

    #[tokio::test]
    async fn failed_stream_open_releases_port_and_logs_out() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        engine.fail_open.store(true, Ordering::Relaxed);
        let mut mgr = manager(control.clone(), engine.clone());

        let err = mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap_err();

        assert!(matches!(err, SessionError::DeviceStartFailure(_)));
        assert_eq!(engine.allocated_count(), 0);
        assert_eq!(engine.released(), vec![0]);
        assert_eq!(control.counts(), (1, 1, 0, 0));
    }

    #[tokio::test]
    async fn failed_render_start_unwinds_the_open_stream() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        engine.fail_render.store(true, Ordering::Relaxed);
        let mut mgr = manager(control.clone(), engine.clone());

        let err = mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap_err();

        assert!(matches!(err, SessionError::DeviceStartFailure(_)));
        assert!(!engine.is_open(0));
        assert_eq!(engine.allocated_count(), 0);
        assert_eq!(control.counts(), (1, 1, 0, 0));
    }

    #[tokio::test]
    async fn failed_subscription_returns_the_port_immediately() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        control.fail_subscribe.store(true, Ordering::Relaxed);
        let mut mgr = manager(control.clone(), engine.clone());

        let err = mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap_err();

        assert!(matches!(err, SessionError::SubscriptionFailure { code: 120 }));
        assert!(!mgr.is_connected());
        assert!(mgr.current_camera().is_none());
        // No frame was ever submitted, so no drain was started: the same
        // port is immediately available to the retry.
        assert_eq!(engine.allocated_count(), 0);
        assert_eq!(mgr.pending_drains(), 0);

        control.fail_subscribe.store(false, Ordering::Relaxed);
        mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap();
        assert!(engine.is_open(0), "retry should re-acquire port 0");
    }

    // ── Disconnect ────────────────────────────────────────────────────

    #[tokio::test]
    async fn disconnect_on_never_connected_manager_is_a_no_op() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        let mut mgr = manager(control.clone(), engine.clone());

        mgr.disconnect().await;
        mgr.disconnect().await;

        assert_eq!(control.counts(), (0, 0, 0, 0));
        assert_eq!(engine.allocated_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_twice_releases_everything_once() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        let mut mgr = manager(control.clone(), engine.clone());

        mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap();
        mgr.disconnect().await;
        mgr.disconnect().await;

        assert!(!mgr.is_connected());
        assert_eq!(control.counts(), (1, 1, 1, 1));
        mgr.await_drains().await;
        assert_eq!(engine.released(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn port_is_closed_only_after_the_grace_interval() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        let mut mgr = manager(control.clone(), engine.clone());

        mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap();
        mgr.disconnect().await;

        // Session is already empty, but the hardware is still draining:
        // the stream stays open and the port stays allocated.
        tokio::task::yield_now().await;
        assert!(engine.is_open(0));
        assert_eq!(engine.allocated_count(), 1);
        assert_eq!(mgr.pending_drains(), 1);

        tokio::time::advance(GRACE - Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert!(engine.is_open(0), "drain must respect the grace interval");

        tokio::time::advance(Duration::from_millis(2)).await;
        mgr.await_drains().await;
        assert!(!engine.is_open(0));
        assert_eq!(engine.released(), vec![0]);
        assert_eq!(mgr.pending_drains(), 0);
    }

    // ── Port uniqueness ───────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn switching_cameras_never_reuses_a_draining_port() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        let mut mgr = manager(control.clone(), engine.clone());

        mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap();
        // Implicit disconnect of A; its port is still draining while B
        // connects.
        mgr.connect(camera_b(), &RenderTarget::Headless).await.unwrap();

        assert!(engine.is_open(1), "B must get a fresh port");
        assert_eq!(engine.allocated_count(), 2, "A's port still allocated while draining");

        mgr.await_drains().await;
        assert_eq!(engine.released(), vec![0]);
        assert_eq!(engine.allocated_count(), 1);

        // With A's drain finished, its id is available again.
        mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap();
        assert!(engine.is_open(0));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_reconnects_hold_no_duplicate_ports() {
        let control = MockControl::new();
        let engine = MockEngine::new(8);
        let mut mgr = manager(control.clone(), engine.clone());

        for i in 0..4 {
            let cam = if i % 2 == 0 { camera_a() } else { camera_b() };
            mgr.connect(cam, &RenderTarget::Headless).await.unwrap();
        }
        // Ports 0..3 were handed out; none was reissued while draining.
        let mut released = engine.released();
        released.sort_unstable();
        assert!(released.len() <= 3);
        assert_eq!(engine.allocated_count() + released.len(), 4);

        mgr.shutdown().await;
        assert_eq!(engine.allocated_count(), 0);
    }

    // ── Frame routing ─────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn frames_route_to_the_port_captured_at_wiring_time() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        let mut mgr = manager(control.clone(), engine.clone());

        mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap();

        control.deliver(&raw_packet());
        control.deliver(&raw_packet());
        assert_eq!(engine.inputs(), vec![(0, 8), (0, 8)]);

        // Demuxed kinds are not forwarded.
        control.deliver(&FramePacket {
            kind: PayloadKind::Video,
            data: Bytes::from_static(&[1, 2, 3]),
        });
        assert_eq!(engine.inputs().len(), 2);

        // After disconnect the sink is unregistered: a frame arriving
        // late must not reach the engine at all.
        mgr.disconnect().await;
        control.deliver(&raw_packet());
        assert_eq!(engine.inputs().len(), 2);

        mgr.await_drains().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_frame_for_the_new_session_reaches_the_old_port() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        let mut mgr = manager(control.clone(), engine.clone());

        mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap();
        control.deliver(&raw_packet());

        mgr.connect(camera_b(), &RenderTarget::Headless).await.unwrap();
        control.deliver(&raw_packet());
        control.deliver(&raw_packet());

        let inputs = engine.inputs();
        assert_eq!(inputs[0], (0, 8));
        assert_eq!(&inputs[1..], &[(1, 8), (1, 8)]);

        mgr.shutdown().await;
    }

    // ── Capture ───────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn capture_requires_a_live_session() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        let mut mgr = manager(control.clone(), engine.clone());

        assert!(matches!(
            mgr.capture(Path::new("x.jpg")),
            Err(SessionError::NotConnected)
        ));

        mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap();
        mgr.disconnect().await;
        assert!(matches!(
            mgr.capture(Path::new("x.jpg")),
            Err(SessionError::NotConnected)
        ));
        mgr.await_drains().await;
    }

    #[tokio::test(start_paused = true)]
    async fn capture_delegates_to_the_engine_unchanged() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        let mut mgr = manager(control.clone(), engine.clone());
        mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap();

        mgr.capture(Path::new("a.jpg")).unwrap();
        assert_eq!(
            engine.log.lock().unwrap().snapshots,
            vec![(0, PathBuf::from("a.jpg"))]
        );

        engine.fail_snapshot.store(true, Ordering::Relaxed);
        assert!(matches!(
            mgr.capture(Path::new("b.jpg")),
            Err(SessionError::CaptureFailed(_))
        ));
        // Failure has no side effects on the session.
        assert!(mgr.is_connected());
        mgr.shutdown().await;
    }

    // ── End-to-end kiosk scenario ─────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn switch_and_capture_across_two_cameras() {
        let control = MockControl::new();
        let engine = MockEngine::new(4);
        let mut mgr = manager(control.clone(), engine.clone());

        mgr.connect(camera_a(), &RenderTarget::Headless).await.unwrap();
        control.deliver(&raw_packet());
        mgr.capture(Path::new("a.jpg")).unwrap();

        mgr.connect(camera_b(), &RenderTarget::Headless).await.unwrap();
        control.deliver(&raw_packet());
        mgr.capture(Path::new("b.jpg")).unwrap();

        let snapshots = engine.log.lock().unwrap().snapshots.clone();
        assert_eq!(snapshots, vec![(0, PathBuf::from("a.jpg")), (1, PathBuf::from("b.jpg"))]);

        // Nothing destined for B ever touched A's port.
        let inputs = engine.inputs();
        assert_eq!(inputs, vec![(0, 8), (1, 8)]);

        mgr.shutdown().await;
        assert_eq!(engine.allocated_count(), 0);
    }
}
