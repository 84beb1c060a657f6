//! Simulated control service.
//!
//! Stands in for the vendor device service when no cameras are reachable:
//! an in-memory device directory with a credential check, and one pump
//! task per subscription feeding synthetic raw A/V packets to whichever
//! sink is registered. Handle values are monotonically increasing and
//! never reused, matching real SDK behaviour.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use teecam_core::Credentials;

use crate::{
    ControlError, ControlHandle, ControlService, FramePacket, FrameSink, PayloadKind,
    SecurityCapability, SinkToken, StreamHandle, StreamProfile,
};

/// Vendor-style diagnostic codes reported through `last_error`.
pub const ERR_UNKNOWN_HOST: i32 = 11;
pub const ERR_BAD_CREDENTIALS: i32 = 100;
pub const ERR_BAD_CHANNEL: i32 = 120;

// MARK: - SimOptions

#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Interval between synthetic frames.
    pub frame_interval: Duration,
    /// Payload size of each synthetic frame.
    pub frame_bytes: usize,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            frame_bytes: 4096,
        }
    }
}

// MARK: - SimulatedControlService

type SinkSlot = Mutex<Option<(u64, Arc<dyn FrameSink>)>>;

struct Subscription {
    sink: Arc<SinkSlot>,
    pump: JoinHandle<()>,
}

struct SimState {
    logins: HashMap<u64, String>,
    subscriptions: HashMap<u64, Subscription>,
}

pub struct SimulatedControlService {
    hosts: Vec<String>,
    credentials: Credentials,
    options: SimOptions,
    next_handle: AtomicU64,
    next_token: AtomicU64,
    last_error: AtomicI32,
    state: Mutex<SimState>,
}

impl SimulatedControlService {
    /// `hosts` is the set of device addresses that accept the credential
    /// pair; anything else is rejected at login.
    pub fn new(
        hosts: impl IntoIterator<Item = impl Into<String>>,
        credentials: Credentials,
        options: SimOptions,
    ) -> Self {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
            credentials,
            options,
            next_handle: AtomicU64::new(1),
            next_token: AtomicU64::new(1),
            last_error: AtomicI32::new(0),
            state: Mutex::new(SimState {
                logins: HashMap::new(),
                subscriptions: HashMap::new(),
            }),
        }
    }

    fn fail(&self, code: i32) -> i32 {
        self.last_error.store(code, Ordering::Relaxed);
        code
    }

    /// Synthetic raw A/V packet: an AnnexB-looking start code, a frame
    /// counter, and zero padding up to the configured size.
    fn synth_packet(counter: u64, frame_bytes: usize) -> FramePacket {
        let mut data = Vec::with_capacity(frame_bytes.max(12));
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        data.extend_from_slice(&counter.to_be_bytes());
        data.resize(frame_bytes.max(12), 0);
        FramePacket {
            kind: PayloadKind::RawAvMix,
            data: Bytes::from(data),
        }
    }
}

#[async_trait]
impl ControlService for SimulatedControlService {
    async fn login(
        &self,
        host: &str,
        _port: u16,
        credentials: &Credentials,
        _capability: SecurityCapability,
    ) -> Result<ControlHandle, ControlError> {
        if !self.hosts.iter().any(|h| h == host) {
            return Err(ControlError::LoginRejected {
                code: self.fail(ERR_UNKNOWN_HOST),
            });
        }
        if *credentials != self.credentials {
            return Err(ControlError::LoginRejected {
                code: self.fail(ERR_BAD_CREDENTIALS),
            });
        }

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.state
            .lock()
            .unwrap()
            .logins
            .insert(handle, host.to_string());
        debug!("sim login {} -> handle {}", host, handle);
        Ok(ControlHandle(handle))
    }

    async fn logout(&self, handle: ControlHandle) {
        let removed = self.state.lock().unwrap().logins.remove(&handle.0);
        if removed.is_none() {
            warn!("sim logout of unknown handle {}", handle.0);
        }
    }

    async fn subscribe(
        &self,
        handle: ControlHandle,
        channel: u32,
        _profile: StreamProfile,
    ) -> Result<StreamHandle, ControlError> {
        {
            let state = self.state.lock().unwrap();
            if !state.logins.contains_key(&handle.0) {
                return Err(ControlError::UnknownHandle);
            }
        }
        // Simulated devices expose channels 0..=15.
        if channel > 15 {
            return Err(ControlError::SubscribeRejected {
                code: self.fail(ERR_BAD_CHANNEL),
            });
        }

        let stream = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let sink: Arc<SinkSlot> = Arc::new(Mutex::new(None));

        let pump_sink = Arc::clone(&sink);
        let interval = self.options.frame_interval;
        let frame_bytes = self.options.frame_bytes;
        let pump = tokio::spawn(async move {
            let mut counter: u64 = 0;
            loop {
                tokio::time::sleep(interval).await;
                counter += 1;
                let packet = Self::synth_packet(counter, frame_bytes);
                let sink = pump_sink.lock().unwrap().as_ref().map(|(_, s)| Arc::clone(s));
                if let Some(sink) = sink {
                    sink.on_frame(&packet);
                }
            }
        });

        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(stream, Subscription { sink, pump });
        debug!("sim subscribe handle {} ch {} -> stream {}", handle.0, channel, stream);
        Ok(StreamHandle(stream))
    }

    async fn unsubscribe(&self, stream: StreamHandle) {
        let sub = self.state.lock().unwrap().subscriptions.remove(&stream.0);
        match sub {
            Some(sub) => {
                sub.pump.abort();
                debug!("sim unsubscribe stream {}", stream.0);
            }
            None => warn!("sim unsubscribe of unknown stream {}", stream.0),
        }
    }

    async fn register_frame_sink(
        &self,
        stream: StreamHandle,
        sink: Arc<dyn FrameSink>,
    ) -> SinkToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let state = self.state.lock().unwrap();
        if let Some(sub) = state.subscriptions.get(&stream.0) {
            *sub.sink.lock().unwrap() = Some((token, sink));
        } else {
            warn!("sim sink registration for unknown stream {}", stream.0);
        }
        SinkToken(token)
    }

    async fn unregister_frame_sink(&self, token: SinkToken) {
        let state = self.state.lock().unwrap();
        for sub in state.subscriptions.values() {
            let mut slot = sub.sink.lock().unwrap();
            if matches!(&*slot, Some((id, _)) if *id == token.0) {
                *slot = None;
                return;
            }
        }
        // Token's subscription is already gone; nothing to detach.
    }

    fn last_error(&self) -> i32 {
        self.last_error.load(Ordering::Relaxed)
    }
}

impl Drop for SimulatedControlService {
    fn drop(&mut self) {
        let state = self.state.lock().unwrap();
        for sub in state.subscriptions.values() {
            sub.pump.abort();
        }
    }
}

// MARK: - Tests
