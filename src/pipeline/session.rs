use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::queue::{FrameStats, PresentationQueue};
use crate::config::{Geometry, SessionConfig};
use crate::decoder::adapter::BackendUpdate;
use crate::decoder::{
    AdapterState, BackendEvent, BackendFactory, DecodeOutcome, DecoderAdapter,
};
use crate::protocol::{
    ControlMessage, InitParams, Outbound, WorkerCommand, WorkerEvent, MIN_APP_VERSION,
};
use crate::render::{RenderSink, Surface};
use crate::stream::direct::CodecFamily;
use crate::stream::{Classified, DirectHandler, NalRouter, StreamClassifier};
use crate::transport::{TransportClient, TransportConfig, TransportEvent, TransportHandle};

pub const OUTDATED_APP: &str =
    "You need to run TeslAA 2.3 or newer to use this page, please update.";
pub const NO_DECODER: &str = "Direct stream mode disabled: No video decoder available";
pub const DIRECT_MODE: &str = "Switching to direct stream mode";
pub const RESOLUTION_ADAPTED: &str = "Resolution adapted, waiting for a new keyframe...";
pub const SOFTWARE_FALLBACK: &str = "Hardware decoder failed, switched to software decoding";

/// Everything the session loop reacts to, in arrival order
#[derive(Debug)]
pub enum SessionEvent {
    Transport(TransportEvent),
    Command(WorkerCommand),
    /// Present the next queued frame
    Tick,
    Shutdown,
}

impl From<TransportEvent> for SessionEvent {
    fn from(event: TransportEvent) -> Self {
        SessionEvent::Transport(event)
    }
}

/// Where outbound control messages go
pub trait Outlet {
    fn send(&self, message: Outbound);

    /// Frames waiting for presentation, reported in PING
    fn set_pending_frames(&self, _count: usize) {}
}

impl Outlet for TransportHandle {
    fn send(&self, message: Outbound) {
        TransportHandle::send(self, message);
    }

    fn set_pending_frames(&self, count: usize) {
        TransportHandle::set_pending_frames(self, count);
    }
}

/// Outlet for sessions without a socket
#[derive(Debug, Default)]
pub struct Discard;

impl Outlet for Discard {
    fn send(&self, message: Outbound) {
        debug!(?message, "no transport, discarding outbound message");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// INIT opens the WebSocket
    Network,
    /// Input is injected locally (file replay)
    Offline,
}

/// Cloneable sender into a running session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub fn command(&self, command: WorkerCommand) -> bool {
        self.tx.send(SessionEvent::Command(command)).is_ok()
    }

    /// Inject a binary message as if it came off the socket.
    pub fn binary(&self, data: Vec<u8>) -> bool {
        self.tx
            .send(SessionEvent::Transport(TransportEvent::Binary(data)))
            .is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(SessionEvent::Shutdown);
    }
}

/// Receiver session: owns every pipeline stage and runs them from one loop.
pub struct Session<S: Surface> {
    config: SessionConfig,
    mode: SessionMode,
    geometry: Geometry,
    night: bool,
    initialized: bool,
    classifier: StreamClassifier,
    router: NalRouter,
    direct: DirectHandler,
    adapter: DecoderAdapter,
    queue: PresentationQueue,
    sink: RenderSink<S>,
    stats: FrameStats,
    outlet: Box<dyn Outlet>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    backend_rx: mpsc::UnboundedReceiver<BackendEvent>,
    worker_events: mpsc::UnboundedSender<WorkerEvent>,
    keyframe_check_at: Option<Instant>,
    frames_since_open: u64,
}

impl<S: Surface> Session<S> {
    pub fn new(
        config: SessionConfig,
        mode: SessionMode,
        surface: S,
        backends: Box<dyn BackendFactory>,
        worker_events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> (Self, SessionHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (backend_tx, backend_rx) = mpsc::unbounded_channel();

        let session = Self {
            mode,
            geometry: config.geometry,
            night: config.night,
            initialized: false,
            classifier: StreamClassifier::new(config.unlatch_after),
            router: NalRouter::new(config.split_concatenated_units),
            direct: DirectHandler::default(),
            adapter: DecoderAdapter::new(backends, backend_tx),
            queue: PresentationQueue::new(config.ack_threshold),
            sink: RenderSink::new(surface, config.texture_pool_capacity),
            stats: FrameStats::new(config.fps_window),
            outlet: Box::new(Discard),
            events_tx: events_tx.clone(),
            events_rx,
            backend_rx,
            worker_events,
            keyframe_check_at: None,
            frames_since_open: 0,
            config,
        };
        (session, SessionHandle { tx: events_tx })
    }

    /// Drive the session until shutdown.
    pub async fn run(mut self) {
        let mut stats = interval(self.config.stats_interval);
        stats.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately
        stats.tick().await;

        loop {
            let keyframe_check_at = self.keyframe_check_at;
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(SessionEvent::Shutdown) | None => break,
                    Some(event) => self.handle_event(event),
                },
                Some(event) = self.backend_rx.recv() => self.handle_backend_event(event),
                _ = stats.tick() => self.emit_stats(),
                _ = sleep_until(keyframe_check_at.unwrap_or_else(Instant::now)), if keyframe_check_at.is_some() => {
                    self.check_keyframe();
                }
            }
        }

        info!(rendered = self.stats.rendered(), "session shutting down");
        if !self.queue.is_empty() {
            debug!(frames = self.queue.len(), "releasing queued frames");
        }
        self.queue.release_all();
        self.sink.shutdown();
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Transport(event) => self.handle_transport(event),
            SessionEvent::Command(command) => self.handle_command(command),
            SessionEvent::Tick => self.tick(),
            SessionEvent::Shutdown => {}
        }
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.worker_events.send(event);
    }

    fn send(&self, message: impl Into<Outbound>) {
        self.outlet.send(message.into());
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                self.send(ControlMessage::Night { value: self.night });
                self.frames_since_open = 0;
                self.keyframe_check_at = Some(Instant::now() + self.config.keyframe_check_delay);
            }
            TransportEvent::Binary(data) => self.on_binary(&data),
            TransportEvent::Control(ControlMessage::Night { value }) => {
                debug!(value, "night mode from host");
                self.night = value;
            }
            TransportEvent::Control(message) => debug!(?message, "control message"),
            TransportEvent::Closed { reason } => {
                self.keyframe_check_at = None;
                self.emit(WorkerEvent::error(format!(
                    "WebSocket connection closed: {}",
                    reason
                )));
            }
            TransportEvent::Reconnecting => self.emit(WorkerEvent::error("Reconnecting...")),
            TransportEvent::Watchdog(message) | TransportEvent::GaveUp(message) => {
                self.emit(WorkerEvent::error(message))
            }
        }
    }

    fn handle_command(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Init(params) => self.init(params),
            WorkerCommand::Resize { width, height } => self.resize(Geometry::new(width, height)),
            WorkerCommand::ClearBuffers => {
                if self.queue.clear_buffers() {
                    let _ = self.events_tx.send(SessionEvent::Tick);
                }
                self.outlet.set_pending_frames(self.queue.len());
                self.send(ControlMessage::RequestKeyframe);
            }
            WorkerCommand::Night { value } => {
                self.night = value;
                self.send(ControlMessage::Night { value });
            }
            WorkerCommand::Forward(value) => self.send(Outbound::Forward(value)),
        }
    }

    fn init(&mut self, params: InitParams) {
        if params.app_version < MIN_APP_VERSION {
            warn!(app_version = params.app_version, "phone app too old");
            self.emit(WorkerEvent::error(OUTDATED_APP));
            return;
        }
        if self.initialized {
            warn!("session already initialized, ignoring INIT");
            return;
        }
        self.initialized = true;

        self.config.port = params.port;
        self.config.app_version = params.app_version;
        self.geometry = Geometry::new(params.width, params.height);
        self.sink.resize(params.width, params.height);

        let force_software = params.broadway || self.config.force_software;
        if self.adapter.init(force_software) == AdapterState::Unavailable {
            self.decoder_lost();
        }

        if self.mode == SessionMode::Network {
            let transport = TransportConfig {
                url: self.config.url(),
                heartbeat_interval: self.config.heartbeat_interval,
                watchdog_timeout: self.config.watchdog_timeout,
                backoff: self.config.backoff.clone(),
            };
            info!(url = %transport.url, "connecting");
            let handle = TransportClient::spawn(transport, self.events_tx.clone());
            self.outlet = Box::new(handle);
        }
    }

    fn resize(&mut self, geometry: Geometry) {
        info!(width = geometry.width, height = geometry.height, "resizing");
        self.geometry = geometry;
        self.sink.resize(geometry.width, geometry.height);

        if self.adapter.state() != AdapterState::Uninitialized {
            // Keep whichever codec the stream configured, only the size changes
            let config = if self.classifier.is_direct() {
                self.direct.config_for(geometry)
            } else {
                Some(self.router.config_for(geometry))
            };
            match config {
                Some(config) => {
                    let outcome = self.adapter.configure(&config);
                    let mut outcomes = vec![outcome];
                    if outcome == DecodeOutcome::FailedOver {
                        outcomes.push(self.adapter.configure(&config));
                    }
                    self.after_decode(&outcomes);
                }
                None => debug!("no direct codec config yet, nothing to reconfigure"),
            }
        }
        self.emit(WorkerEvent::warning(RESOLUTION_ADAPTED));
    }

    fn on_binary(&mut self, data: &[u8]) {
        match self.classifier.classify(data) {
            Classified::Direct {
                header,
                payload,
                newly_latched,
            } => {
                if newly_latched {
                    self.emit(WorkerEvent::warning(DIRECT_MODE));
                }
                let handled = self
                    .direct
                    .handle(&header, payload, &mut self.adapter, self.geometry);
                if let Some(outcomes) = handled {
                    self.after_decode(&outcomes);
                    // Each handled direct message returns credit while the backlog is short
                    if self.queue.len() <= self.config.ack_threshold {
                        self.send(ControlMessage::Ack);
                    }
                }
            }
            Classified::Legacy(bytes) => {
                let outcomes = self.router.route(bytes, &mut self.adapter, self.geometry);
                self.after_decode(&outcomes);
            }
            Classified::Dropped(e) => debug!(error = %e, "dropped malformed direct message"),
        }
    }

    fn after_decode(&mut self, outcomes: &[DecodeOutcome]) {
        for outcome in outcomes {
            match outcome {
                DecodeOutcome::FailedOver => {
                    self.emit(WorkerEvent::warning(SOFTWARE_FALLBACK));
                    self.send(ControlMessage::RequestKeyframe);
                }
                DecodeOutcome::DecoderLost => self.decoder_lost(),
                _ => {}
            }
        }
    }

    fn decoder_lost(&mut self) {
        warn!("no video decoder available");
        self.classifier.reset();
        self.emit(WorkerEvent::warning(NO_DECODER));
    }

    pub fn handle_backend_event(&mut self, event: BackendEvent) {
        match self.adapter.on_backend_event(event) {
            BackendUpdate::Frame(frame) => {
                self.frames_since_open += 1;
                if self.queue.push(frame) {
                    self.tick();
                }
                self.outlet.set_pending_frames(self.queue.len());
            }
            BackendUpdate::Failover(outcome) => self.after_decode(&[outcome]),
            BackendUpdate::Ignored => {}
        }
    }

    fn tick(&mut self) {
        let sink = &mut self.sink;
        let stats = &mut self.stats;
        let outcome = self.queue.tick(|frame| {
            if sink.draw(frame).is_ok() {
                stats.record_render();
            }
        });

        if outcome.send_ack {
            self.send(ControlMessage::Ack);
        }
        if outcome.reschedule {
            let _ = self.events_tx.send(SessionEvent::Tick);
        }
        self.outlet.set_pending_frames(self.queue.len());
    }

    fn check_keyframe(&mut self) {
        self.keyframe_check_at = None;
        if self.frames_since_open == 0 {
            info!("no frames since open, requesting keyframe");
            self.send(ControlMessage::RequestKeyframe);
        }
    }

    fn emit_stats(&mut self) {
        let fps = self.stats.sample();
        self.emit(WorkerEvent::Stats {
            fps,
            decode_queue_size: self.adapter.decode_queue_size(),
            pending_frames: self.queue.len(),
            codec_errors: self.adapter.codec_errors(),
            codec_type: self.codec_type().name().to_string(),
        });
    }

    /// Legacy streams are always H.264
    fn codec_type(&self) -> CodecFamily {
        match self.direct.codec() {
            Some(family) if self.classifier.is_direct() => family,
            _ => CodecFamily::Avc,
        }
    }
}

#[cfg(test)]
impl<S: Surface> Session<S> {
    fn set_outlet(&mut self, outlet: Box<dyn Outlet>) {
        self.outlet = outlet;
    }

    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn night(&self) -> bool {
        self.night
    }

    fn queue_len(&self) -> usize {
        self.queue.len()
    }

    fn adapter_state(&self) -> AdapterState {
        self.adapter.state()
    }

    fn sink(&self) -> &RenderSink<S> {
        &self.sink
    }

    /// Handle everything already queued without waiting.
    fn pump(&mut self) {
        loop {
            if let Ok(event) = self.backend_rx.try_recv() {
                self.handle_backend_event(event);
            } else if let Ok(event) = self.events_rx.try_recv() {
                self.handle_event(event);
            } else {
                break;
            }
        }
    }
}
