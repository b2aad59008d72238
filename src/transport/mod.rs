//! Persistent WebSocket to the phone: heartbeat, watchdog and reconnection.

pub mod backoff;
pub mod heartbeat;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::BackoffPolicy;
use crate::error::TransportError;
use crate::protocol::{ControlMessage, Outbound};

use backoff::Backoff;
use heartbeat::Heartbeat;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Sub-protocol the phone expects
pub const SUBPROTOCOL: &str = "binary";

/// What the transport reports to the session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Binary(Vec<u8>),
    Control(ControlMessage),
    /// Socket closed or could not be opened; a reconnection is scheduled
    Closed { reason: String },
    /// A reconnection attempt is starting
    Reconnecting,
    /// Pong watchdog expired. The socket stays open.
    Watchdog(String),
    /// Reconnection policy exhausted; the transport has stopped
    GaveUp(String),
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub heartbeat_interval: Duration,
    pub watchdog_timeout: Duration,
    pub backoff: BackoffPolicy,
}

/// Session side of the transport. Dropping it aborts the transport task.
#[derive(Debug)]
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
    pending_frames: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TransportHandle {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Queue a message for the socket. Dropped silently while not open.
    pub fn send(&self, message: impl Into<Outbound>) {
        if !self.is_open() {
            return;
        }
        let _ = self.outbound.send(message.into());
    }

    /// Pending-frame gauge reported in PING
    pub fn set_pending_frames(&self, count: usize) {
        self.pending_frames.store(count, Ordering::Relaxed);
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        // A JoinHandle going away only detaches the task
        self.task.abort();
    }
}

pub struct TransportClient<T> {
    config: TransportConfig,
    events: mpsc::UnboundedSender<T>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    open: Arc<AtomicBool>,
    pending_frames: Arc<AtomicUsize>,
}

/// How one connection ended
enum ConnectionEnd {
    Closed(String),
    Shutdown,
}

impl<T> TransportClient<T>
where
    T: From<TransportEvent> + Send + 'static,
{
    /// Start the connect/reconnect loop on the current runtime.
    pub fn spawn(config: TransportConfig, events: mpsc::UnboundedSender<T>) -> TransportHandle {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(false));
        let pending_frames = Arc::new(AtomicUsize::new(0));

        let client = TransportClient {
            config,
            events,
            outbound: outbound_rx,
            open: open.clone(),
            pending_frames: pending_frames.clone(),
        };
        let task = tokio::spawn(client.run());

        TransportHandle {
            outbound: outbound_tx,
            open,
            pending_frames,
            task,
        }
    }

    fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event.into()).is_ok()
    }

    async fn run(mut self) {
        let mut backoff = Backoff::new(self.config.backoff.clone());
        let mut rng = StdRng::from_entropy();

        loop {
            match connect(&self.config.url).await {
                Ok(socket) => {
                    info!(url = %self.config.url, "websocket connection established");
                    backoff.reset();
                    self.open.store(true, Ordering::Release);
                    if !self.emit(TransportEvent::Opened) {
                        return;
                    }

                    let end = self.serve(socket).await;
                    self.open.store(false, Ordering::Release);
                    // Anything queued for the dead socket is stale
                    while self.outbound.try_recv().is_ok() {}

                    match end {
                        ConnectionEnd::Shutdown => return,
                        ConnectionEnd::Closed(reason) => {
                            warn!(%reason, "websocket connection closed");
                            if !self.emit(TransportEvent::Closed { reason }) {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "websocket connection failed");
                    if !self.emit(TransportEvent::Closed {
                        reason: e.to_string(),
                    }) {
                        return;
                    }
                }
            }

            let Some(delay) = backoff.next_delay(&mut rng) else {
                let err = TransportError::RetriesExhausted(backoff.retries());
                error!(error = %err, "giving up on reconnection");
                self.emit(TransportEvent::GaveUp(format!(
                    "Reconnection failed after {} attempts",
                    backoff.retries()
                )));
                return;
            };

            debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnection");
            if !self.wait(delay).await {
                return;
            }
            if !self.emit(TransportEvent::Reconnecting) {
                return;
            }
        }
    }

    /// Sleep out the backoff delay, discarding sends. False on shutdown.
    async fn wait(&mut self, delay: Duration) -> bool {
        let deadline = sleep(delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return true,
                msg = self.outbound.recv() => {
                    if msg.is_none() {
                        return false;
                    }
                }
            }
        }
    }

    async fn serve(&mut self, socket: Socket) -> ConnectionEnd {
        let (mut sink, mut stream) = socket.split();
        let interval = self.config.heartbeat_interval;
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = Heartbeat::new(self.config.watchdog_timeout);

        loop {
            let deadline = heartbeat.deadline();
            tokio::select! {
                _ = ticker.tick() => {
                    let heart = heartbeat.beat(Instant::now());
                    let ping = Outbound::from(ControlMessage::Ping {
                        heart,
                        pending_frames: self.pending_frames.load(Ordering::Relaxed),
                    });
                    if let Err(reason) = send_text(&mut sink, &ping).await {
                        return ConnectionEnd::Closed(reason);
                    }
                }
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if heartbeat.expired(Instant::now()) {
                        let message = heartbeat.message();
                        warn!("{}", message);
                        if !self.emit(TransportEvent::Watchdog(message)) {
                            return ConnectionEnd::Shutdown;
                        }
                    }
                }
                msg = self.outbound.recv() => match msg {
                    Some(msg) => {
                        if let Err(reason) = send_text(&mut sink, &msg).await {
                            return ConnectionEnd::Closed(reason);
                        }
                    }
                    None => {
                        let _ = sink.close().await;
                        return ConnectionEnd::Shutdown;
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Binary(data))) => {
                        if !self.emit(TransportEvent::Binary(data)) {
                            return ConnectionEnd::Shutdown;
                        }
                    }
                    Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ControlMessage>(&text) {
                        Ok(message) => {
                            if let ControlMessage::Pong { .. } = message {
                                heartbeat.pong();
                            }
                            if !self.emit(TransportEvent::Control(message)) {
                                return ConnectionEnd::Shutdown;
                            }
                        }
                        Err(e) => debug!(error = %e, %text, "ignoring unknown host message"),
                    },
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "No reason provided".to_string());
                        return ConnectionEnd::Closed(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return ConnectionEnd::Closed(TransportError::from(e).to_string()),
                    None => return ConnectionEnd::Closed("No reason provided".to_string()),
                },
            }
        }
    }
}

async fn connect(url: &str) -> Result<Socket, TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::Request(e.to_string()))?;
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));

    let (socket, _) = connect_async(request)
        .await
        .map_err(|source| TransportError::Connect {
            url: url.to_string(),
            source,
        })?;
    Ok(socket)
}

async fn send_text<S>(sink: &mut S, message: &Outbound) -> Result<(), String>
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = match message.to_text() {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "failed to encode outbound message");
            return Ok(());
        }
    };
    sink.send(WsMessage::Text(text))
        .await
        .map_err(|e| TransportError::from(e).to_string())
}
