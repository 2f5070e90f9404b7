use crate::audio::AudioFrame;
use crate::config::ReconnectConfig;
use crate::credentials::TokenIssuer;
use crate::error::{StreamError, StreamResult};
use crate::transcript::{RemoteMessage, TranscriptSegment};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle of the transcription transport
///
/// Owned exclusively by the transport; state transitions are the only way
/// this mutates, and consumers observe it through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// Terminal failure reported once by the transport
#[derive(Debug, Clone, Error)]
pub enum TransportFailure {
    /// A configuration problem will not self-heal, so it is never retried
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection lost after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Inbound notifications from the transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Provisional transcript; only the latest matters
    Interim(TranscriptSegment),
    /// Finalized transcript, delivered in remote emit order
    Final(TranscriptSegment),
    /// The transport has given up; no further events will follow
    Failed(TransportFailure),
}

/// Lightweight outbound handle for pump tasks
///
/// Frames offered while the transport is not `Connected` are dropped, never
/// queued — stale audio is worse than missing audio for live transcription.
#[derive(Clone)]
pub struct FrameSink {
    state: watch::Receiver<ConnectionState>,
    frames: mpsc::Sender<AudioFrame>,
}

impl FrameSink {
    pub fn send(&self, frame: AudioFrame) {
        if *self.state.borrow() != ConnectionState::Connected {
            trace!("Dropping audio frame while not connected");
            return;
        }
        if self.frames.try_send(frame).is_err() {
            trace!("Outbound frame buffer full, dropping frame");
        }
    }
}

/// A single logical streaming session against the transcription endpoint
///
/// Survives transient network failures via exponential backoff
/// (`delay = min(base * 2^attempt, max)`, counter reset on every successful
/// connect). `disconnect` is terminal for the instance: create a new
/// transport to stream again.
pub struct TranscriptionTransport {
    consultation_id: Uuid,
    reconnect: ReconnectConfig,
    keepalive: Duration,
    issuer: Arc<dyn TokenIssuer>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    frame_tx: mpsc::Sender<AudioFrame>,
    frame_rx: Option<mpsc::Receiver<AudioFrame>>,
    worker: Option<JoinHandle<()>>,
}

impl TranscriptionTransport {
    pub fn new(
        consultation_id: Uuid,
        reconnect: ReconnectConfig,
        keepalive: Duration,
        issuer: Arc<dyn TokenIssuer>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let (frame_tx, frame_rx) = mpsc::channel(64);

        Self {
            consultation_id,
            reconnect,
            keepalive,
            issuer,
            state_tx,
            state_rx,
            shutdown_tx,
            frame_tx,
            frame_rx: Some(frame_rx),
            worker: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Observe connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Outbound handle usable from a pump task while the transport itself
    /// stays owned by its controller
    pub fn frame_sink(&self) -> FrameSink {
        FrameSink {
            state: self.state_rx.clone(),
            frames: self.frame_tx.clone(),
        }
    }

    /// Start the connection worker.
    ///
    /// Idempotent while the worker is alive (`Connecting`/`Connected`/
    /// `Reconnecting`): repeated calls are a no-op. After `disconnect` or a
    /// terminal failure the instance cannot be revived.
    pub fn connect(&mut self, events: mpsc::Sender<TransportEvent>) -> StreamResult<()> {
        if let Some(ref worker) = self.worker {
            if worker.is_finished() {
                // The worker only exits on terminal failure or disconnect
                return Err(StreamError::TransportClosed);
            }
            return Ok(());
        }

        let frame_rx = self.frame_rx.take().ok_or(StreamError::TransportClosed)?;

        let ctx = WorkerContext {
            consultation_id: self.consultation_id,
            reconnect: self.reconnect.clone(),
            keepalive: self.keepalive,
            issuer: Arc::clone(&self.issuer),
            state_tx: self.state_tx.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
            frame_rx,
            events,
        };

        self.worker = Some(tokio::spawn(run_worker(ctx)));
        Ok(())
    }

    /// Send one audio frame; valid only while `Connected`, dropped otherwise.
    pub fn send_frame(&self, frame: AudioFrame) {
        self.frame_sink().send(frame);
    }

    /// Close the connection, cancel any pending reconnect timer, and wait
    /// for the worker to wind down. No inbound events fire after this
    /// returns. Terminal for this instance.
    pub async fn disconnect(&mut self) {
        let _ = self.shutdown_tx.send(true);
        // Mark the instance unusable even if connect was never called
        self.frame_rx = None;

        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        } else if *self.state_rx.borrow() != ConnectionState::Failed {
            let _ = self.state_tx.send(ConnectionState::Disconnected);
        }

        info!(consultation_id = %self.consultation_id, "Transcription transport disconnected");
    }
}

struct WorkerContext {
    consultation_id: Uuid,
    reconnect: ReconnectConfig,
    keepalive: Duration,
    issuer: Arc<dyn TokenIssuer>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_rx: watch::Receiver<bool>,
    frame_rx: mpsc::Receiver<AudioFrame>,
    events: mpsc::Sender<TransportEvent>,
}

enum SocketExit {
    /// disconnect() was requested
    Shutdown,
    /// The remote closed or the stream errored
    RemoteClosed,
}

async fn run_worker(mut ctx: WorkerContext) {
    let mut attempt: u32 = 0;

    loop {
        if *ctx.shutdown_rx.borrow() {
            set_state(&ctx.state_tx, ConnectionState::Disconnected);
            return;
        }

        set_state(&ctx.state_tx, ConnectionState::Connecting);

        let credentials = match ctx.issuer.issue(ctx.consultation_id).await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!(
                    consultation_id = %ctx.consultation_id,
                    error = %e,
                    "Credential issuance failed; not retrying"
                );
                set_state(&ctx.state_tx, ConnectionState::Failed);
                let _ = ctx
                    .events
                    .send(TransportEvent::Failed(TransportFailure::Configuration(
                        e.to_string(),
                    )))
                    .await;
                return;
            }
        };

        match open_socket(&credentials.url, &credentials.api_key).await {
            Ok(socket) => {
                attempt = 0;
                set_state(&ctx.state_tx, ConnectionState::Connected);
                info!(consultation_id = %ctx.consultation_id, "Transcription stream connected");

                // Anything buffered before or between connections is stale
                while ctx.frame_rx.try_recv().is_ok() {}

                let exit = drive_socket(
                    ctx.consultation_id,
                    ctx.keepalive,
                    &mut ctx.shutdown_rx,
                    &mut ctx.frame_rx,
                    &ctx.events,
                    socket,
                )
                .await;
                match exit {
                    SocketExit::Shutdown => {
                        set_state(&ctx.state_tx, ConnectionState::Disconnected);
                        return;
                    }
                    SocketExit::RemoteClosed => {
                        warn!(consultation_id = %ctx.consultation_id, "Transcription stream closed unexpectedly");
                    }
                }
            }
            Err(e) => {
                warn!(
                    consultation_id = %ctx.consultation_id,
                    error = %e,
                    "Transcription connect failed"
                );
            }
        }

        if *ctx.shutdown_rx.borrow() {
            set_state(&ctx.state_tx, ConnectionState::Disconnected);
            return;
        }

        if attempt >= ctx.reconnect.max_attempts {
            error!(
                consultation_id = %ctx.consultation_id,
                attempts = attempt,
                "Giving up after maximum reconnect attempts"
            );
            set_state(&ctx.state_tx, ConnectionState::Failed);
            let _ = ctx
                .events
                .send(TransportEvent::Failed(TransportFailure::RetriesExhausted {
                    attempts: attempt,
                }))
                .await;
            return;
        }

        let delay = ctx.reconnect.delay_for(attempt);
        attempt += 1;
        set_state(&ctx.state_tx, ConnectionState::Reconnecting);
        info!(
            consultation_id = %ctx.consultation_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to transcription endpoint"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.shutdown_rx.changed() => {
                set_state(&ctx.state_tx, ConnectionState::Disconnected);
                return;
            }
        }
    }
}

async fn open_socket(url: &str, api_key: &str) -> StreamResult<WsStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| StreamError::Configuration(format!("invalid endpoint URL: {e}")))?;

    let auth = HeaderValue::from_str(&format!("Token {api_key}"))
        .map_err(|_| StreamError::Configuration("API key is not header-safe".to_string()))?;
    request.headers_mut().insert("Authorization", auth);

    let (socket, _response) = connect_async(request)
        .await
        .map_err(|e| StreamError::TransientNetwork(e.to_string()))?;

    Ok(socket)
}

async fn drive_socket(
    consultation_id: Uuid,
    keepalive_interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
    frame_rx: &mut mpsc::Receiver<AudioFrame>,
    events: &mpsc::Sender<TransportEvent>,
    socket: WsStream,
) -> SocketExit {
    let (mut sink, mut stream) = socket.split();

    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + keepalive_interval,
        keepalive_interval,
    );
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return SocketExit::Shutdown;
            }

            frame = frame_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = sink.send(Message::Binary(frame.to_le_bytes())).await {
                            warn!(error = %e, "Failed to send audio frame");
                            return SocketExit::RemoteClosed;
                        }
                    }
                    // The transport owns a sender, so this only happens on teardown
                    None => return SocketExit::Shutdown,
                }
            }

            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_message(consultation_id, events, &text).await;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "Remote closed transcription stream");
                        return SocketExit::RemoteClosed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Transcription stream error");
                        return SocketExit::RemoteClosed;
                    }
                    None => return SocketExit::RemoteClosed,
                }
            }

            _ = keepalive.tick() => {
                let _ = sink.send(Message::Text(r#"{"type":"KeepAlive"}"#.to_string())).await;
            }
        }
    }
}

async fn dispatch_message(
    consultation_id: Uuid,
    events: &mpsc::Sender<TransportEvent>,
    raw: &str,
) {
    let Some(segment) = RemoteMessage::into_segment(raw, consultation_id) else {
        trace!("Ignoring non-transcript message");
        return;
    };

    let event = if segment.is_final {
        TransportEvent::Final(segment)
    } else {
        TransportEvent::Interim(segment)
    };

    if events.send(event).await.is_err() {
        debug!("Transport event receiver dropped");
    }
}

fn set_state(tx: &watch::Sender<ConnectionState>, state: ConnectionState) {
    tx.send_if_modified(|current| {
        if *current == state {
            false
        } else {
            debug!(?state, "Transport state transition");
            *current = state;
            true
        }
    });
}
