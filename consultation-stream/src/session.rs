use crate::audio::AudioCapturer;
use crate::config::StreamConfig;
use crate::credentials::TokenIssuer;
use crate::error::{StreamError, StreamResult};
use crate::insights::InsightStore;
use crate::repository::{ConsultationRepository, ConsultationStatus};
use crate::throttle::ThrottleController;
use crate::transcript::TranscriptSegment;
use crate::transport::{
    ConnectionState, TranscriptionTransport, TransportEvent, TransportFailure,
};
use annotation_client::AnnotationClient;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Recording lifecycle of one consultation session
///
/// `Ended` is terminal: it is reached once and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Idle,
    Recording,
    Paused,
    Ended,
}

/// UI-facing notifications emitted over the session's broadcast channel
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Recording(RecordingState),
    Connection(ConnectionState),
    /// Live caption feedback; each value supersedes the previous one
    InterimTranscript(String),
    FinalSegment(TranscriptSegment),
    InsightsUpdated { new_items: usize },
    /// The transport gave up; the session has left `recording` and needs a
    /// manual restart
    TransportFailed(String),
}

struct SessionShared {
    consultation_id: Uuid,
    state: RwLock<RecordingState>,
    events_tx: broadcast::Sender<SessionEvent>,
    store: InsightStore,
    throttle: ThrottleController,
    capturer: Mutex<Box<dyn AudioCapturer>>,
    annotation: Arc<dyn AnnotationClient>,
    repository: Arc<dyn ConsultationRepository>,
}

struct ActivePipeline {
    transport: TranscriptionTransport,
    audio_pump: JoinHandle<()>,
    event_pump: JoinHandle<()>,
    state_pump: JoinHandle<()>,
    idle_flush: Option<JoinHandle<()>>,
}

/// Orchestrates one live consultation: microphone capture, streaming
/// transcription, throttled annotation dispatch, and insight reconciliation.
///
/// Start/resume bring components up in dependency order (state, transport,
/// then capturer, so audio never flows toward a transport that is not at
/// least connecting); pause tears them down in reverse. Each session owns
/// its components — there is no shared module state between consultations.
pub struct SessionController {
    config: StreamConfig,
    issuer: Arc<dyn TokenIssuer>,
    shared: Arc<SessionShared>,
    active: Option<ActivePipeline>,
}

impl SessionController {
    pub fn new(
        consultation_id: Uuid,
        config: StreamConfig,
        capturer: Box<dyn AudioCapturer>,
        issuer: Arc<dyn TokenIssuer>,
        annotation: Arc<dyn AnnotationClient>,
        repository: Arc<dyn ConsultationRepository>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);

        let shared = Arc::new(SessionShared {
            consultation_id,
            state: RwLock::new(RecordingState::Idle),
            events_tx,
            store: InsightStore::new(),
            throttle: ThrottleController::new(&config.throttle),
            capturer: Mutex::new(capturer),
            annotation,
            repository,
        });

        Self {
            config,
            issuer,
            shared,
            active: None,
        }
    }

    /// Convenience constructor using the cpal microphone capturer
    pub fn with_microphone(
        consultation_id: Uuid,
        config: StreamConfig,
        issuer: Arc<dyn TokenIssuer>,
        annotation: Arc<dyn AnnotationClient>,
        repository: Arc<dyn ConsultationRepository>,
    ) -> Self {
        let capturer = Box::new(crate::audio::MicrophoneCapturer::new(config.audio.clone()));
        Self::new(consultation_id, config, capturer, issuer, annotation, repository)
    }

    pub fn consultation_id(&self) -> Uuid {
        self.shared.consultation_id
    }

    pub fn state(&self) -> RecordingState {
        *self.shared.state.read()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.active
            .as_ref()
            .map(|active| active.transport.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    /// The session's insight reconciliation store, for clinician review
    /// actions and display queries
    pub fn insights(&self) -> &InsightStore {
        &self.shared.store
    }

    /// Begin recording a fresh session
    pub async fn start(&mut self) -> StreamResult<()> {
        match self.state() {
            RecordingState::Idle => {}
            RecordingState::Recording => return Ok(()),
            RecordingState::Paused => {
                return Err(StreamError::InvalidTransition(
                    "session is paused; use resume()".to_string(),
                ))
            }
            RecordingState::Ended => {
                return Err(StreamError::InvalidTransition(
                    "session has ended".to_string(),
                ))
            }
        }

        info!(consultation_id = %self.shared.consultation_id, "Starting consultation session");
        self.set_state(RecordingState::Recording);

        if let Err(e) = self.spin_up().await {
            self.set_state(RecordingState::Idle);
            return Err(e);
        }
        Ok(())
    }

    /// Resume a paused session with a fresh transport
    pub async fn resume(&mut self) -> StreamResult<()> {
        match self.state() {
            RecordingState::Paused => {}
            RecordingState::Recording => return Ok(()),
            other => {
                return Err(StreamError::InvalidTransition(format!(
                    "cannot resume from {other:?}"
                )))
            }
        }

        info!(consultation_id = %self.shared.consultation_id, "Resuming consultation session");
        self.set_state(RecordingState::Recording);

        if let Err(e) = self.spin_up().await {
            self.set_state(RecordingState::Paused);
            return Err(e);
        }
        Ok(())
    }

    /// Pause recording: stop producing audio, then tear down the transport
    pub async fn pause(&mut self) -> StreamResult<()> {
        match self.state() {
            RecordingState::Recording => {}
            RecordingState::Paused => return Ok(()),
            other => {
                return Err(StreamError::InvalidTransition(format!(
                    "cannot pause from {other:?}"
                )))
            }
        }

        info!(consultation_id = %self.shared.consultation_id, "Pausing consultation session");
        self.wind_down().await;
        self.set_state(RecordingState::Paused);
        Ok(())
    }

    /// End the session permanently. Safe from any state; idempotent once
    /// ended. Late analysis results are discarded by the closed store.
    pub async fn end(&mut self) -> StreamResult<()> {
        if self.state() == RecordingState::Ended {
            return Ok(());
        }

        info!(consultation_id = %self.shared.consultation_id, "Ending consultation session");
        self.wind_down().await;
        self.shared.store.close();
        self.set_state(RecordingState::Ended);

        // Fire-and-forget semantics: a failed write is logged, the session
        // is still ended
        if let Err(e) = self
            .shared
            .repository
            .update_consultation_status(self.shared.consultation_id, ConsultationStatus::Completed)
            .await
        {
            warn!(error = %e, "Failed to persist consultation completion");
        }

        Ok(())
    }

    fn set_state(&self, state: RecordingState) {
        *self.shared.state.write() = state;
        let _ = self.shared.events_tx.send(SessionEvent::Recording(state));
    }

    async fn spin_up(&mut self) -> StreamResult<()> {
        let mut transport = TranscriptionTransport::new(
            self.shared.consultation_id,
            self.config.reconnect.clone(),
            self.config.keepalive(),
            Arc::clone(&self.issuer),
        );

        let (event_tx, event_rx) = mpsc::channel(256);
        transport.connect(event_tx)?;

        // Capture starts only after the transport is at least connecting
        let frames = {
            let mut capturer = self.shared.capturer.lock();
            capturer.start()
        };
        let mut frames = match frames {
            Ok(frames) => frames,
            Err(e) => {
                transport.disconnect().await;
                return Err(e);
            }
        };

        let sink = transport.frame_sink();
        let audio_pump = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                sink.send(frame);
            }
            debug!("Audio pump finished");
        });

        let mut state_watch = transport.watch_state();
        let state_events = self.shared.events_tx.clone();
        let state_pump = tokio::spawn(async move {
            let mut last = *state_watch.borrow();
            let _ = state_events.send(SessionEvent::Connection(last));
            while state_watch.changed().await.is_ok() {
                let current = *state_watch.borrow();
                if current != last {
                    last = current;
                    let _ = state_events.send(SessionEvent::Connection(current));
                }
            }
        });

        let event_pump = tokio::spawn(run_event_pump(Arc::clone(&self.shared), event_rx));

        let idle_flush = self.config.throttle.idle_flush().map(|period| {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Some(batch) = shared.throttle.flush_idle(Instant::now()) {
                        dispatch_analysis(Arc::clone(&shared), batch).await;
                    }
                }
            })
        });

        self.active = Some(ActivePipeline {
            transport,
            audio_pump,
            event_pump,
            state_pump,
            idle_flush,
        });
        Ok(())
    }

    /// Stop the producer first, then the sink, then wait for every pump to
    /// quiesce so no callbacks fire into a torn-down session
    async fn wind_down(&mut self) {
        self.shared.capturer.lock().stop();

        if let Some(mut active) = self.active.take() {
            if let Some(idle_flush) = active.idle_flush.take() {
                idle_flush.abort();
            }

            active.transport.disconnect().await;

            let _ = active.audio_pump.await;
            let _ = active.event_pump.await;
            drop(active.transport);
            let _ = active.state_pump.await;
        }
    }
}

async fn run_event_pump(shared: Arc<SessionShared>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Interim(segment) => {
                let _ = shared
                    .events_tx
                    .send(SessionEvent::InterimTranscript(segment.text));
            }
            TransportEvent::Final(segment) => {
                handle_final_segment(&shared, segment);
            }
            TransportEvent::Failed(failure) => {
                handle_transport_failure(&shared, failure);
            }
        }
    }
    debug!("Transport event pump finished");
}

fn handle_final_segment(shared: &Arc<SessionShared>, segment: TranscriptSegment) {
    let _ = shared
        .events_tx
        .send(SessionEvent::FinalSegment(segment.clone()));

    let repository = Arc::clone(&shared.repository);
    let to_save = segment.clone();
    tokio::spawn(async move {
        if let Err(e) = repository.save_transcript_segment(&to_save).await {
            warn!(error = %e, "Failed to persist transcript segment");
        }
    });

    if let Some(batch) = shared.throttle.offer(&segment.text, Instant::now()) {
        tokio::spawn(dispatch_analysis(Arc::clone(shared), batch));
    }
}

fn handle_transport_failure(shared: &Arc<SessionShared>, failure: TransportFailure) {
    warn!(
        consultation_id = %shared.consultation_id,
        error = %failure,
        "Transport failed; leaving recording state"
    );

    shared.capturer.lock().stop();

    let left_recording = {
        let mut state = shared.state.write();
        if *state == RecordingState::Recording {
            *state = RecordingState::Paused;
            true
        } else {
            false
        }
    };

    let _ = shared
        .events_tx
        .send(SessionEvent::TransportFailed(failure.to_string()));
    if left_recording {
        let _ = shared
            .events_tx
            .send(SessionEvent::Recording(RecordingState::Paused));
    }
}

async fn dispatch_analysis(shared: Arc<SessionShared>, text: String) {
    debug!(
        consultation_id = %shared.consultation_id,
        length = text.len(),
        "Dispatching accumulated transcript for analysis"
    );

    match shared
        .annotation
        .analyze(shared.consultation_id, &text)
        .await
    {
        Ok(events) => {
            let mut new_items = 0;
            for event in events {
                let repository = Arc::clone(&shared.repository);
                let to_save = event.clone();
                tokio::spawn(async move {
                    if let Err(e) = repository.save_insight_event(&to_save).await {
                        warn!(error = %e, "Failed to persist insight event");
                    }
                });

                new_items += shared.store.ingest(event);
            }
            let _ = shared
                .events_tx
                .send(SessionEvent::InsightsUpdated { new_items });
        }
        Err(e) => {
            // Annotation is best-effort: log and keep the transcript flowing
            warn!(error = %e, "Annotation analysis failed");
        }
    }

    shared.throttle.complete();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioFrame;
    use annotation_client::{AnnotationResult, InsightEvent};
    use async_trait::async_trait;
    use crate::credentials::StreamCredentials;
    use crate::repository::InMemoryRepository;

    struct FakeCapturer {
        running: bool,
        fail_start: bool,
    }

    impl FakeCapturer {
        fn new() -> Self {
            Self {
                running: false,
                fail_start: false,
            }
        }

        fn failing() -> Self {
            Self {
                running: false,
                fail_start: true,
            }
        }
    }

    impl AudioCapturer for FakeCapturer {
        fn start(&mut self) -> StreamResult<mpsc::Receiver<AudioFrame>> {
            if self.fail_start {
                return Err(StreamError::DeviceUnavailable("no microphone".to_string()));
            }
            if self.running {
                return Err(StreamError::AlreadyStarted);
            }
            self.running = true;
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    struct UnreachableIssuer;

    #[async_trait]
    impl TokenIssuer for UnreachableIssuer {
        async fn issue(&self, _consultation_id: Uuid) -> StreamResult<StreamCredentials> {
            Ok(StreamCredentials {
                url: "ws://127.0.0.1:1/listen".to_string(),
                api_key: "key".to_string(),
            })
        }
    }

    struct NoopAnnotation;

    #[async_trait]
    impl AnnotationClient for NoopAnnotation {
        async fn analyze(
            &self,
            _consultation_id: Uuid,
            _transcript: &str,
        ) -> AnnotationResult<Vec<InsightEvent>> {
            Ok(Vec::new())
        }
    }

    fn controller(capturer: FakeCapturer) -> SessionController {
        let mut config = StreamConfig::default();
        // Long backoff keeps the background worker parked in Reconnecting,
        // so state assertions cannot race a terminal failure; disconnect
        // cancels the pending timer
        config.reconnect.base_delay_ms = 60_000;
        config.reconnect.max_delay_ms = 60_000;

        SessionController::new(
            Uuid::new_v4(),
            config,
            Box::new(capturer),
            Arc::new(UnreachableIssuer),
            Arc::new(NoopAnnotation),
            Arc::new(InMemoryRepository::new()),
        )
    }

    #[tokio::test]
    async fn test_start_pause_resume_end_walk() {
        let mut session = controller(FakeCapturer::new());
        assert_eq!(session.state(), RecordingState::Idle);

        session.start().await.unwrap();
        assert_eq!(session.state(), RecordingState::Recording);

        session.pause().await.unwrap();
        assert_eq!(session.state(), RecordingState::Paused);

        session.resume().await.unwrap();
        assert_eq!(session.state(), RecordingState::Recording);

        session.end().await.unwrap();
        assert_eq!(session.state(), RecordingState::Ended);
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_rejected() {
        let mut session = controller(FakeCapturer::new());

        assert!(matches!(
            session.pause().await,
            Err(StreamError::InvalidTransition(_))
        ));
        assert!(matches!(
            session.resume().await,
            Err(StreamError::InvalidTransition(_))
        ));

        session.start().await.unwrap();
        assert!(session.start().await.is_ok(), "start while recording is a no-op");

        session.end().await.unwrap();
        assert!(matches!(
            session.start().await,
            Err(StreamError::InvalidTransition(_))
        ));
        assert!(session.end().await.is_ok(), "end is idempotent");
        assert_eq!(session.state(), RecordingState::Ended);
    }

    #[tokio::test]
    async fn test_failed_capture_start_reverts_state() {
        let mut session = controller(FakeCapturer::failing());

        let result = session.start().await;
        assert!(matches!(result, Err(StreamError::DeviceUnavailable(_))));
        assert_eq!(session.state(), RecordingState::Idle);
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_end_persists_completion_and_closes_store() {
        let repository = Arc::new(InMemoryRepository::new());
        let mut config = StreamConfig::default();
        config.reconnect.base_delay_ms = 60_000;
        config.reconnect.max_delay_ms = 60_000;

        let mut session = SessionController::new(
            Uuid::new_v4(),
            config,
            Box::new(FakeCapturer::new()),
            Arc::new(UnreachableIssuer),
            Arc::new(NoopAnnotation),
            Arc::clone(&repository) as Arc<dyn ConsultationRepository>,
        );
        let consultation_id = session.consultation_id();

        session.start().await.unwrap();
        session.end().await.unwrap();

        assert!(session.insights().is_closed());
        assert_eq!(
            repository.status(consultation_id).await,
            Some(ConsultationStatus::Completed)
        );
    }
}
