//! Live-Consultation Streaming Pipeline
//!
//! The real-time core of a clinician-facing consultation assistant:
//! microphone audio flows out to a streaming transcription endpoint over a
//! resilient WebSocket, finalized transcript text is throttled into an
//! external annotation service, and the resulting clinical insight events
//! are reconciled into a stable, deduplicated review queue the clinician
//! controls.
//!
//! # Architecture
//!
//! ```text
//! AudioCapturer ──frames──▶ TranscriptionTransport ──segments──▶ SessionController
//!                                                                      │
//!                              ThrottleController ◀──final text────────┤
//!                                      │                               │
//!                              AnnotationClient ──events──▶ InsightStore▶ UI
//! ```
//!
//! - **Session controller** — the `idle → recording ⇄ paused → ended` state
//!   machine orchestrating everything below
//! - **Audio capturer** — cpal microphone capture behind a trait, emitting
//!   fixed-size PCM16 frames at 16 kHz
//! - **Transcription transport** — duplex streaming with exponential-backoff
//!   reconnection; frames are dropped (never queued) while not connected
//! - **Throttle controller** — batches final transcript text so the
//!   annotation service is called at a clinically useful cadence, one call
//!   in flight at a time
//! - **Insight store** — append-only event log reconciled into deduplicated
//!   reviewable items whose triage status belongs to the clinician
//!
//! Collaborators the pipeline only ever sees as traits: the annotation
//! service ([`annotation_client::AnnotationClient`]), persistence
//! ([`ConsultationRepository`]), and credential issuance ([`TokenIssuer`]).
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use consultation_stream::{SessionController, StreamConfig, StaticTokenIssuer};
//! use annotation_client::{AnnotationConfig, HttpAnnotationClient};
//! use consultation_stream::InMemoryRepository;
//! use std::sync::Arc;
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StreamConfig::from_env();
//! let issuer = Arc::new(StaticTokenIssuer::from_env(config.audio.sample_rate)?);
//! let annotation = Arc::new(HttpAnnotationClient::new(AnnotationConfig::from_env()?)?);
//! let repository = Arc::new(InMemoryRepository::new());
//!
//! let mut session = SessionController::with_microphone(
//!     Uuid::new_v4(),
//!     config,
//!     issuer,
//!     annotation,
//!     repository,
//! );
//!
//! session.start().await?;
//! // ... clinician consults; pause/resume at will ...
//! session.end().await?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod credentials;
pub mod error;
pub mod insights;
pub mod repository;
pub mod session;
pub mod throttle;
pub mod transcript;
pub mod transport;

pub use audio::*;
pub use config::*;
pub use credentials::*;
pub use error::*;
pub use insights::*;
pub use repository::*;
pub use session::*;
pub use throttle::*;
pub use transcript::*;
pub use transport::*;
