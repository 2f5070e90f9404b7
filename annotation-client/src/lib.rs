//! Annotation Service Client for Clinical Consultations
//!
//! Turns a span of consultation transcript into structured clinical insight
//! events by calling an external analysis service. The service itself (LLM
//! prompting, document generation) is a black box behind a single
//! request/response contract; this crate owns the client side of that
//! contract.
//!
//! # Design
//!
//! - **Best-effort**: every call carries a bounded timeout. A slow or broken
//!   analysis service must never stall the live transcript pipeline, so
//!   callers are expected to log failures and continue.
//! - **Degrade, never abort**: malformed response payloads produce an empty
//!   event list rather than an error. Only transport-level failures
//!   (network, timeout, non-2xx) surface as errors.
//! - **Clinician review model**: the service suggests, it never decides.
//!   Events are immutable facts about what the service extracted; triage
//!   status lives downstream in the consultation pipeline.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use annotation_client::{AnnotationClient, AnnotationConfig, HttpAnnotationClient};
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AnnotationConfig::from_env()?;
//! let client = HttpAnnotationClient::new(config)?;
//!
//! let events = client
//!     .analyze(Uuid::new_v4(), "Patient reports chest pain for two days...")
//!     .await?;
//!
//! println!("{} insight events", events.len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod events;

pub use client::*;
pub use error::*;
pub use events::*;
