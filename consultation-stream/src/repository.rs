use crate::error::StreamResult;
use crate::transcript::TranscriptSegment;
use annotation_client::InsightEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persisted lifecycle status of a consultation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    Active,
    Completed,
}

/// Trait for consultation persistence
///
/// Every call here is fire-and-forget from the pipeline's perspective:
/// failures are logged by the caller and never block or roll back the
/// in-memory stream state.
#[async_trait]
pub trait ConsultationRepository: Send + Sync {
    async fn save_transcript_segment(&self, segment: &TranscriptSegment) -> StreamResult<()>;

    async fn save_insight_event(&self, event: &InsightEvent) -> StreamResult<()>;

    async fn update_consultation_status(
        &self,
        consultation_id: Uuid,
        status: ConsultationStatus,
    ) -> StreamResult<()>;
}

/// In-memory repository for tests and embedded use
#[derive(Default)]
pub struct InMemoryRepository {
    segments: RwLock<Vec<TranscriptSegment>>,
    events: RwLock<Vec<InsightEvent>>,
    statuses: RwLock<HashMap<Uuid, ConsultationStatus>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn segments(&self) -> Vec<TranscriptSegment> {
        self.segments.read().await.clone()
    }

    pub async fn events(&self) -> Vec<InsightEvent> {
        self.events.read().await.clone()
    }

    pub async fn status(&self, consultation_id: Uuid) -> Option<ConsultationStatus> {
        self.statuses.read().await.get(&consultation_id).copied()
    }
}

#[async_trait]
impl ConsultationRepository for InMemoryRepository {
    async fn save_transcript_segment(&self, segment: &TranscriptSegment) -> StreamResult<()> {
        self.segments.write().await.push(segment.clone());
        Ok(())
    }

    async fn save_insight_event(&self, event: &InsightEvent) -> StreamResult<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn update_consultation_status(
        &self,
        consultation_id: Uuid,
        status: ConsultationStatus,
    ) -> StreamResult<()> {
        self.statuses.write().await.insert(consultation_id, status);
        Ok(())
    }
}
