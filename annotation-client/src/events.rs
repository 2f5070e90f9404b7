use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of insight extracted from a transcript span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    /// Cumulative entity extraction (symptoms, relevant negatives)
    Entities,
    /// Suggested follow-up questions for the clinician
    FollowUp,
    /// Safety considerations that warrant attention
    RedFlag,
}

/// A single insight event produced by the analysis service
///
/// Events are immutable once created. Repeated analysis of overlapping
/// transcript text will often re-extract the same finding; collapsing those
/// into one reviewable item is the consumer's job, not this crate's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightEvent {
    pub id: Uuid,
    pub consultation_id: Uuid,
    #[serde(rename = "event_type")]
    pub kind: InsightKind,
    /// Kind-specific payload, kept as raw JSON to survive unknown fields.
    /// Use the typed accessors for lenient decoding.
    #[serde(rename = "content")]
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl InsightEvent {
    pub fn new(consultation_id: Uuid, kind: InsightKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            consultation_id,
            kind,
            payload,
            created_at: Utc::now(),
        }
    }

    /// Decode the payload as entity extraction state.
    ///
    /// Returns `None` when the event is not an `entities` event or the
    /// payload does not decode; missing fields default to empty.
    pub fn entities(&self) -> Option<EntitiesPayload> {
        if self.kind != InsightKind::Entities {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Decode the payload as follow-up question suggestions.
    pub fn follow_ups(&self) -> Option<FollowUpPayload> {
        if self.kind != InsightKind::FollowUp {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Decode the payload as safety flags.
    pub fn red_flags(&self) -> Option<RedFlagPayload> {
        if self.kind != InsightKind::RedFlag {
            return None;
        }
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// Symptom mentioned in the consultation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymptomEntity {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

/// Cumulative entity extraction state for a consultation
///
/// Entities are a snapshot, not discrete recommendations: each new event
/// supersedes the previous one entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitiesPayload {
    #[serde(default)]
    pub symptoms: Vec<SymptomEntity>,
    /// Relevant negatives ("no fever", "no shortness of breath")
    #[serde(default)]
    pub negatives: Vec<String>,
}

/// Priority assigned to a suggested follow-up question
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionPriority {
    High,
    #[default]
    Medium,
    Low,
}

/// A follow-up question the clinician may want to ask
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpQuestion {
    #[serde(default = "default_category")]
    pub category: String,
    pub question: String,
    #[serde(default)]
    pub priority: QuestionPriority,
}

fn default_category() -> String {
    "General".to_string()
}

/// Payload of a `follow_up` event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FollowUpPayload {
    #[serde(default)]
    pub questions: Vec<FollowUpQuestion>,
}

/// Severity of a safety consideration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagSeverity {
    Critical,
    Warning,
    #[default]
    Info,
}

/// A single safety consideration raised by the analysis service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedFlag {
    pub description: String,
    #[serde(default)]
    pub severity: FlagSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Payload of a `red_flag` event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedFlagPayload {
    #[serde(default)]
    pub flags: Vec<RedFlag>,
}
