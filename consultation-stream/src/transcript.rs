use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A chunk of transcribed speech
///
/// Final segments are immutable history. Interim segments are provisional
/// live feedback, superseded by the next interim or final segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: Uuid,
    pub consultation_id: Uuid,
    pub text: String,
    pub confidence: Option<f32>,
    pub is_final: bool,
    pub produced_at: DateTime<Utc>,
}

impl TranscriptSegment {
    pub fn new(consultation_id: Uuid, text: String, confidence: Option<f32>, is_final: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            consultation_id,
            text,
            confidence,
            is_final,
            produced_at: Utc::now(),
        }
    }
}

/// Inbound message from the transcription endpoint
///
/// The endpoint speaks a Deepgram-compatible JSON shape: a `Results` message
/// carries one channel with ranked alternatives, plus finality flags.
/// Anything else (metadata, utterance boundaries) is ignored here.
#[derive(Debug, Deserialize)]
pub struct RemoteMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub channel: Option<RemoteChannel>,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub speech_final: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoteChannel {
    #[serde(default)]
    pub alternatives: Vec<RemoteAlternative>,
}

#[derive(Debug, Deserialize)]
pub struct RemoteAlternative {
    #[serde(default)]
    pub transcript: String,
    pub confidence: Option<f32>,
}

impl RemoteMessage {
    /// Parse a raw text frame into a transcript segment.
    ///
    /// Returns `None` for non-result messages, empty transcripts, and
    /// malformed frames; the stream must keep flowing regardless of what
    /// the endpoint sends.
    pub fn into_segment(raw: &str, consultation_id: Uuid) -> Option<TranscriptSegment> {
        let message: RemoteMessage = serde_json::from_str(raw).ok()?;

        if message.kind != "Results" {
            return None;
        }

        let alternative = message.channel?.alternatives.into_iter().next()?;
        let text = alternative.transcript.trim().to_string();
        if text.is_empty() {
            return None;
        }

        let is_final = message.is_final || message.speech_final;
        Some(TranscriptSegment::new(
            consultation_id,
            text,
            alternative.confidence,
            is_final,
        ))
    }
}
