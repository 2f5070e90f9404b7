use crate::error::{AnnotationError, AnnotationResult};
use crate::events::InsightEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Annotation service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationConfig {
    /// Base URL of the analysis service
    pub api_url: String,
    pub api_key: Option<String>,
    /// Upper bound on a single analyze call; the live pipeline must never
    /// wait longer than this
    pub timeout_ms: u64,
}

impl AnnotationConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AnnotationResult<Self> {
        let api_url = std::env::var("ANNOTATION_API_URL")
            .map_err(|_| AnnotationError::Config("ANNOTATION_API_URL not set".to_string()))?;

        let api_key = std::env::var("ANNOTATION_API_KEY").ok();

        let timeout_ms = std::env::var("ANNOTATION_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30_000);

        Ok(Self {
            api_url,
            api_key,
            timeout_ms,
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Trait for annotation service clients
#[async_trait]
pub trait AnnotationClient: Send + Sync {
    /// Analyze a span of transcript text and return extracted insight events.
    ///
    /// An empty vec is a normal outcome (nothing clinically relevant in the
    /// span, or the service degraded). Errors are transport-level only.
    async fn analyze(
        &self,
        consultation_id: Uuid,
        transcript: &str,
    ) -> AnnotationResult<Vec<InsightEvent>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest<'a> {
    consultation_id: Uuid,
    transcript: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    events: Vec<InsightEvent>,
}

/// HTTP client for the analyze endpoint
pub struct HttpAnnotationClient {
    config: AnnotationConfig,
    http: reqwest::Client,
}

impl HttpAnnotationClient {
    pub fn new(config: AnnotationConfig) -> AnnotationResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self { config, http })
    }

    fn analyze_url(&self) -> String {
        format!("{}/api/ai/analyze", self.config.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl AnnotationClient for HttpAnnotationClient {
    async fn analyze(
        &self,
        consultation_id: Uuid,
        transcript: &str,
    ) -> AnnotationResult<Vec<InsightEvent>> {
        debug!(
            consultation_id = %consultation_id,
            transcript_len = transcript.len(),
            "Requesting transcript analysis"
        );

        let mut request = self.http.post(self.analyze_url()).json(&AnalyzeRequest {
            consultation_id,
            transcript,
        });

        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            return Err(AnnotationError::Service(status.as_u16()));
        }

        let body = response.text().await?;
        Ok(parse_analyze_response(&body))
    }
}

/// Decode an analyze response body, degrading to an empty event list on any
/// malformed payload. Analysis output quality varies; a bad batch must not
/// take the consultation down with it.
pub fn parse_analyze_response(body: &str) -> Vec<InsightEvent> {
    match serde_json::from_str::<AnalyzeResponse>(body) {
        Ok(response) => response.events,
        Err(e) => {
            warn!(error = %e, "Malformed analyze response, treating as empty");
            Vec::new()
        }
    }
}
