use crate::error::{StreamError, StreamResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Short-lived credentials for one transcription connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamCredentials {
    /// Fully-parameterized WebSocket URL
    pub url: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

/// Trait for connection credential issuers
///
/// Issuance failure is a configuration problem, not a transient one: a
/// missing or rejected key will not heal by retrying, so the transport
/// treats it as terminal.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, consultation_id: Uuid) -> StreamResult<StreamCredentials>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest {
    consultation_id: Uuid,
}

/// Fetches per-consultation credentials from a token-issuing service
pub struct HttpTokenIssuer {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpTokenIssuer {
    pub fn new(endpoint: String) -> StreamResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self { endpoint, http })
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue(&self, consultation_id: Uuid) -> StreamResult<StreamCredentials> {
        debug!(consultation_id = %consultation_id, "Requesting transcription credentials");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&TokenRequest { consultation_id })
            .send()
            .await
            .map_err(|e| StreamError::Configuration(format!("token endpoint unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(StreamError::Configuration(format!(
                "token endpoint returned status {}",
                response.status()
            )));
        }

        let credentials: StreamCredentials = response
            .json()
            .await
            .map_err(|e| StreamError::Configuration(format!("malformed token response: {e}")))?;

        if credentials.api_key.is_empty() {
            return Err(StreamError::Configuration(
                "transcription API key not configured".to_string(),
            ));
        }

        Ok(credentials)
    }
}

/// Issues a fixed credential from configuration, for deployments without a
/// token service. Builds the endpoint URL with the standard streaming
/// parameters (linear16 mono at the configured rate).
pub struct StaticTokenIssuer {
    base_url: String,
    api_key: String,
    sample_rate: u32,
}

impl StaticTokenIssuer {
    pub fn new(base_url: String, api_key: String, sample_rate: u32) -> Self {
        Self {
            base_url,
            api_key,
            sample_rate,
        }
    }

    /// Load from environment variables
    pub fn from_env(sample_rate: u32) -> StreamResult<Self> {
        let base_url = std::env::var("TRANSCRIBE_WS_URL")
            .unwrap_or_else(|_| "wss://api.deepgram.com/v1/listen".to_string());

        let api_key = std::env::var("TRANSCRIBE_API_KEY").map_err(|_| {
            StreamError::Configuration("TRANSCRIBE_API_KEY not configured".to_string())
        })?;

        Ok(Self::new(base_url, api_key, sample_rate))
    }
}

#[async_trait]
impl TokenIssuer for StaticTokenIssuer {
    async fn issue(&self, _consultation_id: Uuid) -> StreamResult<StreamCredentials> {
        if self.api_key.is_empty() {
            return Err(StreamError::Configuration(
                "transcription API key not configured".to_string(),
            ));
        }

        let url = format!(
            "{}?model=nova-2&language=en&punctuate=true&interim_results=true&endpointing=300&encoding=linear16&sample_rate={}&channels=1",
            self.base_url, self.sample_rate
        );

        Ok(StreamCredentials {
            url,
            api_key: self.api_key.clone(),
        })
    }
}
