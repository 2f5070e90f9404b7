//! Shared test support: a local transcription endpoint and scripted
//! collaborators, so the pipeline runs end-to-end without real services.

use async_trait::async_trait;
use consultation_stream::{StreamCredentials, StreamError, StreamResult, TokenIssuer};
use std::time::Duration;
use tokio::net::TcpListener;
use uuid::Uuid;

/// Bind a local listener and return it with its `ws://` URL
pub async fn bind_endpoint() -> (TcpListener, String) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    (listener, format!("ws://{addr}/listen"))
}

/// Honor RUST_LOG in test runs; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Deepgram-shaped results frame
pub fn results_frame(transcript: &str, is_final: bool) -> String {
    serde_json::json!({
        "type": "Results",
        "channel": { "alternatives": [{ "transcript": transcript, "confidence": 0.9 }] },
        "is_final": is_final,
        "speech_final": false,
    })
    .to_string()
}

/// Issues credentials pointing at a local test endpoint
pub struct TestIssuer {
    pub url: String,
}

#[async_trait]
impl TokenIssuer for TestIssuer {
    async fn issue(&self, _consultation_id: Uuid) -> StreamResult<StreamCredentials> {
        Ok(StreamCredentials {
            url: self.url.clone(),
            api_key: "test-key".to_string(),
        })
    }
}

/// Issuer with a permanent configuration problem
pub struct BrokenIssuer;

#[async_trait]
impl TokenIssuer for BrokenIssuer {
    async fn issue(&self, _consultation_id: Uuid) -> StreamResult<StreamCredentials> {
        Err(StreamError::Configuration(
            "transcription API key not configured".to_string(),
        ))
    }
}

/// Poll `condition` until it holds or the timeout elapses
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
