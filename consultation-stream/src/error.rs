use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio capture already started")]
    AlreadyStarted,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport has been disconnected and cannot be reused")]
    TransportClosed,

    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Annotation service error: {0}")]
    AnnotationService(#[from] annotation_client::AnnotationError),

    #[error("Repository write failed: {0}")]
    RepositoryWrite(String),

    #[error("Invalid session transition: {0}")]
    InvalidTransition(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StreamResult<T> = Result<T, StreamError>;
