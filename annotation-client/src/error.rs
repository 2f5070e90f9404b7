use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Analysis service returned status {0}")]
    Service(u16),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AnnotationResult<T> = Result<T, AnnotationError>;
