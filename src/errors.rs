// Error handling module
// Contains the pipeline error taxonomy and the crate-wide Result alias

use std::time::Duration;
use thiserror::Error;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An engine or component is unusable as configured; it is dropped
    /// from its candidate list, never fatal for the job
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A speech engine failed; retried, then the next engine is tried
    #[error("speech synthesis error: {0}")]
    Synthesis(String),

    /// A slide image could not be rendered; a placeholder is substituted
    #[error("clip render error: {0}")]
    Render(String),

    /// External media tool exited non-zero or produced missing/undersized output
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// An external call exceeded its deadline; handled like the
    /// corresponding failure kind
    #[error("{0} timed out after {1:?}")]
    Timeout(String, Duration),

    #[error("subtitle generation error: {0}")]
    Subtitle(String),

    #[error("task ledger error: {0}")]
    Ledger(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<&str> for PipelineError {
    fn from(s: &str) -> Self {
        PipelineError::Other(anyhow::anyhow!(s.to_string()))
    }
}

impl From<String> for PipelineError {
    fn from(s: String) -> Self {
        PipelineError::Other(anyhow::anyhow!(s))
    }
}

/// Result type alias for the pipeline
pub type Result<T> = std::result::Result<T, PipelineError>;
