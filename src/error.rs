use crate::pipeline::collector::SourceManifest;
use crate::snapshot::RunId;
use std::time::Duration;
use thiserror::Error;

/// Failures raised by a source adapter while fetching one window.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Transient: network failure, timeout, 5xx, rate limiting. Retried.
    #[error("source '{source_id}' unavailable: {message}")]
    Unavailable { source_id: String, message: String },

    #[error("source '{source_id}' rejected credentials: {message}")]
    Auth { source_id: String, message: String },

    #[error("source '{source_id}' returned an unexpected payload: {message}")]
    Schema { source_id: String, message: String },
}

impl SourceError {
    pub fn unavailable(source_id: &str, message: impl Into<String>) -> Self {
        SourceError::Unavailable {
            source_id: source_id.to_string(),
            message: message.into(),
        }
    }

    pub fn auth(source_id: &str, message: impl Into<String>) -> Self {
        SourceError::Auth {
            source_id: source_id.to_string(),
            message: message.into(),
        }
    }

    pub fn schema(source_id: &str, message: impl Into<String>) -> Self {
        SourceError::Schema {
            source_id: source_id.to_string(),
            message: message.into(),
        }
    }

    /// Only transient unavailability is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Unavailable { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Unavailable { .. } => "unavailable",
            SourceError::Auth { .. } => "auth",
            SourceError::Schema { .. } => "schema",
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing secret: environment variable '{0}' is not set")]
    MissingSecret(String),

    /// The run failed at its deadline. Sources still fetching are failed as
    /// unavailable in `manifest`.
    #[error("Pipeline run {run_id} exceeded its {limit:?} timeout; no snapshot was produced")]
    PipelineTimeout {
        run_id: RunId,
        limit: Duration,
        manifest: SourceManifest,
    },

    #[error("Snapshot store error: {message}")]
    Store { message: String },

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
