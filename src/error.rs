use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the tutor pipeline and its adapters
#[derive(Error, Debug)]
pub enum TutorError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("Failed to create Redis pool: {0}")]
    PoolCreation(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("{stage} timed out after {}ms", after.as_millis())]
    Timeout { stage: &'static str, after: Duration },

    #[error("{0} was cancelled")]
    Cancelled(&'static str),

    #[error("Completion provider returned an empty answer")]
    EmptyCompletion,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TutorError {
    /// True for deadline or cancellation failures
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, TutorError>;
