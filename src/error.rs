//! Error types for the llama-bridge crate.

use llama_engine::RuntimeError;
use llama_kv::{FeedError, WindowError};
use llama_sampling::SamplingError;
use llama_tokenizer::TokenizerError;
use thiserror::Error;

/// Top-level error type for session operations.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid model path: path is empty")]
    InvalidPath,

    #[error("no model loaded")]
    NotLoaded,

    #[error("model load failed: {0}")]
    ModelLoadFailed(#[source] RuntimeError),

    #[error("context init failed: {0}")]
    ContextInitFailed(#[source] RuntimeError),

    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),

    #[error("prompt produced no tokens")]
    EmptyPrompt,

    #[error("context overflow: need {needed} tokens, capacity {capacity}")]
    Overflow { needed: usize, capacity: usize },

    #[error("window rebuild failed: {0}")]
    Rebuild(#[source] FeedError),

    #[error("prompt decode failed: {0}")]
    PromptDecode(#[source] FeedError),

    #[error("logits unavailable after decode")]
    LogitsUnavailable,

    #[error("sampling error: {0}")]
    Sampling(#[from] SamplingError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<WindowError> for SessionError {
    fn from(err: WindowError) -> Self {
        match err {
            WindowError::Overflow { needed, capacity } => SessionError::Overflow { needed, capacity },
            WindowError::Rebuild(feed) => SessionError::Rebuild(feed),
        }
    }
}

/// Errors from loading or validating a [`SessionConfig`](crate::SessionConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("keep_fraction must be in (0, 1], got {0}")]
    KeepFraction(f64),

    #[error("chunk_size must be at least 1")]
    ChunkSize,
}

pub type Result<T> = std::result::Result<T, SessionError>;
