//! Bounded-context generation sessions.
//!
//! A [`Session`] drives greedy generation against a backend whose execution window
//! holds a fixed number of tokens. It keeps the conversation history in step with the
//! window, evicts the oldest history when a turn would not fit, and offers one-shot
//! ([`Session::evaluate`]) and streaming ([`Session::stream_next`]) output.
//!
//! Backends plug in through the [`llama_engine`] traits; `llama_runtime::MockBackend`
//! is a scripted one for tests and demos.

pub mod config;
pub mod engine;
pub mod error;
pub mod session;

pub use config::SessionConfig;
pub use engine::stream::StreamCancel;
pub use engine::{FinishReason, Generated};
pub use error::{ConfigError, Result, SessionError};
pub use session::{Session, SessionState};

pub use llama_engine::{Backend, TokenId};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
