//! High-level inference session management.
//!
//! A [`Session`] owns a backend's model and execution context together with the
//! token history mirrored in that context, and exposes one-shot and streaming
//! generation on top of them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use llama_engine::{Backend, ExecutionContext, TokenId};
use llama_kv::RollingWindow;
use llama_runtime::{NoopTelemetry, TelemetryHook};
use llama_tokenizer::{detokenize, detokenize_bytes};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::engine::stream::{StreamCancel, StreamState};
use crate::engine::{FinishReason, Generated, Turn};
use crate::error::{Result, SessionError};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unloaded,
    Idle,
    Streaming,
    Freed,
}

/// Model and context owned by a loaded session.
///
/// Fields drop in declaration order, so the context is always released before the
/// model it was created from.
struct Loaded<B: Backend> {
    context: B::Context,
    model: B::Model,
    path: PathBuf,
}

/// A single-conversation generation session over a fixed-capacity window.
pub struct Session<B: Backend> {
    id: Uuid,
    backend: B,
    config: SessionConfig,
    telemetry: Arc<dyn TelemetryHook>,
    loaded: Option<Loaded<B>>,
    window: RollingWindow,
    stream: Option<StreamState>,
    freed: bool,
}

impl<B: Backend> Session<B> {
    /// Create an unloaded session with the default configuration.
    pub fn new(backend: B) -> Self {
        let config = SessionConfig::default();
        Self {
            id: Uuid::new_v4(),
            backend,
            window: RollingWindow::new(config.window_policy()),
            config,
            telemetry: Arc::new(NoopTelemetry),
            loaded: None,
            stream: None,
            freed: false,
        }
    }

    /// Create an unloaded session, rejecting an invalid configuration.
    pub fn with_config(backend: B, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let mut session = Self::new(backend);
        session.window = RollingWindow::new(config.window_policy());
        session.config = config;
        Ok(session)
    }

    /// Install a telemetry hook, fired on every generation.
    pub fn with_telemetry(mut self, hook: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = hook;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> SessionState {
        match (&self.loaded, &self.stream) {
            (Some(_), Some(stream)) if stream.is_running() => SessionState::Streaming,
            (Some(_), _) => SessionState::Idle,
            (None, _) if self.freed => SessionState::Freed,
            (None, _) => SessionState::Unloaded,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Path of the loaded model.
    pub fn model_path(&self) -> Option<&Path> {
        self.loaded.as_ref().map(|l| l.path.as_path())
    }

    /// Every token currently held in the window, oldest first.
    pub fn history(&self) -> &[TokenId] {
        self.window.history()
    }

    pub fn next_pos(&self) -> usize {
        self.window.next_pos()
    }

    /// Fixed capacity of the loaded context.
    pub fn window_capacity(&self) -> Option<usize> {
        self.loaded.as_ref().map(|l| l.context.window_capacity())
    }

    /// Load a model and create its context.
    ///
    /// An empty path is rejected without touching the current state. Otherwise
    /// anything previously loaded is released first, so a backend failure leaves
    /// the session unloaded.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let _span = tracing::info_span!("session", id = %self.id).entered();

        if path.as_os_str().is_empty() {
            tracing::warn!("load rejected: empty model path");
            return Err(SessionError::InvalidPath);
        }
        self.release();
        self.freed = false;

        let model = self.backend.load_model(path).map_err(|err| {
            tracing::error!(path = %path.display(), error = %err, "model load failed");
            SessionError::ModelLoadFailed(err)
        })?;
        let context = self.backend.new_context(&model).map_err(|err| {
            tracing::error!(path = %path.display(), error = %err, "context init failed");
            SessionError::ContextInitFailed(err)
        })?;

        let capacity = context.window_capacity();
        self.loaded = Some(Loaded {
            context,
            model,
            path: path.to_path_buf(),
        });
        tracing::info!(path = %path.display(), capacity, "model loaded");
        Ok(())
    }

    /// Recreate the context from the loaded model, dropping all history.
    pub fn reset(&mut self) -> Result<()> {
        let _span = tracing::info_span!("session", id = %self.id).entered();

        let Loaded {
            context,
            model,
            path,
        } = self.loaded.take().ok_or(SessionError::NotLoaded)?;
        self.stream = None;
        self.window.clear();
        drop(context);

        match self.backend.new_context(&model) {
            Ok(context) => {
                self.loaded = Some(Loaded {
                    context,
                    model,
                    path,
                });
                tracing::info!("context recreated");
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "context recreation failed; model released");
                Err(SessionError::ContextInitFailed(err))
            }
        }
    }

    /// Empty the window and history, keeping the context.
    pub fn clear_history(&mut self) {
        self.stream = None;
        if let Some(loaded) = self.loaded.as_mut() {
            loaded.context.clear_window();
            self.window.clear();
            tracing::debug!(id = %self.id, "history cleared");
        }
    }

    /// Release the context and model. Safe to call repeatedly.
    pub fn free(&mut self) {
        let _span = tracing::info_span!("session", id = %self.id).entered();
        if self.loaded.is_some() {
            tracing::info!("freeing model and context");
        }
        self.release();
        self.freed = true;
    }

    fn release(&mut self) {
        self.stream = None;
        self.loaded = None;
        self.window.clear();
    }

    fn turn(&mut self) -> Result<Turn<'_, B::Model, B::Context>> {
        let loaded = self.loaded.as_mut().ok_or(SessionError::NotLoaded)?;
        Ok(Turn {
            vocab: &loaded.model,
            ctx: &mut loaded.context,
            window: &mut self.window,
            feeder: self.config.feeder(),
            config: &self.config,
        })
    }

    /// Generate a full response, rendering any failure as `"[error] <description>"`.
    pub fn evaluate(&mut self, prompt: &str, max_tokens: usize) -> String {
        match self.try_evaluate(prompt, max_tokens) {
            Ok(generated) => generated.text,
            Err(err) => format!("[error] {err}"),
        }
    }

    /// Generate a full response. Cancels any running stream first.
    pub fn try_evaluate(&mut self, prompt: &str, max_tokens: usize) -> Result<Generated> {
        let _span = tracing::info_span!("session", id = %self.id).entered();
        self.stream_cancel();

        let hook = Arc::clone(&self.telemetry);
        let mut turn = self.turn()?;
        let (mut generation, mut timer) = turn.prefill(prompt, max_tokens, hook).map_err(|err| {
            tracing::error!(error = %err, "evaluate failed before decoding");
            err
        })?;

        while !generation.is_finished() {
            match generation.step(&mut turn) {
                Ok(Some(_)) => timer.mark_token(),
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(error = %err, "evaluate aborted");
                    return Err(err);
                }
            }
        }

        let text = detokenize(turn.vocab, generation.tokens(), turn.config.detokenize_options())?;
        let finish_reason = generation
            .finish_reason()
            .unwrap_or(FinishReason::Budget);
        let metrics = timer.finish();
        tracing::info!(
            ?finish_reason,
            generated_tokens = generation.tokens().len(),
            next_pos = turn.window.next_pos(),
            "evaluate finished"
        );

        Ok(Generated {
            text,
            tokens: generation.into_tokens(),
            finish_reason,
            metrics,
        })
    }

    /// Start a streaming generation, cancelling any stream already running.
    pub fn stream_begin(&mut self, prompt: &str, max_tokens: usize) -> Result<()> {
        let _span = tracing::info_span!("session", id = %self.id).entered();
        self.stream_cancel();

        let hook = Arc::clone(&self.telemetry);
        let (generation, timer) = self.turn()?.prefill(prompt, max_tokens, hook)?;
        self.stream = Some(StreamState::new(generation, timer));
        tracing::debug!("stream started");
        Ok(())
    }

    /// Advance the stream by one token.
    ///
    /// Returns the newly rendered text, `None` once the stream has finished, was
    /// cancelled, or was never started, and `Err` on an unrecoverable failure, which
    /// also ends the stream.
    ///
    /// The text is empty while a multi-byte character is still incomplete. An empty
    /// delta does not end the stream: keep calling until `None`, or check
    /// [`Session::stream_is_running`].
    pub fn stream_next(&mut self) -> Result<Option<String>> {
        let Some(mut state) = self.stream.take() else {
            return Ok(None);
        };
        let _span = tracing::info_span!("session", id = %self.id).entered();

        if state.cancel.is_cancelled() {
            state.generation.cancel();
            state.finish();
            return Ok(None);
        }
        if state.generation.is_finished() {
            state.finish();
            return Ok(None);
        }

        let mut turn = self.turn()?;
        let token = match state.generation.step(&mut turn) {
            Ok(token) => token,
            Err(err) => {
                tracing::error!(error = %err, "stream aborted");
                state.finish();
                return Err(err);
            }
        };
        if token.is_some() {
            state.mark_token();
        }

        let finished = state.generation.is_finished();
        let opts = turn.config.detokenize_options();
        let rendered = match detokenize_bytes(turn.vocab, state.generation.tokens(), opts) {
            Ok(bytes) => bytes,
            Err(err) => {
                state.finish();
                return Err(err.into());
            }
        };
        let delta = state.emitter.emit(&rendered, finished);

        if token.is_none() && delta.is_empty() {
            state.finish();
            return Ok(None);
        }
        self.stream = Some(state);
        Ok(Some(delta))
    }

    pub fn stream_is_running(&self) -> bool {
        self.stream.as_ref().is_some_and(StreamState::is_running)
    }

    /// Stop the running stream and drop its buffers. No-op without a stream.
    pub fn stream_cancel(&mut self) {
        if let Some(mut state) = self.stream.take() {
            state.generation.cancel();
            state.finish();
            tracing::info!(id = %self.id, "stream cancelled");
        }
    }

    /// A handle that cancels the current stream from elsewhere.
    pub fn stream_cancel_handle(&self) -> Option<StreamCancel> {
        self.stream.as_ref().map(|s| s.cancel.clone())
    }
}

impl<B: Backend> Drop for Session<B> {
    fn drop(&mut self) {
        self.release();
    }
}
