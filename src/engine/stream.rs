//! Streaming state: one [`Generation`] advanced a token per poll.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use llama_runtime::{InferenceMetrics, InferenceTimer};
use llama_tokenizer::StreamEmitter;

use super::Generation;

/// Cancellation handle for a running stream.
///
/// Clones share the flag. The session checks it at the start of each
/// `stream_next`, so a token already being produced is not interrupted.
#[derive(Debug, Clone, Default)]
pub struct StreamCancel {
    flag: Arc<AtomicBool>,
}

impl StreamCancel {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

pub(crate) struct StreamState {
    pub generation: Generation,
    pub emitter: StreamEmitter,
    pub cancel: StreamCancel,
    timer: InferenceTimer,
}

impl StreamState {
    pub fn new(generation: Generation, timer: InferenceTimer) -> Self {
        Self {
            generation,
            emitter: StreamEmitter::new(),
            cancel: StreamCancel::default(),
            timer,
        }
    }

    pub fn mark_token(&mut self) {
        self.timer.mark_token();
    }

    /// Whether `stream_next` would still advance.
    pub fn is_running(&self) -> bool {
        !self.generation.is_finished() && !self.cancel.is_cancelled()
    }

    /// Consume the stream and report its metrics.
    pub fn finish(self) -> InferenceMetrics {
        let reason = self.generation.finish_reason();
        let metrics = self.timer.finish();
        tracing::info!(
            ?reason,
            generated_tokens = metrics.generated_tokens,
            emitted_chars = self.emitter.emitted_chars(),
            "stream finished"
        );
        metrics
    }
}
