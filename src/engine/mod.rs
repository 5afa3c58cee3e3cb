//! Greedy generation engine.
//!
//! Manages the two phases of a turn against a bounded window:
//! - **Prefill**: tokenize the prompt, make room in the rolling window, and feed the
//!   prompt in chunks with logits requested on its last token.
//! - **Decode**: [`Generation::step`] samples one token by argmax, feeds it back, and
//!   decides whether to stop.
//!
//! One-shot evaluation and streaming both drive the same `step`, so a stream's
//! deltas always add up to what `evaluate` would have returned.

pub mod stream;

use std::sync::Arc;

use llama_engine::{ExecutionContext, TokenId, Vocab};
use llama_kv::{BatchFeeder, CapacityOutcome, RollingWindow};
use llama_runtime::{InferenceMetrics, InferenceTimer, TelemetryHook};
use llama_sampling::GreedySampler;
use llama_tokenizer::detokenize;

use crate::config::SessionConfig;
use crate::error::{Result, SessionError};

/// Why a generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The model sampled an end-of-generation token.
    EndOfGeneration,
    /// The early-stop heuristic fired.
    Heuristic,
    /// `max_tokens` were produced.
    Budget,
    /// Feeding a generated token back failed; output up to that token is kept.
    DecodeError,
    /// The stream was cancelled.
    Cancelled,
}

/// Result of a completed one-shot generation.
#[derive(Debug, Clone)]
pub struct Generated {
    pub text: String,
    pub tokens: Vec<TokenId>,
    pub finish_reason: FinishReason,
    pub metrics: InferenceMetrics,
}

/// Everything a turn needs from the session, borrowed for its duration.
pub(crate) struct Turn<'a, V: ?Sized, C: ?Sized> {
    pub vocab: &'a V,
    pub ctx: &'a mut C,
    pub window: &'a mut RollingWindow,
    pub config: &'a SessionConfig,
    pub feeder: BatchFeeder,
}

impl<V, C> Turn<'_, V, C>
where
    V: Vocab + ?Sized,
    C: ExecutionContext + ?Sized,
{
    /// Tokenize and feed `prompt`, leaving the prompt's last logits in the context.
    ///
    /// A failed prompt feed may leave some chunks in the window, so the window and
    /// history are both emptied to stay in agreement.
    pub fn prefill(
        &mut self,
        prompt: &str,
        max_tokens: usize,
        hook: Arc<dyn TelemetryHook>,
    ) -> Result<(Generation, InferenceTimer)> {
        let max_tokens = max_tokens.max(1);
        let opts = self.config.tokenize_options(self.window.is_empty());
        let tokens = llama_tokenizer::tokenize(self.vocab, prompt, opts)?;
        if tokens.is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        let mut timer = InferenceTimer::new(tokens.len(), hook);
        let outcome =
            self.window
                .ensure_capacity(&mut *self.ctx, &self.feeder, tokens.len(), max_tokens)?;
        if let CapacityOutcome::Evicted { dropped, kept } = outcome {
            timer.mark_eviction(dropped, kept);
        }

        let start = self.window.next_pos();
        if let Err(err) = self.feeder.feed(&mut *self.ctx, &tokens, start, true) {
            tracing::error!(error = %err, "prompt feed failed; window emptied");
            self.ctx.clear_window();
            self.window.clear();
            return Err(SessionError::PromptDecode(err));
        }
        self.window.commit(&tokens);
        timer.mark_prefill_complete();

        tracing::debug!(
            prompt_tokens = tokens.len(),
            next_pos = self.window.next_pos(),
            max_tokens,
            "prompt fed"
        );
        Ok((Generation::new(max_tokens), timer))
    }
}

/// Decode-loop state for one response.
#[derive(Debug, Clone)]
pub(crate) struct Generation {
    max_tokens: usize,
    generated: Vec<TokenId>,
    finish: Option<FinishReason>,
}

impl Generation {
    /// `max_tokens` is clamped to at least 1.
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
            generated: Vec::new(),
            finish: None,
        }
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.generated
    }

    pub fn into_tokens(self) -> Vec<TokenId> {
        self.generated
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish
    }

    pub fn is_finished(&self) -> bool {
        self.finish.is_some()
    }

    pub fn cancel(&mut self) {
        self.finish.get_or_insert(FinishReason::Cancelled);
    }

    /// Advance by one token.
    ///
    /// Returns the token appended to the output, or `None` when the step ended the
    /// generation without producing one (end-of-generation, or already finished).
    /// A failure to feed the new token back is not an error: the token is kept in
    /// the output, left out of the history, and the generation ends.
    pub fn step<V, C>(&mut self, turn: &mut Turn<'_, V, C>) -> Result<Option<TokenId>>
    where
        V: Vocab + ?Sized,
        C: ExecutionContext + ?Sized,
    {
        if self.finish.is_some() {
            return Ok(None);
        }
        if self.generated.len() >= self.max_tokens {
            self.finish = Some(FinishReason::Budget);
            return Ok(None);
        }

        let logits = turn
            .ctx
            .last_logits()
            .ok_or(SessionError::LogitsUnavailable)?;
        let token = GreedySampler::new(turn.vocab.n_vocab()).sample(logits)?;

        if turn.vocab.is_end_of_generation(token) {
            self.finish = Some(FinishReason::EndOfGeneration);
            return Ok(None);
        }

        self.generated.push(token);
        let pos = turn.window.next_pos();
        if let Err(err) = turn.feeder.feed(&mut *turn.ctx, &[token], pos, true) {
            tracing::warn!(error = %err, pos, "generated token feed failed; stopping");
            self.finish = Some(FinishReason::DecodeError);
            return Ok(Some(token));
        }
        turn.window.push(token);

        if self.generated.len() >= self.max_tokens {
            self.finish = Some(FinishReason::Budget);
        } else if turn.config.early_stop.enabled {
            let text = detokenize(turn.vocab, &self.generated, turn.config.detokenize_options())?;
            if turn.config.early_stop.should_stop(&text, self.generated.len()) {
                self.finish = Some(FinishReason::Heuristic);
            }
        }
        Ok(Some(token))
    }
}
