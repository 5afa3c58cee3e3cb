//! # llama-sampling
//!
//! Token selection and stop heuristics for llama-bridge.
//!
//! Supports:
//! - Greedy (argmax) selection over the model vocabulary, lowest index wins ties
//! - Early-stop heuristic on the rendered text (see [`EarlyStop`])

mod stop;

pub use stop::{EarlyStop, MIN_CHARS, MIN_TOKENS};

use llama_engine::TokenId;

/// Sampling error type.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingError {
    InvalidLogits,
}

impl std::fmt::Display for SamplingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplingError::InvalidLogits => write!(f, "Invalid logits array"),
        }
    }
}

impl std::error::Error for SamplingError {}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

/// Index of the largest logit.
///
/// Scans left to right and only replaces the current best on a strictly greater
/// value, so ties resolve to the lowest index and NaN entries are never chosen over
/// a finite one.
pub fn argmax(logits: &[f32]) -> SamplingResult<TokenId> {
    if logits.is_empty() {
        return Err(SamplingError::InvalidLogits);
    }
    let mut best = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (i, &score) in logits.iter().enumerate() {
        if score > best_score {
            best = i;
            best_score = score;
        }
    }
    TokenId::try_from(best).map_err(|_| SamplingError::InvalidLogits)
}

/// Deterministic greedy sampler bound to a vocabulary size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreedySampler {
    n_vocab: usize,
}

impl GreedySampler {
    pub fn new(n_vocab: usize) -> Self {
        Self { n_vocab }
    }

    pub fn n_vocab(&self) -> usize {
        self.n_vocab
    }

    /// Pick the next token from the first `n_vocab` logits.
    ///
    /// Backends may pad the logits row; anything past `n_vocab` is ignored. A row
    /// shorter than the vocabulary is rejected.
    pub fn sample(&self, logits: &[f32]) -> SamplingResult<TokenId> {
        match logits.get(..self.n_vocab) {
            Some(row) => argmax(row),
            None => Err(SamplingError::InvalidLogits),
        }
    }
}
