//! # llama-engine
//!
//! The "narrow waist" of the llama-bridge stack. Defines the contracts the session
//! core consumes from a model runtime, so that a llama.cpp binding, a CPU reference
//! model, or a scripted mock can be swapped without touching the core.
//!
//! ## Design Notes
//!
//! ### Vocabulary vs. execution context
//! Tokenization and end-of-generation detection belong to the loaded model
//! ([`Vocab`]); decoding and logits belong to the execution context
//! ([`ExecutionContext`]). A [`Backend`] builds both. Contexts can be recreated
//! from the same model without reloading weights.
//!
//! ### Token Type
//! `TokenId` is aliased as `i32` for FFI compatibility, though token IDs are logically
//! non-negative.
//!
//! ### Two-phase buffer sizing
//! [`Vocab::tokenize_into`] and [`Vocab::detokenize_into`] mirror the C convention of
//! "call with a too-small buffer, learn the required size, call again". The contract
//! is kept explicit here instead of being hidden behind `Vec`-returning methods,
//! because the growth policy is decided by the caller (see `llama-tokenizer`).

use std::path::Path;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Token ID type (i32 for FFI compat; logically non-negative).
pub type TokenId = i32;

/// Sequence identifier carried by every batch entry.
pub type SeqId = i32;

/// Errors reported by a runtime backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),
    #[error("context initialization failed: {0}")]
    ContextInit(String),
    #[error("decode failed with status {status}: {message}")]
    Decode { status: i32, message: String },
}

impl RuntimeError {
    pub fn decode(status: i32, message: impl Into<String>) -> Self {
        RuntimeError::Decode {
            status,
            message: message.into(),
        }
    }
}

/// Outcome of a single sizing-protocol call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFill {
    /// `n` elements were written to the output buffer.
    Written(usize),
    /// The output buffer was too small; `required` elements are needed.
    NeedsLargerBuffer(usize),
}

/// One entry of a [`Batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub token: TokenId,
    pub pos: usize,
    pub seq_id: SeqId,
    pub logits: bool,
}

/// A decode unit: parallel arrays of token, position, sequence id and logits flag.
///
/// Entries are appended in order and the positions are absolute timesteps in the
/// execution window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    tokens: Vec<TokenId>,
    positions: Vec<usize>,
    seq_ids: Vec<SeqId>,
    logits: Vec<bool>,
}

impl Batch {
    pub fn with_capacity(n_tokens: usize) -> Self {
        Self {
            tokens: Vec::with_capacity(n_tokens),
            positions: Vec::with_capacity(n_tokens),
            seq_ids: Vec::with_capacity(n_tokens),
            logits: Vec::with_capacity(n_tokens),
        }
    }

    /// Build a one-token batch that requests logits (the decode-step shape).
    pub fn single(token: TokenId, pos: usize, seq_id: SeqId) -> Self {
        let mut batch = Self::with_capacity(1);
        batch.push(token, pos, seq_id, true);
        batch
    }

    pub fn push(&mut self, token: TokenId, pos: usize, seq_id: SeqId, logits: bool) {
        self.tokens.push(token);
        self.positions.push(pos);
        self.seq_ids.push(seq_id);
        self.logits.push(logits);
    }

    /// Reset to empty, keeping the allocation for reuse.
    pub fn clear(&mut self) {
        self.tokens.clear();
        self.positions.clear();
        self.seq_ids.clear();
        self.logits.clear();
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    pub fn seq_ids(&self) -> &[SeqId] {
        &self.seq_ids
    }

    pub fn logits(&self) -> &[bool] {
        &self.logits
    }

    pub fn get(&self, index: usize) -> Option<BatchEntry> {
        Some(BatchEntry {
            token: *self.tokens.get(index)?,
            pos: self.positions[index],
            seq_id: self.seq_ids[index],
            logits: self.logits[index],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = BatchEntry> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Index of the entry that requests logits last, if any.
    pub fn last_logits_index(&self) -> Option<usize> {
        self.logits.iter().rposition(|&l| l)
    }
}

/// Vocabulary operations provided by a loaded model.
pub trait Vocab {
    /// Tokenize `text` into `out`.
    ///
    /// Returns [`BufferFill::NeedsLargerBuffer`] when `out` is too small; the caller
    /// must retry with at least the reported size. `add_special` prepends BOS-style
    /// markers; `parse_special` lets control tokens written as text be recognised.
    fn tokenize_into(
        &self,
        text: &str,
        out: &mut [TokenId],
        add_special: bool,
        parse_special: bool,
    ) -> BufferFill;

    /// Render `tokens` as UTF-8 bytes into `out`, with the same sizing contract as
    /// [`Vocab::tokenize_into`].
    fn detokenize_into(
        &self,
        tokens: &[TokenId],
        out: &mut [u8],
        remove_special: bool,
        unparse_special: bool,
    ) -> BufferFill;

    /// Vocabulary size; valid token ids are `[0, n_vocab)`.
    fn n_vocab(&self) -> usize;

    /// Whether sampling `token` ends the response.
    fn is_end_of_generation(&self, token: TokenId) -> bool;
}

/// A fixed-capacity execution window (the KV cache of one context).
pub trait ExecutionContext {
    /// Advance the window's state with `batch`. Synchronous.
    fn decode(&mut self, batch: &Batch) -> Result<()>;

    /// Logits for the most recent entry that requested them.
    ///
    /// `None` when the last decode did not request logits.
    fn last_logits(&self) -> Option<&[f32]>;

    /// Fixed token capacity (`n_ctx`).
    fn window_capacity(&self) -> usize;

    /// Drop all cached state.
    fn clear_window(&mut self);
}

/// Builds models and execution contexts.
///
/// Handles returned by a backend release their resources on drop; callers never
/// free them manually.
pub trait Backend {
    type Model: Vocab;
    type Context: ExecutionContext;

    fn load_model(&self, path: &Path) -> Result<Self::Model>;

    fn new_context(&self, model: &Self::Model) -> Result<Self::Context>;
}
