//! Deterministic scripted backend.
//!
//! The vocabulary is byte-level: `BOS = 0`, `EOS = 1`, and byte `b` is token
//! `b + 2`. Next-token logits come from a shared script; an exhausted script yields
//! EOS. The context validates positions the way a real KV cache would (contiguous,
//! bounded by `n_ctx`), and every call is recorded so tests can inspect what the
//! session fed.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use llama_engine::{
    Backend, Batch, BufferFill, ExecutionContext, Result, RuntimeError, TokenId, Vocab,
};

pub const BOS: TokenId = 0;
pub const EOS: TokenId = 1;
pub const N_VOCAB: usize = 256 + 2;

const BYTE_OFFSET: TokenId = 2;
const BOS_TEXT: &str = "<s>";
const EOS_TEXT: &str = "</s>";

/// Token id for a raw byte.
pub fn byte_token(b: u8) -> TokenId {
    b as TokenId + BYTE_OFFSET
}

/// Tokens for `text` without special markers.
pub fn text_tokens(text: &str) -> Vec<TokenId> {
    text.bytes().map(byte_token).collect()
}

/// One entry of the logits script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    /// Produce logits whose argmax is this token.
    Emit(TokenId),
    /// Accept the decode but leave no logits behind.
    WithholdLogits,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<ScriptStep>,
    decode_calls: usize,
    fail_decode_at: Option<usize>,
    batches: Vec<Batch>,
    clears: usize,
    contexts_created: usize,
    contexts_dropped: usize,
    models_loaded: usize,
    models_dropped: usize,
    releases: Vec<&'static str>,
    tokenize_buffers: Vec<usize>,
    detokenize_buffers: Vec<usize>,
    fail_model_load: bool,
    fail_context_init: bool,
}

/// Shared control and inspection handle for a [`MockBackend`].
///
/// Cloning the handle shares the same state, so a test can keep one while the
/// session owns the backend.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `text` as the next generated bytes.
    pub fn push_reply(&self, text: &str) {
        self.push_tokens(&text_tokens(text));
    }

    pub fn push_tokens(&self, tokens: &[TokenId]) {
        self.state()
            .script
            .extend(tokens.iter().map(|&t| ScriptStep::Emit(t)));
    }

    pub fn push_step(&self, step: ScriptStep) {
        self.state().script.push_back(step);
    }

    pub fn clear_script(&self) {
        self.state().script.clear();
    }

    pub fn script_len(&self) -> usize {
        self.state().script.len()
    }

    /// Fail the decode call with this zero-based index (counted across contexts).
    pub fn fail_decode_at(&self, call: usize) {
        self.state().fail_decode_at = Some(call);
    }

    pub fn set_fail_model_load(&self, fail: bool) {
        self.state().fail_model_load = fail;
    }

    pub fn set_fail_context_init(&self, fail: bool) {
        self.state().fail_context_init = fail;
    }

    pub fn decode_calls(&self) -> usize {
        self.state().decode_calls
    }

    /// Every batch passed to `decode`, including failed ones.
    pub fn batches(&self) -> Vec<Batch> {
        self.state().batches.clone()
    }

    pub fn clear_batches(&self) {
        self.state().batches.clear();
    }

    pub fn clears(&self) -> usize {
        self.state().clears
    }

    pub fn contexts_created(&self) -> usize {
        self.state().contexts_created
    }

    pub fn contexts_dropped(&self) -> usize {
        self.state().contexts_dropped
    }

    pub fn models_loaded(&self) -> usize {
        self.state().models_loaded
    }

    pub fn models_dropped(&self) -> usize {
        self.state().models_dropped
    }

    /// `"context"` / `"model"` in the order handles were dropped.
    pub fn releases(&self) -> Vec<&'static str> {
        self.state().releases.clone()
    }

    /// Output buffer sizes seen by `tokenize_into`, in call order.
    pub fn tokenize_buffer_sizes(&self) -> Vec<usize> {
        self.state().tokenize_buffers.clone()
    }

    /// Output buffer sizes seen by `detokenize_into`, in call order.
    pub fn detokenize_buffer_sizes(&self) -> Vec<usize> {
        self.state().detokenize_buffers.clone()
    }

    fn next_step(&self) -> ScriptStep {
        self.state()
            .script
            .pop_front()
            .unwrap_or(ScriptStep::Emit(EOS))
    }
}

/// Scripted backend with a fixed window capacity.
#[derive(Debug, Clone)]
pub struct MockBackend {
    n_ctx: usize,
    handle: MockHandle,
}

impl MockBackend {
    pub fn new(n_ctx: usize) -> Self {
        Self {
            n_ctx,
            handle: MockHandle::default(),
        }
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl Backend for MockBackend {
    type Model = MockModel;
    type Context = MockContext;

    fn load_model(&self, path: &Path) -> Result<MockModel> {
        let mut state = self.handle.state();
        if state.fail_model_load {
            return Err(RuntimeError::ModelLoad(format!(
                "cannot read model file {}",
                path.display()
            )));
        }
        state.models_loaded += 1;
        tracing::debug!(path = %path.display(), "mock model loaded");
        Ok(MockModel {
            path: path.to_path_buf(),
            handle: self.handle.clone(),
        })
    }

    fn new_context(&self, _model: &MockModel) -> Result<MockContext> {
        let mut state = self.handle.state();
        if state.fail_context_init || self.n_ctx == 0 {
            return Err(RuntimeError::ContextInit(format!(
                "cannot allocate KV cache for n_ctx={}",
                self.n_ctx
            )));
        }
        state.contexts_created += 1;
        Ok(MockContext {
            n_ctx: self.n_ctx,
            cells: Vec::with_capacity(self.n_ctx),
            logits: None,
            handle: self.handle.clone(),
        })
    }
}

/// Byte-level vocabulary of a mock model.
#[derive(Debug)]
pub struct MockModel {
    path: PathBuf,
    handle: MockHandle,
}

impl MockModel {
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn encode(text: &str, add_special: bool, parse_special: bool) -> Vec<TokenId> {
        let mut ids = Vec::with_capacity(text.len() + 1);
        if add_special {
            ids.push(BOS);
        }
        let mut rest = text.as_bytes();
        while let Some((&b, tail)) = rest.split_first() {
            if parse_special {
                if let Some(after) = rest.strip_prefix(EOS_TEXT.as_bytes()) {
                    ids.push(EOS);
                    rest = after;
                    continue;
                }
                if let Some(after) = rest.strip_prefix(BOS_TEXT.as_bytes()) {
                    ids.push(BOS);
                    rest = after;
                    continue;
                }
            }
            ids.push(byte_token(b));
            rest = tail;
        }
        ids
    }

    fn render(tokens: &[TokenId], remove_special: bool, unparse_special: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(tokens.len());
        for &token in tokens {
            match token {
                BOS | EOS => {
                    if unparse_special && !remove_special {
                        let marker = if token == BOS { BOS_TEXT } else { EOS_TEXT };
                        out.extend_from_slice(marker.as_bytes());
                    }
                }
                t if (BYTE_OFFSET..N_VOCAB as TokenId).contains(&t) => {
                    out.push((t - BYTE_OFFSET) as u8);
                }
                _ => {}
            }
        }
        out
    }
}

impl Drop for MockModel {
    fn drop(&mut self) {
        let mut state = self.handle.state();
        state.models_dropped += 1;
        state.releases.push("model");
    }
}

impl Vocab for MockModel {
    fn tokenize_into(
        &self,
        text: &str,
        out: &mut [TokenId],
        add_special: bool,
        parse_special: bool,
    ) -> BufferFill {
        self.handle.state().tokenize_buffers.push(out.len());
        let ids = Self::encode(text, add_special, parse_special);
        if out.len() < ids.len() {
            return BufferFill::NeedsLargerBuffer(ids.len());
        }
        out[..ids.len()].copy_from_slice(&ids);
        BufferFill::Written(ids.len())
    }

    fn detokenize_into(
        &self,
        tokens: &[TokenId],
        out: &mut [u8],
        remove_special: bool,
        unparse_special: bool,
    ) -> BufferFill {
        self.handle.state().detokenize_buffers.push(out.len());
        let bytes = Self::render(tokens, remove_special, unparse_special);
        if out.len() < bytes.len() {
            return BufferFill::NeedsLargerBuffer(bytes.len());
        }
        out[..bytes.len()].copy_from_slice(&bytes);
        BufferFill::Written(bytes.len())
    }

    fn n_vocab(&self) -> usize {
        N_VOCAB
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        token == EOS
    }
}

/// Execution window of a mock model.
#[derive(Debug)]
pub struct MockContext {
    n_ctx: usize,
    cells: Vec<TokenId>,
    logits: Option<Vec<f32>>,
    handle: MockHandle,
}

impl MockContext {
    /// Tokens currently held in the window, by position.
    pub fn cells(&self) -> &[TokenId] {
        &self.cells
    }

    fn one_hot(token: TokenId) -> Vec<f32> {
        let mut logits = vec![0.0; N_VOCAB];
        if let Some(slot) = usize::try_from(token).ok().and_then(|i| logits.get_mut(i)) {
            *slot = 1.0;
        }
        logits
    }
}

impl Drop for MockContext {
    fn drop(&mut self) {
        let mut state = self.handle.state();
        state.contexts_dropped += 1;
        state.releases.push("context");
    }
}

impl ExecutionContext for MockContext {
    fn decode(&mut self, batch: &Batch) -> Result<()> {
        {
            let mut state = self.handle.state();
            let call = state.decode_calls;
            state.decode_calls += 1;
            state.batches.push(batch.clone());
            if state.fail_decode_at == Some(call) {
                state.fail_decode_at = None;
                return Err(RuntimeError::decode(2, format!("injected failure on call {call}")));
            }
        }

        if batch.is_empty() {
            return Err(RuntimeError::decode(-1, "empty batch"));
        }
        for (offset, entry) in batch.iter().enumerate() {
            let expected = self.cells.len() + offset;
            if entry.pos != expected {
                return Err(RuntimeError::decode(
                    -1,
                    format!("position {} does not follow occupied span {}", entry.pos, expected),
                ));
            }
            if entry.pos >= self.n_ctx {
                return Err(RuntimeError::decode(
                    1,
                    format!("no KV slot for position {} (n_ctx={})", entry.pos, self.n_ctx),
                ));
            }
        }
        self.cells.extend_from_slice(batch.tokens());

        self.logits = match batch.last_logits_index() {
            None => None,
            Some(_) => match self.handle.next_step() {
                ScriptStep::Emit(token) => Some(Self::one_hot(token)),
                ScriptStep::WithholdLogits => None,
            },
        };
        Ok(())
    }

    fn last_logits(&self) -> Option<&[f32]> {
        self.logits.as_deref()
    }

    fn window_capacity(&self) -> usize {
        self.n_ctx
    }

    fn clear_window(&mut self) {
        self.cells.clear();
        self.logits = None;
        self.handle.state().clears += 1;
    }
}
