use llama_engine::{ExecutionContext, TokenId};

use crate::feed::{BatchFeeder, FeedError};

/// Slots reserved beyond prompt and generation budget.
pub const SAFETY_MARGIN: usize = 16;

/// Share of the window capacity retained when history is evicted.
pub const KEEP_FRACTION: f64 = 0.70;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WindowError {
    #[error("context overflow: {needed} tokens needed, window holds {capacity}")]
    Overflow { needed: usize, capacity: usize },

    #[error("failed to replay retained history after eviction: {0}")]
    Rebuild(#[source] FeedError),
}

pub type WindowResult<T> = std::result::Result<T, WindowError>;

/// What [`RollingWindow::ensure_capacity`] had to do to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityOutcome {
    Fits,
    Evicted { dropped: usize, kept: usize },
}

/// Eviction tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowPolicy {
    pub safety_margin: usize,
    /// In `(0, 1]`.
    pub keep_fraction: f64,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            safety_margin: SAFETY_MARGIN,
            keep_fraction: KEEP_FRACTION,
        }
    }
}

impl WindowPolicy {
    /// Tokens retained when evicting from a window of `capacity` slots.
    pub fn target_keep(&self, capacity: usize) -> usize {
        (capacity as f64 * self.keep_fraction).floor() as usize
    }
}

/// Token history mirrored in an execution window.
///
/// `history` holds every token committed to the window, in order, and `next_pos` is
/// the position the next token will be written at. The two only diverge inside
/// [`RollingWindow::ensure_capacity`] while the retained tail is replayed.
#[derive(Debug, Clone, Default)]
pub struct RollingWindow {
    policy: WindowPolicy,
    history: Vec<TokenId>,
    next_pos: usize,
}

impl RollingWindow {
    pub fn new(policy: WindowPolicy) -> Self {
        Self {
            policy,
            history: Vec::new(),
            next_pos: 0,
        }
    }

    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    pub fn history(&self) -> &[TokenId] {
        &self.history
    }

    pub fn next_pos(&self) -> usize {
        self.next_pos
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Slots a request of `need_prompt + need_gen` tokens would occupy, margin included.
    ///
    /// Saturates at `usize::MAX`, which never fits.
    pub fn needed_total(&self, need_prompt: usize, need_gen: usize) -> usize {
        self.next_pos
            .saturating_add(need_prompt)
            .saturating_add(need_gen)
            .saturating_add(self.policy.safety_margin)
    }

    /// Record tokens that were successfully fed at `next_pos`.
    pub fn commit(&mut self, tokens: &[TokenId]) {
        self.history.extend_from_slice(tokens);
        self.next_pos += tokens.len();
    }

    pub fn push(&mut self, token: TokenId) {
        self.history.push(token);
        self.next_pos += 1;
    }

    /// Forget all history. The caller is responsible for clearing the window itself.
    pub fn clear(&mut self) {
        self.history.clear();
        self.next_pos = 0;
    }

    /// Make room for `need_prompt + need_gen` more tokens.
    ///
    /// When the request does not fit, the most recent `floor(capacity * keep_fraction)`
    /// history tokens are kept, the window is cleared, and the kept tail is replayed
    /// from position 0 without logits. The fit is checked once more afterwards; there
    /// is no second eviction.
    ///
    /// On [`WindowError::Overflow`] the eviction has already happened and the history is
    /// the retained tail. On [`WindowError::Rebuild`] the window and history are empty.
    pub fn ensure_capacity<C>(
        &mut self,
        ctx: &mut C,
        feeder: &BatchFeeder,
        need_prompt: usize,
        need_gen: usize,
    ) -> WindowResult<CapacityOutcome>
    where
        C: ExecutionContext + ?Sized,
    {
        let capacity = ctx.window_capacity();
        if self.needed_total(need_prompt, need_gen) < capacity {
            return Ok(CapacityOutcome::Fits);
        }

        let keep = self.history.len().min(self.policy.target_keep(capacity));
        let dropped = self.history.len() - keep;
        self.history.drain(..dropped);

        ctx.clear_window();
        self.next_pos = 0;
        if let Err(err) = feeder.feed(ctx, &self.history, 0, false) {
            tracing::warn!(error = %err, kept = keep, "history replay failed; window emptied");
            ctx.clear_window();
            self.history.clear();
            return Err(WindowError::Rebuild(err));
        }
        self.next_pos = keep;
        tracing::info!(dropped, kept = keep, capacity, "evicted oldest history");

        let needed = self.needed_total(need_prompt, need_gen);
        if needed < capacity {
            Ok(CapacityOutcome::Evicted {
                dropped,
                kept: keep,
            })
        } else {
            tracing::warn!(needed, capacity, "request does not fit after eviction");
            Err(WindowError::Overflow { needed, capacity })
        }
    }
}
