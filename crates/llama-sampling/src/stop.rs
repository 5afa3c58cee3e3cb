use serde::{Deserialize, Serialize};

/// Minimum rendered characters before the heuristic may fire.
pub const MIN_CHARS: usize = 16;
/// Minimum generated tokens before the heuristic may fire.
pub const MIN_TOKENS: usize = 8;

/// Heuristic end-of-answer detection on the rendered generated text.
///
/// Once both thresholds are met, generation stops at a paragraph break (`"\n\n"`)
/// or after sentence-final punctuation. It is advisory: callers check the token
/// budget and end-of-generation first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStop {
    pub enabled: bool,
    pub min_chars: usize,
    pub min_tokens: usize,
}

impl Default for EarlyStop {
    fn default() -> Self {
        Self {
            enabled: true,
            min_chars: MIN_CHARS,
            min_tokens: MIN_TOKENS,
        }
    }
}

impl EarlyStop {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// `text` is the detokenized output so far, produced by `n_tokens` tokens.
    pub fn should_stop(&self, text: &str, n_tokens: usize) -> bool {
        if !self.enabled || n_tokens < self.min_tokens {
            return false;
        }
        if text.chars().count() < self.min_chars {
            return false;
        }
        text.contains("\n\n") || text.ends_with(|c| matches!(c, '.' | '!' | '?'))
    }
}
