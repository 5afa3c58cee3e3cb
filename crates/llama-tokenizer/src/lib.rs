//! # llama-tokenizer
//!
//! Text <-> token conversion on top of a [`Vocab`].
//!
//! This crate provides:
//! - Two-phase buffer negotiation around [`Vocab::tokenize_into`] and
//!   [`Vocab::detokenize_into`] (probe, allocate the reported size, call again)
//! - [`StreamEmitter`] for diff-based streaming output with partial UTF-8 handling
//!
//! A backend answering "buffer too small" is normal; only a non-positive result after
//! the buffer was resized to the reported size is an error.

use llama_engine::{BufferFill, TokenId, Vocab};

/// Extra bytes allocated beyond the reported size when detokenizing.
pub const DETOKENIZE_SLACK: usize = 1;

/// Error type for tokenization operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizerError {
    #[error("Tokenization failed: {0}")]
    TokenizationFailed(String),
    #[error("Detokenization failed: {0}")]
    DetokenizationFailed(String),
}

pub type TokenizerResult<T> = std::result::Result<T, TokenizerError>;

/// Flags forwarded to [`Vocab::tokenize_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenizeOptions {
    pub add_special: bool,
    pub parse_special: bool,
}

impl Default for TokenizeOptions {
    fn default() -> Self {
        Self {
            add_special: true,
            parse_special: true,
        }
    }
}

/// Flags forwarded to [`Vocab::detokenize_into`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetokenizeOptions {
    pub remove_special: bool,
    pub unparse_special: bool,
}

impl Default for DetokenizeOptions {
    fn default() -> Self {
        Self {
            remove_special: true,
            unparse_special: false,
        }
    }
}

/// Tokenize `text`, growing the output buffer to exactly the size the vocabulary asks for.
pub fn tokenize<V>(
    vocab: &V,
    text: &str,
    opts: TokenizeOptions,
) -> TokenizerResult<Vec<TokenId>>
where
    V: Vocab + ?Sized,
{
    let probe = vocab.tokenize_into(text, &mut [], opts.add_special, opts.parse_special);
    let required = match probe {
        BufferFill::Written(0) => return Ok(Vec::new()),
        BufferFill::Written(n) => {
            return Err(TokenizerError::TokenizationFailed(format!(
                "backend reported {n} tokens written to an empty buffer"
            )));
        }
        BufferFill::NeedsLargerBuffer(required) => required,
    };

    let mut tokens = vec![0; required];
    match vocab.tokenize_into(text, &mut tokens, opts.add_special, opts.parse_special) {
        BufferFill::Written(n) if n > 0 && n <= tokens.len() => {
            tokens.truncate(n);
            Ok(tokens)
        }
        BufferFill::Written(n) => Err(TokenizerError::TokenizationFailed(format!(
            "backend reported {n} tokens after resizing to {required}"
        ))),
        BufferFill::NeedsLargerBuffer(again) => Err(TokenizerError::TokenizationFailed(format!(
            "backend asked for {again} tokens after resizing to {required}"
        ))),
    }
}

/// Render `tokens` to raw bytes. The result may end in an incomplete UTF-8 sequence.
pub fn detokenize_bytes<V>(
    vocab: &V,
    tokens: &[TokenId],
    opts: DetokenizeOptions,
) -> TokenizerResult<Vec<u8>>
where
    V: Vocab + ?Sized,
{
    let probe = vocab.detokenize_into(tokens, &mut [], opts.remove_special, opts.unparse_special);
    let required = match probe {
        BufferFill::Written(0) => return Ok(Vec::new()),
        BufferFill::Written(n) => {
            return Err(TokenizerError::DetokenizationFailed(format!(
                "backend reported {n} bytes written to an empty buffer"
            )));
        }
        BufferFill::NeedsLargerBuffer(required) => required,
    };

    let size = required + DETOKENIZE_SLACK;
    let mut bytes = vec![0u8; size];
    match vocab.detokenize_into(tokens, &mut bytes, opts.remove_special, opts.unparse_special) {
        BufferFill::Written(n) if n > 0 && n <= size => {
            bytes.truncate(n);
            Ok(bytes)
        }
        BufferFill::Written(n) => Err(TokenizerError::DetokenizationFailed(format!(
            "backend reported {n} bytes after resizing to {size}"
        ))),
        BufferFill::NeedsLargerBuffer(again) => Err(TokenizerError::DetokenizationFailed(format!(
            "backend asked for {again} bytes after resizing to {size}"
        ))),
    }
}

/// Render `tokens` to text, replacing invalid UTF-8.
pub fn detokenize<V>(
    vocab: &V,
    tokens: &[TokenId],
    opts: DetokenizeOptions,
) -> TokenizerResult<String>
where
    V: Vocab + ?Sized,
{
    let bytes = detokenize_bytes(vocab, tokens, opts)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Length of the prefix of `bytes` that does not end inside a multi-byte sequence.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let n = bytes.len();
    for back in 1..=n.min(3) {
        let b = bytes[n - back];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let width = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if width > back { n - back } else { n };
    }
    n
}

/// Diff-based streaming state.
///
/// Each call receives the rendering of the *whole* generated sequence and returns
/// only the characters not emitted before. A trailing incomplete UTF-8 sequence is
/// held back until it completes or the stream finishes, so a multi-byte character
/// split across tokens is never emitted as a replacement character.
#[derive(Debug, Clone, Default)]
pub struct StreamEmitter {
    emitted_chars: usize,
}

impl StreamEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Characters emitted so far. Never decreases until [`StreamEmitter::reset`].
    pub fn emitted_chars(&self) -> usize {
        self.emitted_chars
    }

    pub fn reset(&mut self) {
        self.emitted_chars = 0;
    }

    /// Return the unseen suffix of `rendered`. With `finished`, everything is flushed.
    pub fn emit(&mut self, rendered: &[u8], finished: bool) -> String {
        let visible = if finished {
            rendered
        } else {
            &rendered[..complete_prefix_len(rendered)]
        };
        let text = String::from_utf8_lossy(visible);
        let delta: String = text.chars().skip(self.emitted_chars).collect();
        self.emitted_chars += delta.chars().count();
        delta
    }
}
