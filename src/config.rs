//! Session configuration.
//!
//! Loaded from JSON; every field is optional and falls back to the defaults below.
//!
//! ```json
//! { "chunk_size": 64, "early_stop": { "min_chars": 32 } }
//! ```

use std::path::Path;

use llama_engine::SeqId;
use llama_kv::{BatchFeeder, WindowPolicy, DEFAULT_CHUNK_SIZE, KEEP_FRACTION, SAFETY_MARGIN};
use llama_sampling::EarlyStop;
use llama_tokenizer::{DetokenizeOptions, TokenizeOptions};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Slots kept free beyond prompt and generation budget.
    #[serde(default = "default_safety_margin")]
    pub safety_margin: usize,

    /// Share of the window kept on eviction, in `(0, 1]`.
    #[serde(default = "default_keep_fraction")]
    pub keep_fraction: f64,

    /// Max tokens per decode call when feeding prompts and replays.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub seq_id: SeqId,

    /// Prepend BOS. Only applied to the first prompt of a fresh window.
    #[serde(default = "default_true")]
    pub add_special: bool,

    #[serde(default = "default_true")]
    pub parse_special: bool,

    #[serde(default = "default_true")]
    pub remove_special: bool,

    #[serde(default)]
    pub unparse_special: bool,

    #[serde(default)]
    pub early_stop: EarlyStop,
}

fn default_safety_margin() -> usize {
    SAFETY_MARGIN
}
fn default_keep_fraction() -> f64 {
    KEEP_FRACTION
}
fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_true() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            safety_margin: SAFETY_MARGIN,
            keep_fraction: KEEP_FRACTION,
            chunk_size: DEFAULT_CHUNK_SIZE,
            seq_id: 0,
            add_special: true,
            parse_special: true,
            remove_special: true,
            unparse_special: false,
            early_stop: EarlyStop::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.keep_fraction > 0.0 && self.keep_fraction <= 1.0) {
            return Err(ConfigError::KeepFraction(self.keep_fraction));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ChunkSize);
        }
        Ok(())
    }

    pub fn window_policy(&self) -> WindowPolicy {
        WindowPolicy {
            safety_margin: self.safety_margin,
            keep_fraction: self.keep_fraction,
        }
    }

    pub fn feeder(&self) -> BatchFeeder {
        BatchFeeder::new(self.chunk_size, self.seq_id)
    }

    pub fn tokenize_options(&self, window_empty: bool) -> TokenizeOptions {
        TokenizeOptions {
            add_special: self.add_special && window_empty,
            parse_special: self.parse_special,
        }
    }

    pub fn detokenize_options(&self) -> DetokenizeOptions {
        DetokenizeOptions {
            remove_special: self.remove_special,
            unparse_special: self.unparse_special,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.safety_margin, 16);
        assert_eq!(config.chunk_size, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(SessionConfig::from_json_str("{}").unwrap(), SessionConfig::default());
    }

    #[test]
    fn bos_only_on_empty_window() {
        let config = SessionConfig::default();
        assert!(config.tokenize_options(true).add_special);
        assert!(!config.tokenize_options(false).add_special);
    }

    #[test]
    fn rejects_keep_fraction_out_of_range() {
        for bad in [0.0, -0.5, 1.5, f64::NAN] {
            let config = SessionConfig {
                keep_fraction: bad,
                ..SessionConfig::default()
            };
            assert!(matches!(config.validate(), Err(ConfigError::KeepFraction(_))));
        }
    }

    #[test]
    fn rejects_zero_chunk_size() {
        let err = SessionConfig::from_json_str(r#"{"chunk_size": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ChunkSize));
    }
}
