//! Streaming emission tests.
//!
//! Enforces that concatenated deltas equal the final rendering, across ASCII,
//! multi-byte characters split between tokens, and invalid byte runs.

use std::path::Path;

use llama_engine::Backend;
use llama_runtime::mock::{byte_token, text_tokens};
use llama_runtime::MockBackend;
use llama_tokenizer::*;
use proptest::prelude::*;

/// Emit after every token and return `(deltas, final rendering)`.
fn stream(bytes: &[u8]) -> (Vec<String>, String) {
    let backend = MockBackend::new(8);
    let model = backend.load_model(Path::new("/m")).unwrap();
    let tokens: Vec<_> = bytes.iter().map(|&b| byte_token(b)).collect();

    let mut emitter = StreamEmitter::new();
    let mut deltas = Vec::new();
    for n in 1..=tokens.len() {
        let rendered = detokenize_bytes(&model, &tokens[..n], DetokenizeOptions::default()).unwrap();
        deltas.push(emitter.emit(&rendered, n == tokens.len()));
    }
    let full = detokenize(&model, &tokens, DetokenizeOptions::default()).unwrap();
    (deltas, full)
}

#[test]
fn ascii_one_char_per_token() {
    let (deltas, full) = stream(b"hey");
    assert_eq!(deltas, vec!["h", "e", "y"]);
    assert_eq!(full, "hey");
}

#[test]
fn split_multibyte_emits_once_complete() {
    let (deltas, full) = stream("a€b".as_bytes());
    assert_eq!(deltas, vec!["a", "", "", "€", "b"]);
    assert_eq!(deltas.concat(), full);
}

#[test]
fn emoji_across_four_tokens() {
    let (deltas, _) = stream("🦀".as_bytes());
    assert_eq!(deltas, vec!["", "", "", "🦀"]);
}

#[test]
fn text_tokens_match_bytes() {
    assert_eq!(text_tokens("ab"), vec![byte_token(b'a'), byte_token(b'b')]);
}

proptest! {
    #[test]
    fn deltas_concatenate_to_full_text(text in "\\PC{0,24}") {
        let (deltas, full) = stream(text.as_bytes());
        prop_assert_eq!(deltas.concat(), full.clone());
        prop_assert_eq!(full, text);
    }

    #[test]
    fn emitted_chars_never_decrease(bytes in prop::collection::vec(any::<u8>(), 1..32)) {
        let backend = MockBackend::new(8);
        let model = backend.load_model(Path::new("/m")).unwrap();
        let tokens: Vec<_> = bytes.iter().map(|&b| byte_token(b)).collect();
        let mut emitter = StreamEmitter::new();
        let mut last = 0;
        for n in 1..=tokens.len() {
            let rendered = detokenize_bytes(&model, &tokens[..n], DetokenizeOptions::default()).unwrap();
            emitter.emit(&rendered, false);
            prop_assert!(emitter.emitted_chars() >= last);
            last = emitter.emitted_chars();
        }
    }
}
