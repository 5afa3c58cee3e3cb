//! Property-based tests for session generation.
//!
//! Key invariants:
//! - Concatenated stream deltas equal the one-shot output for the same script
//! - Streamed text is never emitted twice (emitted length only grows)
//! - After any successful turn the window keeps the safety margin free
//! - History and write position stay in agreement across turns and evictions

use llama_bridge::{Session, SessionConfig};
use llama_runtime::{MockBackend, MockHandle};
use proptest::prelude::*;

fn loaded(n_ctx: usize, config: SessionConfig) -> (Session<MockBackend>, MockHandle) {
    let backend = MockBackend::new(n_ctx);
    let handle = backend.handle();
    let mut session = Session::with_config(backend, config).unwrap();
    session.load("/models/prop.gguf").unwrap();
    (session, handle)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Streaming and one-shot drive the same loop, so their text matches.
    #[test]
    fn stream_concat_equals_evaluate(
        reply in "\\PC{0,40}",
        prompt in "[a-z ]{1,12}",
        max_tokens in 1usize..48,
    ) {
        let (mut oneshot, handle) = loaded(256, SessionConfig::default());
        handle.push_reply(&reply);
        let expected = oneshot.evaluate(&prompt, max_tokens);

        let (mut streaming, handle) = loaded(256, SessionConfig::default());
        handle.push_reply(&reply);
        streaming.stream_begin(&prompt, max_tokens).unwrap();

        let mut text = String::new();
        let mut emitted = 0;
        while let Some(delta) = streaming.stream_next().unwrap() {
            text.push_str(&delta);
            prop_assert!(text.chars().count() >= emitted);
            emitted = text.chars().count();
        }
        prop_assert_eq!(text, expected);
        prop_assert_eq!(streaming.history(), oneshot.history());
    }

    /// Multi-turn conversations never breach the margin and never desync.
    #[test]
    fn capacity_invariant_holds(
        turns in prop::collection::vec(("[a-z]{1,8}", "[a-z]{0,10}", 0usize..10), 1..16),
    ) {
        let config = SessionConfig {
            early_stop: llama_sampling::EarlyStop::disabled(),
            ..SessionConfig::default()
        };
        let (mut session, handle) = loaded(128, config);

        for (prompt, reply, max_tokens) in turns {
            handle.clear_script();
            handle.push_reply(&reply);
            match session.try_evaluate(&prompt, max_tokens) {
                Ok(_) => prop_assert!(session.next_pos() + 16 < 128),
                Err(err) => prop_assert!(false, "turn failed: {}", err),
            }
            prop_assert_eq!(session.next_pos(), session.history().len());
        }
    }
}
