//! Tests for streaming generation.

use std::sync::Arc;
use std::thread;

use llama_bridge::{Session, SessionError, SessionState};
use llama_runtime::mock::{byte_token, EOS};
use llama_runtime::{LogTelemetry, MockBackend, MockHandle, ScriptStep};

fn loaded(n_ctx: usize) -> (Session<MockBackend>, MockHandle) {
    let backend = MockBackend::new(n_ctx);
    let handle = backend.handle();
    let mut session = Session::new(backend);
    session.load("/models/tiny.gguf").unwrap();
    (session, handle)
}

/// Drain the stream, returning every delta.
fn drain(session: &mut Session<MockBackend>) -> Vec<String> {
    let mut deltas = Vec::new();
    while let Some(delta) = session.stream_next().unwrap() {
        deltas.push(delta);
    }
    deltas
}

#[test]
fn test_next_without_stream() {
    let (mut session, _handle) = loaded(64);
    assert_eq!(session.stream_next().unwrap(), None);
    assert!(!session.stream_is_running());
    assert!(session.stream_cancel_handle().is_none());
}

#[test]
fn test_begin_not_loaded() {
    let mut session = Session::new(MockBackend::new(64));
    assert!(matches!(
        session.stream_begin("hi", 4),
        Err(SessionError::NotLoaded)
    ));
    assert_eq!(session.stream_next().unwrap(), None);
}

#[test]
fn test_one_token_per_call() {
    let (mut session, handle) = loaded(64);
    handle.push_reply("hey");
    session.stream_begin("q", 8).unwrap();
    assert_eq!(session.state(), SessionState::Streaming);

    assert_eq!(session.stream_next().unwrap().as_deref(), Some("h"));
    assert_eq!(session.stream_next().unwrap().as_deref(), Some("e"));
    assert_eq!(session.stream_next().unwrap().as_deref(), Some("y"));
    assert_eq!(session.stream_next().unwrap(), None);
    assert_eq!(session.stream_next().unwrap(), None);
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_stream_matches_evaluate() {
    let reply = "Streaming and one-shot agree. Trailing words";

    let (mut oneshot, handle) = loaded(128);
    handle.push_reply(reply);
    let expected = oneshot.evaluate("prompt", 48);

    let (mut streaming, handle) = loaded(128);
    handle.push_reply(reply);
    streaming.stream_begin("prompt", 48).unwrap();
    let deltas = drain(&mut streaming);

    assert_eq!(deltas.concat(), expected);
    assert_eq!(expected, "Streaming and one-shot agree.");
    assert_eq!(streaming.history(), oneshot.history());
    assert_eq!(streaming.next_pos(), oneshot.next_pos());
}

#[test]
fn test_budget_ends_stream() {
    let (mut session, handle) = loaded(64);
    handle.push_reply("abcdef");
    session.stream_begin("q", 2).unwrap();
    assert_eq!(drain(&mut session), vec!["a", "b"]);
}

#[test]
fn test_split_character_held_back() {
    let (mut session, handle) = loaded(64);
    handle.push_reply("aé");
    session.stream_begin("q", 8).unwrap();
    assert_eq!(drain(&mut session), vec!["a", "", "é"]);
}

#[test]
fn test_empty_delta_is_not_the_end() {
    let (mut session, handle) = loaded(64);
    handle.push_reply("é");
    session.stream_begin("q", 8).unwrap();

    assert_eq!(session.stream_next().unwrap(), Some(String::new()));
    assert!(session.stream_is_running());
    assert_eq!(session.stream_next().unwrap(), Some("é".to_string()));
    assert_eq!(session.stream_next().unwrap(), None);
    assert!(!session.stream_is_running());
}

#[test]
fn test_partial_character_flushed_at_end() {
    let (mut session, handle) = loaded(64);
    handle.push_tokens(&[byte_token(b'o'), byte_token(0xC3), EOS]);
    session.stream_begin("q", 8).unwrap();

    let deltas = drain(&mut session);
    assert_eq!(deltas, vec!["o", "", "\u{FFFD}"]);

    handle.push_tokens(&[byte_token(b'o'), byte_token(0xC3), EOS]);
    assert_eq!(session.evaluate("q", 8), deltas.concat());
}

#[test]
fn test_cancel_stops_stream() {
    let (mut session, handle) = loaded(64);
    handle.push_reply("abcdef");
    session.stream_begin("q", 8).unwrap();
    session.stream_next().unwrap();
    session.stream_next().unwrap();

    session.stream_cancel();
    assert!(!session.stream_is_running());
    assert_eq!(session.stream_next().unwrap(), None);
    // BOS, q, a, b
    assert_eq!(session.next_pos(), 4);

    session.stream_cancel();
}

#[test]
fn test_cancel_handle_from_another_thread() {
    let (mut session, handle) = loaded(64);
    handle.push_reply("abcdef");
    session.stream_begin("q", 8).unwrap();
    assert_eq!(session.stream_next().unwrap().as_deref(), Some("a"));

    let cancel = session.stream_cancel_handle().unwrap();
    thread::spawn(move || cancel.cancel()).join().unwrap();

    assert!(!session.stream_is_running());
    assert_eq!(session.stream_next().unwrap(), None);
    assert_eq!(session.next_pos(), 3);
}

#[test]
fn test_begin_replaces_running_stream() {
    let (mut session, handle) = loaded(64);
    handle.push_reply("abc");
    session.stream_begin("q", 8).unwrap();
    session.stream_next().unwrap();
    handle.clear_script();

    handle.push_reply("xy");
    session.stream_begin("r", 8).unwrap();
    assert_eq!(drain(&mut session), vec!["x", "y"]);
}

#[test]
fn test_evaluate_cancels_stream() {
    let (mut session, handle) = loaded(64);
    handle.push_reply("abc");
    session.stream_begin("q", 8).unwrap();
    session.stream_next().unwrap();
    handle.clear_script();

    handle.push_reply("z");
    assert_eq!(session.evaluate("r", 4), "z");
    assert_eq!(session.stream_next().unwrap(), None);
}

#[test]
fn test_logits_unavailable_ends_stream() {
    let (mut session, handle) = loaded(64);
    handle.push_step(ScriptStep::WithholdLogits);
    session.stream_begin("q", 4).unwrap();

    assert!(matches!(
        session.stream_next(),
        Err(SessionError::LogitsUnavailable)
    ));
    assert_eq!(session.stream_next().unwrap(), None);
}

#[test]
fn test_decode_failure_keeps_token() {
    let (mut session, handle) = loaded(64);
    handle.push_reply("abc");
    // call 0: prompt, call 1: 'a', call 2: 'b'
    handle.fail_decode_at(2);
    session.stream_begin("q", 8).unwrap();
    assert_eq!(drain(&mut session), vec!["a", "b"]);
    assert_eq!(session.next_pos(), 3);
}

#[test]
fn test_free_drops_stream() {
    let (mut session, handle) = loaded(64);
    handle.push_reply("abc");
    session.stream_begin("q", 8).unwrap();
    session.free();
    assert_eq!(session.stream_next().unwrap(), None);
    assert_eq!(session.state(), SessionState::Freed);
}

#[test]
fn test_stream_reports_telemetry() {
    let backend = MockBackend::new(64);
    let handle = backend.handle();
    let telemetry = LogTelemetry::new();
    let mut session = Session::new(backend).with_telemetry(Arc::new(telemetry.clone()));
    session.load("/models/tiny.gguf").unwrap();

    handle.push_reply("abc");
    session.stream_begin("q", 8).unwrap();
    drain(&mut session);

    let metrics = telemetry.last_metrics().unwrap();
    assert_eq!(metrics.prompt_tokens, 2);
    assert_eq!(metrics.generated_tokens, 3);
}
