//! # llama-cli
//!
//! Command drivers for llama-bridge sessions.
//!
//! Wires: config file → session over the scripted mock backend → one-shot, streaming,
//! or interactive chat output. The mock answers every turn with a canned reply, which
//! makes the rolling window and streaming behaviour observable without model weights.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use llama_bridge::{ConfigError, Generated, Session, SessionConfig, SessionError};
use llama_runtime::{MockBackend, MockHandle};

/// Errors from the CLI drivers.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub model: PathBuf,
    pub config: Option<PathBuf>,
    pub n_ctx: usize,
    pub max_tokens: usize,
    /// Text the mock backend generates on every turn.
    pub reply: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            model: PathBuf::from("mock.gguf"),
            config: None,
            n_ctx: 512,
            max_tokens: 64,
            reply: "Hello from llama-bridge.".to_string(),
        }
    }
}

/// A loaded session plus the handle that scripts its replies.
pub struct Driver {
    pub session: Session<MockBackend>,
    handle: MockHandle,
    opts: RunOptions,
}

impl Driver {
    pub fn open(opts: RunOptions) -> Result<Self, CliError> {
        let config = match &opts.config {
            Some(path) => SessionConfig::from_json_file(path)?,
            None => SessionConfig::default(),
        };
        let backend = MockBackend::new(opts.n_ctx);
        let handle = backend.handle();
        let mut session = Session::with_config(backend, config)?;
        session.load(&opts.model)?;
        tracing::info!(model = %opts.model.display(), n_ctx = opts.n_ctx, "session ready");
        Ok(Self {
            session,
            handle,
            opts,
        })
    }

    fn script_reply(&self) {
        self.handle.clear_script();
        self.handle.push_reply(&self.opts.reply);
    }

    pub fn eval(&mut self, prompt: &str) -> Result<Generated, CliError> {
        self.script_reply();
        Ok(self.session.try_evaluate(prompt, self.opts.max_tokens)?)
    }

    /// Write deltas to `out` as they are produced. Returns the full text.
    pub fn stream<W: Write>(&mut self, prompt: &str, out: &mut W) -> Result<String, CliError> {
        self.script_reply();
        self.session.stream_begin(prompt, self.opts.max_tokens)?;
        let mut text = String::new();
        while let Some(delta) = self.session.stream_next()? {
            out.write_all(delta.as_bytes())?;
            out.flush()?;
            text.push_str(&delta);
        }
        writeln!(out)?;
        Ok(text)
    }

    /// Read prompts line by line until EOF or `/quit`.
    ///
    /// `/reset` clears the conversation. Per-turn failures are printed and the loop
    /// continues.
    pub fn chat<R: BufRead, W: Write>(&mut self, input: R, out: &mut W) -> Result<usize, CliError> {
        let mut turns = 0;
        for line in input.lines() {
            let line = line?;
            let prompt = line.trim();
            match prompt {
                "" => continue,
                "/quit" => break,
                "/reset" => {
                    self.session.clear_history();
                    writeln!(out, "(history cleared)")?;
                    continue;
                }
                _ => {}
            }

            self.script_reply();
            let reply = self.session.evaluate(prompt, self.opts.max_tokens);
            writeln!(out, "{reply}")?;
            tracing::debug!(
                turn = turns,
                next_pos = self.session.next_pos(),
                history = self.session.history().len(),
                "chat turn"
            );
            turns += 1;
        }
        Ok(turns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(reply: &str) -> RunOptions {
        RunOptions {
            reply: reply.to_string(),
            ..RunOptions::default()
        }
    }

    #[test]
    fn eval_returns_scripted_reply() {
        let mut driver = Driver::open(opts("Hi there")).unwrap();
        assert_eq!(driver.eval("hello").unwrap().text, "Hi there");
    }

    #[test]
    fn stream_writes_all_deltas() {
        let mut driver = Driver::open(opts("abc")).unwrap();
        let mut out = Vec::new();
        let text = driver.stream("hello", &mut out).unwrap();
        assert_eq!(text, "abc");
        assert_eq!(out, b"abc\n");
    }

    #[test]
    fn chat_runs_until_quit() {
        let mut driver = Driver::open(opts("ok")).unwrap();
        let input = "one\n\n/reset\ntwo\n/quit\nthree\n".as_bytes();
        let mut out = Vec::new();
        let turns = driver.chat(input, &mut out).unwrap();

        assert_eq!(turns, 2);
        assert_eq!(String::from_utf8(out).unwrap(), "ok\n(history cleared)\nok\n");
    }

    #[test]
    fn chat_survives_overflow() {
        let mut driver = Driver::open(RunOptions {
            n_ctx: 32,
            max_tokens: 4,
            ..opts("ok")
        })
        .unwrap();
        let long = "x".repeat(40);
        let input = format!("{long}\nhi\n");
        let mut out = Vec::new();
        driver.chat(input.as_bytes(), &mut out).unwrap();

        let out = String::from_utf8(out).unwrap();
        let mut lines = out.lines();
        assert!(lines.next().unwrap().starts_with("[error] context overflow"));
        assert_eq!(lines.next(), Some("ok"));
    }

    #[test]
    fn empty_model_path_fails() {
        let err = Driver::open(RunOptions {
            model: PathBuf::new(),
            ..RunOptions::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, CliError::Session(SessionError::InvalidPath)));
    }

    #[test]
    fn missing_config_file_fails() {
        let err = Driver::open(RunOptions {
            config: Some(PathBuf::from("/nonexistent/config.json")),
            ..RunOptions::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, CliError::Config(ConfigError::Io(_))));
    }
}
