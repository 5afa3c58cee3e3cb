use std::io;
use std::path::PathBuf;

use clap::Parser;
use llama_cli::{Driver, RunOptions};

/// llama-bridge: bounded-context generation demo over a scripted backend
#[derive(Parser)]
#[command(name = "llama-cli")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args)]
struct Common {
    /// Model path handed to the backend.
    #[arg(short, long, default_value = "mock.gguf")]
    model: PathBuf,

    /// JSON session config.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of tokens to generate per turn.
    #[arg(long, default_value_t = 64)]
    max_tokens: usize,

    /// Window capacity of the mock context.
    #[arg(long, default_value_t = 512)]
    n_ctx: usize,

    /// Reply the mock backend produces each turn.
    #[arg(long, default_value = "Hello from llama-bridge.")]
    reply: String,
}

impl From<Common> for RunOptions {
    fn from(c: Common) -> Self {
        RunOptions {
            model: c.model,
            config: c.config,
            n_ctx: c.n_ctx,
            max_tokens: c.max_tokens,
            reply: c.reply,
        }
    }
}

#[derive(clap::Subcommand)]
enum Command {
    /// Generate a full response to a prompt.
    Eval {
        /// Input prompt text.
        #[arg(short, long)]
        prompt: String,

        #[command(flatten)]
        common: Common,
    },
    /// Print the response incrementally as it is generated.
    Stream {
        /// Input prompt text.
        #[arg(short, long)]
        prompt: String,

        #[command(flatten)]
        common: Common,
    },
    /// Multi-turn chat on stdin (`/reset` clears history, `/quit` exits).
    Chat {
        #[command(flatten)]
        common: Common,
    },
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Eval { prompt, common } => Driver::open(common.into()).and_then(|mut d| {
            let generated = d.eval(&prompt)?;
            println!("{}", generated.text);
            tracing::info!(
                finish = ?generated.finish_reason,
                tokens_per_sec = generated.metrics.tokens_per_sec,
                "done"
            );
            Ok(())
        }),
        Command::Stream { prompt, common } => Driver::open(common.into())
            .and_then(|mut d| d.stream(&prompt, &mut io::stdout().lock()).map(|_| ())),
        Command::Chat { common } => Driver::open(common.into())
            .and_then(|mut d| d.chat(io::stdin().lock(), &mut io::stdout().lock()).map(|_| ())),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
