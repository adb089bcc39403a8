//! Fabula CLI: an interactive storyteller in the terminal.
//!
//! Without a subcommand it runs the story REPL; `speak`, `illustrate` and
//! `config` are one-shot helpers.

mod assets;
mod commands;
mod repl;

use clap::Parser;
use fabula_core::config::{ConfigOverrides, StorageOverrides};
use fabula_core::Language;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Fabula: stories told, narrated and illustrated by generative AI
#[derive(Parser, Debug)]
#[command(name = "fabula", version, about, long_about = None)]
struct Cli {
    /// Continue the saved story instead of starting a new one
    #[arg(long)]
    resume: bool,

    /// Story language: pt, en, es
    #[arg(short, long)]
    language: Option<Language>,

    /// Directory for narration and illustration files
    #[arg(short, long, default_value = "fabula-out")]
    out: PathBuf,

    /// Directory for saved stories (defaults to the platform data dir)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Synthesize one line of narration to a WAV file
    Speak {
        /// Text to narrate
        text: String,
        /// Output file
        #[arg(short, long, default_value = "fabula-speech.wav")]
        output: PathBuf,
    },
    /// Run the illustration chain once for a piece of story text
    Illustrate {
        /// Story text to illustrate
        text: String,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    let log_dir = fabula_core::config::default_data_dir().join("logs");
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "fabula.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let overrides = ConfigOverrides {
        language: cli.language,
        storage: cli.data_dir.clone().map(|dir| StorageOverrides {
            data_dir: Some(dir),
        }),
    };
    let config = fabula_core::load_config(Some(&workspace), Some(&overrides))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    if let Some(command) = cli.command {
        return match command {
            Commands::Speak { text, output } => commands::speak(&config, &text, &output).await,
            Commands::Illustrate { text } => commands::illustrate(&config, &text, &cli.out).await,
            Commands::Config {
                action: ConfigAction::Show,
            } => commands::show_config(&config, &workspace),
        };
    }

    repl::run_interactive(config, cli.out, cli.resume).await
}
