//! tts-studio: turn a prompt into a spoken script, synthesize it, play it.

mod config;
mod error;
mod history;
mod pipeline;
mod player;
mod repl;
mod script;
mod speech;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::PlayerBackend;

#[derive(Parser, Debug)]
#[command(name = "tts-studio", about = "Prompt-to-speech studio")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for generated audio files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Playback backend
    #[arg(short, long, value_enum)]
    player: Option<PlayerBackend>,

    /// Print the run report for a date (YYYY-MM-DD, default today) and exit
    #[arg(long, value_name = "DATE", num_args = 0..=1, default_missing_value = "today")]
    report: Option<String>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr; stdout belongs to the prompt loop.
    let filter = if args.verbose {
        EnvFilter::new("debug,hyper=info,reqwest=info,symphonia=warn")
    } else {
        EnvFilter::new("info,hyper=warn,reqwest=warn,symphonia=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Ok(path) = dotenvy::dotenv() {
        debug!("Loaded environment from {}", path.display());
    }

    let mut config = config::Config::load(args.config.as_deref());
    if let Some(dir) = args.output_dir {
        config.output.dir = dir;
    }
    if let Some(backend) = args.player {
        config.player.backend = backend;
    }

    if let Some(date) = args.report {
        println!("{}", history::generate_report(&config.history.resolved_dir(), &date));
        return ExitCode::SUCCESS;
    }

    println!("--- AI TTS Studio ---");

    config.resolve_credentials();
    let missing = config.missing_credentials();
    if !missing.is_empty() {
        eprintln!(
            "Error: API keys not found. Please set {} in your environment or .env file.",
            missing.join(" and ")
        );
        return ExitCode::from(1);
    }

    let pipeline = match pipeline::Pipeline::from_config(&config) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error initializing clients: {e}");
            return ExitCode::from(1);
        }
    };
    info!(
        "Ready (model: {}, voice: {}, output: {})",
        config.anthropic.model,
        config.elevenlabs.voice_id,
        config.output.dir.display()
    );

    let history_dir = config
        .history
        .enabled
        .then(|| config.history.resolved_dir());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    repl::run(&pipeline, repl::spawn_stdin_reader(), history_dir, shutdown).await;

    ExitCode::SUCCESS
}
