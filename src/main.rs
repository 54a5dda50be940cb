//! CLI entry point for keypipe
//!
//! # Usage
//!
//! Type into the pipeline until Ctrl+C:
//! ```bash
//! keypipe run --config config/keypipe.toml
//! ```
//!
//! Replay fixed text for ten seconds:
//! ```bash
//! keypipe run --text "Hello" --for 10s
//! ```
//!
//! Read a committed log back:
//! ```bash
//! keypipe decode transmitter_log.txt
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keypipe::config::{InputSource, PipelineConfig, DEFAULT_CONFIG_PATH};
use keypipe::pipeline::{self, rot13_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "keypipe")]
#[command(about = "Capture keystrokes, ROT13 them and log them in batches", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline until Ctrl+C (or for a fixed duration)
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Replay this text instead of reading stdin
        #[arg(long)]
        text: Option<String>,

        /// Stop after this long, e.g. "45s" or "2m"
        #[arg(long = "for", value_parser = humantime_serde::re::humantime::parse_duration)]
        duration: Option<Duration>,
    },

    /// Print a committed log with the substitution undone
    Decode {
        /// Log file written by the sink stage
        file: PathBuf,
    },

    /// Validate configuration and print the effective values as TOML
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            text,
            duration,
        } => run(&config, text, duration).await,
        Commands::Decode { file } => decode(&file).await,
        Commands::CheckConfig { config } => check_config(&config),
    }
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let config = PipelineConfig::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

async fn run(path: &Path, text: Option<String>, duration: Option<Duration>) -> Result<()> {
    let mut config = load_config(path)?;
    if let Some(text) = text {
        config.capture.source = InputSource::Script;
        config.capture.script = text;
    }
    keypipe::logging::init_from_config(&config)?;

    let handle = pipeline::launch(&config)
        .await
        .context("starting pipeline")?;

    match duration {
        Some(duration) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                res = tokio::signal::ctrl_c() => res?,
            }
        }
        None => tokio::signal::ctrl_c().await?,
    }

    let report = handle.shutdown().await?;
    tracing::info!(
        forwarded = report.capture.forwarded,
        ring_drops = report.transform.dropped,
        buffer_drops = report.sink.bytes_dropped,
        flushes = report.sink.flushes,
        failed_flushes = report.sink.failed_flushes,
        bytes_committed = report.sink.bytes_committed,
        log = %config.sink.log_path.display(),
        "Run complete"
    );
    Ok(())
}

async fn decode(file: &Path) -> Result<()> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&rot13_all(&bytes))?;
    stdout.flush()?;
    Ok(())
}

fn check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
