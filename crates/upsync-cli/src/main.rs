//! upsync CLI - incremental uploads of a directory tree to an object store
//!
//! Provides commands for:
//! - Uploading new and changed files (`upsync upload`)
//! - Showing and validating the configuration (`upsync config`)

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use upsync_core::config::Config;

mod commands;
mod exit;
mod output;

use commands::{config::ConfigCommand, upload::UploadCommand, CliContext};
use exit::ExitStatus;
use output::{get_formatter, OutputFormat};

#[derive(Debug, Parser)]
#[command(
    name = "upsync",
    version,
    about = "Upload new and changed files to an object store bucket"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print only warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Upload new and changed files
    Upload(UploadCommand),
    /// View and check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }

    /// Log level from the flags, falling back to the configured one
    fn log_level<'a>(&self, configured: &'a str) -> &'a str {
        match (self.quiet, self.verbose) {
            (true, _) => "warn",
            (false, 0) => configured,
            (false, 1) => "debug",
            _ => "trace",
        }
    }
}

/// Loads `path` if it exists, otherwise starts from defaults
fn load_config(path: &std::path::Path) -> Result<(Config, bool)> {
    if path.exists() {
        let config = Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((Config::default(), false))
    }
}

fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let formatter = get_formatter(cli.format(), cli.quiet);

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let (config, config_found) = match load_config(&config_path) {
        Ok(loaded) => loaded,
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            return ExitStatus::SetupFailed.into();
        }
    };

    init_tracing(cli.log_level(&config.logging.level));

    let ctx = CliContext {
        format: cli.format(),
        quiet: cli.quiet,
        config_path,
        config_found,
    };

    let result = match &cli.command {
        Commands::Upload(cmd) => cmd.execute(config, &ctx).await,
        Commands::Config(cmd) => cmd.execute(&config, &ctx),
    };

    match result {
        Ok(status) => status.into(),
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            ExitStatus::SetupFailed.into()
        }
    }
}
