//! CLI subcommands

pub mod config;
pub mod upload;

use std::path::PathBuf;

use crate::output::{get_formatter, OutputFormat, OutputFormatter};

/// Global options shared by every subcommand
#[derive(Debug, Clone)]
pub struct CliContext {
    pub format: OutputFormat,
    pub quiet: bool,
    /// Configuration file in use
    pub config_path: PathBuf,
    /// Whether `config_path` existed when it was loaded
    pub config_found: bool,
}

impl CliContext {
    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format, self.quiet)
    }
}
