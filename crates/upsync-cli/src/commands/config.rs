//! Config command - inspect and check the configuration
//!
//! `upsync config show` prints the effective configuration (file values over
//! defaults); `upsync config validate` reports every invalid value.

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use upsync_core::config::Config;

use super::CliContext;
use crate::exit::ExitStatus;
use crate::output::{plural, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
}

impl ConfigCommand {
    pub fn execute(&self, config: &Config, ctx: &CliContext) -> Result<ExitStatus> {
        match self {
            ConfigCommand::Show => execute_show(config, ctx),
            ConfigCommand::Validate => Ok(execute_validate(config, ctx)),
        }
    }
}

fn execute_show(config: &Config, ctx: &CliContext) -> Result<ExitStatus> {
    let formatter = ctx.formatter();
    info!(config_path = %ctx.config_path.display(), "Showing configuration");

    if ctx.format == OutputFormat::Json {
        let json =
            serde_json::to_value(config).context("Failed to serialize configuration to JSON")?;
        formatter.document(&json);
    } else {
        let origin = if ctx.config_found {
            ctx.config_path.display().to_string()
        } else {
            "defaults".to_string()
        };
        formatter.success(&format!("Configuration ({origin})"));
        formatter.info("");

        let yaml =
            serde_yaml::to_string(config).context("Failed to serialize configuration to YAML")?;
        for line in yaml.lines() {
            formatter.info(line);
        }
    }

    Ok(ExitStatus::Success)
}

fn execute_validate(config: &Config, ctx: &CliContext) -> ExitStatus {
    let formatter = ctx.formatter();
    let errors = config.validate();

    if ctx.format == OutputFormat::Json {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        formatter.document(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": ctx.config_path.display().to_string(),
            "errors": messages,
        }));
    } else if errors.is_empty() {
        formatter.success("Configuration is valid");
    } else {
        formatter.error(&format!("Configuration has {}:", plural(errors.len(), "error")));
        for error in &errors {
            formatter.info(&format!("- {error}"));
        }
    }

    if errors.is_empty() {
        ExitStatus::Success
    } else {
        ExitStatus::InvalidOptions
    }
}
