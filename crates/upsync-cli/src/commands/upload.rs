//! Upload command - push changed files to the bucket
//!
//! Provides `upsync upload`, which:
//! 1. Merges command-line flags over the loaded configuration
//! 2. Validates the result and optionally saves it
//! 3. Builds the store client for the configured backend and the header resolver
//! 4. Runs the SyncEngine, cancelling it on Ctrl-C or SIGTERM
//! 5. Prints the report and maps it to an exit status

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use aws_config::{BehaviorVersion, Region};

use upsync_core::config::{Config, StoreBackend, ValidationError};
use upsync_core::domain::HeaderResolver;
use upsync_core::ports::{DryRunStoreClient, StoreClient};
use upsync_store::{HttpStoreClient, S3Options, S3StoreClient};
use upsync_sync::engine::{CacheStatus, RunOutcome, RunReport, SyncEngine, SyncOptions};

use super::CliContext;
use crate::exit::ExitStatus;
use crate::output::{duration_display, plural, OutputFormat, OutputFormatter};

#[derive(Debug, Default, Args)]
pub struct UploadCommand {
    /// Bucket to upload files to
    #[arg(long)]
    pub bucket: Option<String>,

    /// Source directory of the files to upload
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Location of the fingerprint cache
    #[arg(long)]
    pub cache_file: Option<PathBuf>,

    /// Number of concurrent upload workers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Store client to use: s3 or http
    #[arg(long)]
    pub backend: Option<StoreBackend>,

    /// Base URL of the object store
    #[arg(long)]
    pub endpoint: Option<String>,

    /// AWS region of the bucket
    #[arg(long)]
    pub region: Option<String>,

    /// AWS profile to take credentials from
    #[arg(long)]
    pub profile: Option<String>,

    /// Attempts per file before it is rejected
    #[arg(long)]
    pub max_tries: Option<u32>,

    /// Request server-side encryption for every object
    #[arg(long)]
    pub encrypt: bool,

    /// Reuse cached hashes for files whose size and mtime are unchanged
    #[arg(long)]
    pub trust_mtime: bool,

    /// Go through the whole run without uploading or writing the cache
    #[arg(long)]
    pub dry_run: bool,

    /// Do not update the fingerprint cache
    #[arg(long)]
    pub no_cache: bool,

    /// Save the merged options to the configuration file
    #[arg(long)]
    pub save: bool,
}

impl UploadCommand {
    /// Overlay the flags that were given on `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(bucket) = &self.bucket {
            config.upload.bucket = bucket.clone();
        }
        if let Some(source) = &self.source {
            config.upload.source = source.clone();
        }
        if let Some(cache_file) = &self.cache_file {
            config.upload.cache_file = cache_file.clone();
        }
        if let Some(workers) = self.workers {
            config.upload.workers = workers;
        }
        if let Some(backend) = self.backend {
            config.store.backend = backend;
        }
        if let Some(endpoint) = &self.endpoint {
            config.store.endpoint = Some(endpoint.clone());
        }
        if let Some(region) = &self.region {
            config.store.region = Some(region.clone());
        }
        if let Some(profile) = &self.profile {
            config.store.profile = Some(profile.clone());
        }
        if let Some(max_tries) = self.max_tries {
            config.retry.max_tries = max_tries;
        }
        if self.encrypt {
            config.upload.encrypt = true;
        }
        if self.trust_mtime {
            config.upload.trust_mtime = true;
        }
    }

    /// Engine options for `config` with the run-only flags applied
    pub fn sync_options(&self, config: &Config) -> SyncOptions {
        let mut options = SyncOptions::from_config(config);
        options.dry_run = self.dry_run;
        options.update_cache = !self.no_cache;
        options
    }

    pub async fn execute(&self, mut config: Config, ctx: &CliContext) -> Result<ExitStatus> {
        let formatter = ctx.formatter();

        self.apply(&mut config);
        let errors = check(&config);
        if !errors.is_empty() {
            for error in &errors {
                formatter.error(&error.to_string());
            }
            return Ok(ExitStatus::InvalidOptions);
        }

        if self.save {
            config
                .save(&ctx.config_path)
                .with_context(|| format!("Failed to save {}", ctx.config_path.display()))?;
            formatter.info(&format!("Saved options to {}", ctx.config_path.display()));
        }

        let resolver = HeaderResolver::from_config(&config.headers, config.upload.encrypt)
            .context("Invalid header rule")?;
        let store: Arc<dyn StoreClient> = if self.dry_run {
            Arc::new(DryRunStoreClient)
        } else {
            build_store(&config).await?
        };

        let engine = SyncEngine::new(store, resolver, self.sync_options(&config));
        tokio::spawn(shutdown_signal(engine.cancellation_token()));

        if self.dry_run {
            formatter.info("Dry run - nothing will be uploaded and the cache is left alone");
        }
        info!(
            bucket = %config.upload.bucket,
            source = %config.upload.source.display(),
            "Starting upload"
        );

        let report = engine.run().await.context("Upload failed")?;
        print_report(&report, ctx.format, formatter.as_ref());
        Ok(ExitStatus::from_report(&report))
    }
}

/// Store client for the configured backend
///
/// The S3 backend resolves credentials and region through the AWS default
/// chain (environment, shared config and profile, instance metadata).
async fn build_store(config: &Config) -> Result<Arc<dyn StoreClient>> {
    let timeout = Duration::from_secs(config.store.timeout_secs);

    match config.store.backend {
        StoreBackend::S3 => {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = &config.store.region {
                loader = loader.region(Region::new(region.clone()));
            }
            if let Some(profile) = &config.store.profile {
                loader = loader.profile_name(profile);
            }
            let sdk_config = loader.load().await;
            debug!(
                region = ?sdk_config.region(),
                profile = ?config.store.profile,
                endpoint = ?config.store.endpoint,
                "Loaded AWS configuration"
            );

            let options = S3Options {
                endpoint: config.store.endpoint.clone(),
                timeout,
            };
            Ok(Arc::new(S3StoreClient::new(&sdk_config, &options)))
        }
        StoreBackend::Http => {
            let endpoint = config
                .store
                .endpoint
                .as_deref()
                .context("store.endpoint is required by the http backend")?;
            let token = std::env::var(&config.store.token_env)
                .ok()
                .filter(|t| !t.is_empty());
            debug!(
                token_env = %config.store.token_env,
                token_present = token.is_some(),
                "Resolved store credentials"
            );
            let store = HttpStoreClient::new(endpoint, token, timeout)
                .context("Failed to create store client")?;
            Ok(Arc::new(store))
        }
    }
}

/// Config validation plus the filesystem checks that only matter for a run
fn check(config: &Config) -> Vec<ValidationError> {
    let mut errors = config.validate();
    errors.extend(config.validate_paths());
    errors
}

/// Cancels `token` on SIGINT or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), finishing in-flight uploads"),
        _ = terminate => info!("Received SIGTERM, finishing in-flight uploads"),
        _ = token.cancelled() => return,
    }

    token.cancel();
}

fn print_report(report: &RunReport, format: OutputFormat, formatter: &dyn OutputFormatter) {
    if format == OutputFormat::Json {
        match serde_json::to_value(report) {
            Ok(json) => formatter.document(&json),
            Err(e) => formatter.error(&format!("Failed to serialize report: {e}")),
        }
        return;
    }

    if report.cache_was_corrupt {
        formatter.warn("The fingerprint cache was unreadable; every file was uploaded");
    }

    match report.outcome {
        RunOutcome::NothingToDo => {
            formatter.success("Nothing to upload");
            return;
        }
        RunOutcome::Cancelled => formatter.warn(&format!(
            "Interrupted: {} not uploaded",
            plural(report.uploads.abandoned.len(), "file")
        )),
        RunOutcome::Completed | RunOutcome::CompletedWithRejections => {
            formatter.success(&format!(
                "Uploaded {} of {} in {}",
                report.uploaded().len(),
                plural(report.changed, "changed file"),
                duration_display(report.duration_ms)
            ));
        }
    }

    if !report.uploads.retries.is_empty() {
        formatter.info(&format!(
            "Retried:  {}",
            plural(report.uploads.retries.len(), "time")
        ));
    }

    if !report.uploads.failures.is_empty() {
        formatter.error(&format!(
            "{} rejected:",
            plural(report.uploads.failures.len(), "file")
        ));
        for failure in &report.uploads.failures {
            formatter.info(&format!(
                "{} ({} after {}): {}",
                failure.path,
                failure.code,
                plural(failure.attempts as usize, "attempt"),
                failure.message
            ));
        }
    }

    match &report.cache {
        CacheStatus::Written { entries } => {
            formatter.info(&format!("Cache:    {} recorded", plural(*entries, "file")))
        }
        CacheStatus::SkippedDryRun => formatter.info("Cache:    not written (dry run)"),
        CacheStatus::Disabled => formatter.info("Cache:    not updated"),
        CacheStatus::WriteFailed { reason } => formatter.error(&format!(
            "Caching failed: {reason}. Uploaded files will be checked again next run"
        )),
        CacheStatus::Unchanged => {}
    }
}
