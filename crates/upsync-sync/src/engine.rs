//! Incremental upload engine
//!
//! The [`SyncEngine`] runs one pass over a source tree.
//!
//! ## Run Flow
//!
//! 1. **Plan**: load the fingerprint cache, scan the tree, diff
//! 2. **Upload** ([`SyncEngine::run_uploads`]): push changed paths through
//!    the [`UploadPipeline`] and wait for every item to settle
//! 3. **Finalize** ([`SyncEngine::finalize_cache`]): persist the scanned
//!    fingerprints minus rejected and abandoned paths
//!
//! A corrupt cache is treated as empty (full re-upload); the corrupt file is
//! only replaced once the new cache has been written successfully. A failed
//! cache write does not undo any upload and is reported distinctly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use upsync_core::config::Config;
use upsync_core::domain::{FingerprintSet, HeaderResolver, RelPath};
use upsync_core::ports::{DryRunStoreClient, StoreClient};

use crate::fingerprint_cache::{self, ScanOptions};
use crate::pipeline::{PipelineContext, UploadPipeline, UploadReport};
use crate::retry::RetryPolicy;
use crate::SyncError;

// ============================================================================
// Options
// ============================================================================

/// Settings for one engine
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub source: PathBuf,
    pub bucket: String,
    pub cache_file: PathBuf,
    pub workers: usize,
    /// Run the full state machine against a no-op store and skip the cache write
    pub dry_run: bool,
    /// Persist the new fingerprint set after uploading
    pub update_cache: bool,
    /// Reuse cached hashes when size and mtime match
    pub trust_mtime: bool,
    pub retry: RetryPolicy,
    pub max_pending_retries: usize,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source: config.upload.source.clone(),
            bucket: config.upload.bucket.clone(),
            cache_file: config.upload.cache_file.clone(),
            workers: config.upload.workers,
            dry_run: false,
            update_cache: true,
            trust_mtime: config.upload.trust_mtime,
            retry: RetryPolicy::from_config(&config.retry),
            max_pending_retries: config.retry.max_pending_retries,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Result of change detection
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub current: FingerprintSet,
    pub previous: FingerprintSet,
    /// Changed or new paths, sorted
    pub changed: Vec<RelPath>,
    /// The previous cache could not be parsed and was ignored
    pub cache_was_corrupt: bool,
}

/// How the run ended, as far as uploads are concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// No changed files
    NothingToDo,
    /// Every changed file was uploaded
    Completed,
    /// Some files were rejected; the rest were uploaded
    CompletedWithRejections,
    /// Cancelled before every file settled
    Cancelled,
}

/// What happened to the fingerprint cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CacheStatus {
    /// Nothing changed, the file was left alone
    Unchanged,
    Written { entries: usize },
    SkippedDryRun,
    Disabled,
    /// Uploads stand, but the next run will re-check them
    WriteFailed { reason: String },
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub dry_run: bool,
    /// Files found in the source tree
    pub scanned: usize,
    /// Files that needed uploading
    pub changed: usize,
    pub cache_was_corrupt: bool,
    pub outcome: RunOutcome,
    pub cache: CacheStatus,
    pub uploads: UploadReport,
}

impl RunReport {
    pub fn uploaded(&self) -> &[RelPath] {
        &self.uploads.succeeded
    }

    pub fn rejected_count(&self) -> usize {
        self.uploads.failures.len()
    }

    pub fn cache_write_failed(&self) -> bool {
        matches!(self.cache, CacheStatus::WriteFailed { .. })
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Runs incremental upload passes
pub struct SyncEngine {
    store: Arc<dyn StoreClient>,
    resolver: Arc<HeaderResolver>,
    options: SyncOptions,
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Creates a new engine
    ///
    /// In dry-run mode `store` is replaced by [`DryRunStoreClient`].
    pub fn new(store: Arc<dyn StoreClient>, resolver: HeaderResolver, options: SyncOptions) -> Self {
        let store: Arc<dyn StoreClient> = if options.dry_run {
            info!("Dry run: no object will be written");
            Arc::new(DryRunStoreClient)
        } else {
            store
        };

        Self {
            store,
            resolver: Arc::new(resolver),
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels the current and future runs
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Plan, upload and finalize
    ///
    /// # Errors
    /// Only run-level failures: [`SyncError::Scan`] or a panicked task. A
    /// failed cache write is reported as [`CacheStatus::WriteFailed`].
    pub async fn run(&self) -> Result<RunReport, SyncError> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "sync_run",
            %run_id,
            bucket = %self.options.bucket,
            dry_run = self.options.dry_run
        );
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunReport, SyncError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(source = %self.options.source.display(), "Starting upload run");

        let plan = self.plan().await?;

        let (outcome, cache, uploads) = if plan.changed.is_empty() {
            info!("Nothing to do");
            (RunOutcome::NothingToDo, CacheStatus::Unchanged, UploadReport::default())
        } else {
            let uploads = self.run_uploads(plan.changed.clone()).await?;
            let cache = match self.finalize_cache(&plan.current, &uploads).await {
                Ok(status) => status,
                Err(err @ SyncError::CacheWrite { .. }) => {
                    error!(error = %err, "Cache write failed; uploaded files will be re-checked next run");
                    CacheStatus::WriteFailed {
                        reason: err.to_string(),
                    }
                }
                Err(err) => return Err(err),
            };

            let outcome = if uploads.cancelled && !uploads.abandoned.is_empty() {
                RunOutcome::Cancelled
            } else if uploads.rejections.is_empty() {
                RunOutcome::Completed
            } else {
                RunOutcome::CompletedWithRejections
            };
            (outcome, cache, uploads)
        };

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms: u64::try_from(clock.elapsed().as_millis()).unwrap_or(u64::MAX),
            dry_run: self.options.dry_run,
            scanned: plan.current.len(),
            changed: plan.changed.len(),
            cache_was_corrupt: plan.cache_was_corrupt,
            outcome,
            cache,
            uploads,
        };

        info!(
            outcome = ?report.outcome,
            uploaded = report.uploaded().len(),
            rejected = report.rejected_count(),
            duration_ms = report.duration_ms,
            "Upload run finished"
        );
        Ok(report)
    }

    /// Load the cache, scan the source tree and diff the two
    pub async fn plan(&self) -> Result<RunPlan, SyncError> {
        let cache_file = &self.options.cache_file;

        let (previous, cache_was_corrupt) = match fingerprint_cache::load(cache_file).await {
            Ok(set) => (set, false),
            Err(err @ SyncError::CacheCorrupt { .. }) => {
                warn!(error = %err, "Ignoring corrupt fingerprint cache; every file will be uploaded");
                (FingerprintSet::new(), true)
            }
            Err(err) => return Err(err),
        };

        let options = ScanOptions {
            exclude: vec![cache_file.clone(), fingerprint_cache::temp_path(cache_file)],
            reuse: self.options.trust_mtime.then(|| previous.clone()),
        };
        let current = fingerprint_cache::compute_current(&self.options.source, options).await?;
        let changed = fingerprint_cache::diff(&current, &previous);

        info!(
            scanned = current.len(),
            cached = previous.len(),
            changed = changed.len(),
            "Change detection complete"
        );

        Ok(RunPlan {
            current,
            previous,
            changed,
            cache_was_corrupt,
        })
    }

    /// Upload `changed` and wait until each path is uploaded, rejected or abandoned
    pub async fn run_uploads(&self, changed: Vec<RelPath>) -> Result<UploadReport, SyncError> {
        let pipeline = UploadPipeline::new(PipelineContext {
            store: self.store.clone(),
            resolver: self.resolver.clone(),
            source_root: self.options.source.clone(),
            bucket: self.options.bucket.clone(),
            workers: self.options.workers,
            retry: self.options.retry,
            max_pending_retries: self.options.max_pending_retries,
            dry_run: self.options.dry_run,
            cancel: self.cancel.clone(),
        });
        pipeline.run(changed).await
    }

    /// Persist `current` minus every path the uploads did not complete
    ///
    /// Skipped entirely on dry runs and when cache updates are disabled.
    pub async fn finalize_cache(
        &self,
        current: &FingerprintSet,
        uploads: &UploadReport,
    ) -> Result<CacheStatus, SyncError> {
        if self.options.dry_run {
            info!("Dry run: fingerprint cache not written");
            return Ok(CacheStatus::SkippedDryRun);
        }
        if !self.options.update_cache {
            info!("Cache updates disabled");
            return Ok(CacheStatus::Disabled);
        }

        let excluded = uploads.excluded_paths();
        let final_set = current.reject(&excluded);
        fingerprint_cache::dump(&final_set, &self.options.cache_file).await?;

        info!(
            entries = final_set.len(),
            excluded = excluded.len(),
            path = %self.options.cache_file.display(),
            "Fingerprint cache written"
        );
        Ok(CacheStatus::Written {
            entries: final_set.len(),
        })
    }
}
