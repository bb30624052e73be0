//! Upload pipeline - bounded worker pool over a shared work channel
//!
//! ## Flow
//!
//! ```text
//! seeder ──→ bounded mpsc ──→ W workers ──→ StoreClient
//!                 ▲              │ failure
//!                 │              ▼
//!                 └──── RetryScheduler (DelayQueue)
//! ```
//!
//! Completion is tracked by an outstanding-item counter, not by the channel
//! draining: a retried item is off the channel while its timer runs. When
//! the counter reaches zero the `done` token fires and every worker exits.
//!
//! Cancellation stops seeding and retries; uploads already in flight run
//! to completion. Items that never reached a terminal state are reported
//! as abandoned.
//!
//! A panicking worker stops the whole pool: its item can never settle, so
//! the remaining workers are released and the run fails with
//! [`SyncError::TaskFailed`].

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use upsync_core::domain::{HeaderResolver, RejectionLog, RelPath, WorkItem};
use upsync_core::ports::{ErrorClass, StoreClient, TransferError};

use crate::retry::{RejectReason, RetryDecision, RetryPolicy};
use crate::scheduler::RetryScheduler;
use crate::transfer;
use crate::SyncError;

// ============================================================================
// Context and report types
// ============================================================================

/// Everything a pipeline run needs, passed in explicitly
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn StoreClient>,
    pub resolver: Arc<HeaderResolver>,
    /// Directory the relative paths are resolved against
    pub source_root: PathBuf,
    pub bucket: String,
    /// Number of concurrent workers (at least one is always started)
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Cap on items waiting on a backoff timer
    pub max_pending_retries: usize,
    /// Report what would be sent without reading local files
    pub dry_run: bool,
    pub cancel: CancellationToken,
}

/// One scheduled retry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryRecord {
    pub path: RelPath,
    /// Failed attempts so far, including the one that triggered this retry
    pub attempt: u32,
    #[serde(rename = "delay_ms", serialize_with = "as_millis")]
    pub delay: Duration,
    pub error: String,
}

/// Why a path ended up in the rejection log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub path: RelPath,
    pub attempts: u32,
    pub reason: RejectReason,
    pub class: ErrorClass,
    pub code: String,
    pub message: String,
    pub auth_failure: bool,
}

/// Outcome of one pipeline run
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadReport {
    /// Paths the store accepted, sorted
    pub succeeded: Vec<RelPath>,
    /// Details for every rejected path, sorted by path
    pub failures: Vec<FailureRecord>,
    /// Paths left unfinished by cancellation, sorted
    pub abandoned: Vec<RelPath>,
    /// Retries in the order they were scheduled
    pub retries: Vec<RetryRecord>,
    /// Store calls made per path
    #[serde(skip)]
    pub calls: BTreeMap<RelPath, u32>,
    #[serde(skip)]
    pub rejections: RejectionLog,
    pub cancelled: bool,
}

impl UploadReport {
    /// Paths from the rejection log
    pub fn rejected_paths(&self) -> Vec<RelPath> {
        self.rejections.paths()
    }

    /// Paths that must not be recorded as uploaded: rejected plus abandoned
    pub fn excluded_paths(&self) -> Vec<RelPath> {
        let mut excluded = self.rejected_paths();
        excluded.extend(self.abandoned.iter().cloned());
        excluded.sort();
        excluded.dedup();
        excluded
    }

    /// Number of store calls made for `path`
    pub fn calls_for(&self, path: &RelPath) -> u32 {
        self.calls.get(path).copied().unwrap_or(0)
    }

    /// Retries scheduled for `path`, oldest first
    pub fn retries_for(&self, path: &RelPath) -> Vec<&RetryRecord> {
        self.retries.iter().filter(|r| &r.path == path).collect()
    }

    /// True when there were rejections and every one was an auth failure
    pub fn all_rejections_auth(&self) -> bool {
        !self.failures.is_empty() && self.failures.iter().all(|f| f.auth_failure)
    }
}

fn as_millis<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
}

// ============================================================================
// UploadPipeline
// ============================================================================

/// Uploads a list of paths with a bounded pool of workers
pub struct UploadPipeline {
    ctx: PipelineContext,
}

impl UploadPipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    /// Upload every path and wait until each one is settled
    ///
    /// Paths are seeded in the order given. Per-file failures are contained
    /// in the report; only a panicked task fails the run, after the other
    /// workers have been stopped.
    #[instrument(skip_all, fields(items = paths.len(), workers = self.ctx.workers))]
    pub async fn run(&self, paths: Vec<RelPath>) -> Result<UploadReport, SyncError> {
        if paths.is_empty() {
            debug!("Nothing to upload");
            return Ok(UploadReport::default());
        }

        let workers = self.ctx.workers.max(1);
        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(workers * 2);
        let stop = self.ctx.cancel.child_token();
        let (scheduler, scheduler_handle) =
            RetryScheduler::spawn(work_tx.clone(), self.ctx.max_pending_retries, stop.clone());

        let shared = Arc::new(Shared {
            ctx: self.ctx.clone(),
            rx: Mutex::new(work_rx),
            outstanding: AtomicUsize::new(paths.len()),
            done: CancellationToken::new(),
            rejections: RejectionLog::new(),
            scheduler,
            ledger: StdMutex::new(Ledger::default()),
        });

        info!(items = paths.len(), workers, "Starting upload pipeline");
        let seeder = tokio::spawn(seed(paths.clone(), work_tx, stop.clone()));
        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(worker(id, shared.clone()));
        }

        let mut failure: Option<SyncError> = None;
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                if failure.is_none() {
                    error!(error = %e, "Upload worker failed, stopping pipeline");
                    shared.done.cancel();
                    stop.cancel();
                    failure = Some(e.into());
                }
            }
        }
        stop.cancel();
        let seeded = seeder.await;
        let scheduled = scheduler_handle.await;
        if let Some(err) = failure {
            return Err(err);
        }
        seeded?;
        scheduled?;

        Ok(shared.report(paths))
    }
}

async fn seed(paths: Vec<RelPath>, tx: mpsc::Sender<WorkItem>, stop: CancellationToken) {
    for path in paths {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                debug!("Seeding stopped");
                return;
            }
            sent = tx.send(WorkItem::new(path)) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }
    debug!("Seeding complete");
}

async fn worker(id: usize, shared: Arc<Shared>) {
    loop {
        let next = {
            let mut rx = shared.rx.lock().await;
            tokio::select! {
                biased;
                _ = shared.ctx.cancel.cancelled() => None,
                _ = shared.done.cancelled() => None,
                item = rx.recv() => item,
            }
        };
        let Some(item) = next else { break };
        shared.process(item).await;
    }
    debug!(worker = id, "Worker exiting");
}

// ============================================================================
// Shared worker state
// ============================================================================

#[derive(Default)]
struct Ledger {
    succeeded: Vec<RelPath>,
    failures: Vec<FailureRecord>,
    retries: Vec<RetryRecord>,
    calls: BTreeMap<RelPath, u32>,
}

struct Shared {
    ctx: PipelineContext,
    rx: Mutex<mpsc::Receiver<WorkItem>>,
    outstanding: AtomicUsize,
    done: CancellationToken,
    rejections: RejectionLog,
    scheduler: RetryScheduler,
    ledger: StdMutex<Ledger>,
}

impl Shared {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn process(&self, mut item: WorkItem) {
        if let Err(e) = item.start() {
            warn!(path = %item.path(), error = %e, "Unexpected item state");
        }
        let path = item.path().clone();
        let headers = item.resolve_headers(&self.ctx.resolver).clone();
        *self.ledger().calls.entry(path.clone()).or_insert(0) += 1;

        debug!(path = %path, attempt = item.attempts() + 1, "Uploading");
        let store = self.ctx.store.as_ref();
        let result = if self.ctx.dry_run {
            transfer::preview_file(store, &self.ctx.bucket, &path, headers).await
        } else {
            transfer::upload_file(store, &self.ctx.source_root, &self.ctx.bucket, &path, headers)
                .await
        };

        match result {
            Ok(receipt) => {
                if let Err(e) = item.succeed() {
                    warn!(path = %path, error = %e, "Unexpected item state");
                }
                info!(path = %path, location = %receipt.location, "Uploaded");
                self.ledger().succeeded.push(path);
                self.finish_one();
            }
            Err(err) => self.handle_failure(item, err),
        }
    }

    fn handle_failure(&self, mut item: WorkItem, err: TransferError) {
        let attempts = item.record_attempt(err.to_string());

        let delay = match self.ctx.retry.decide(attempts, &err) {
            RetryDecision::Reject(reason) => return self.reject(item, &err, reason),
            RetryDecision::Retry { delay } => delay,
        };

        if self.ctx.cancel.is_cancelled() {
            warn!(path = %item.path(), error = %err, "Upload failed after cancellation, not retrying");
            return;
        }

        if let Err(e) = item.schedule_retry() {
            warn!(path = %item.path(), error = %e, "Unexpected item state");
        }
        let record = RetryRecord {
            path: item.path().clone(),
            attempt: attempts,
            delay,
            error: err.to_string(),
        };

        match self.scheduler.schedule(item, delay) {
            Ok(()) => {
                warn!(
                    path = %record.path,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Upload failed, retrying"
                );
                self.ledger().retries.push(record);
            }
            Err(item) => self.reject(item, &err, RejectReason::Overflow),
        }
    }

    fn reject(&self, mut item: WorkItem, err: &TransferError, reason: RejectReason) {
        if let Err(e) = item.reject() {
            warn!(path = %item.path(), error = %e, "Unexpected item state");
        }
        error!(
            path = %item.path(),
            attempts = item.attempts(),
            code = err.code(),
            reason = ?reason,
            error = %err,
            "Upload rejected"
        );

        self.rejections.add(item.path().clone());
        self.ledger().failures.push(FailureRecord {
            path: item.path().clone(),
            attempts: item.attempts(),
            reason,
            class: err.class(),
            code: err.code().to_string(),
            message: err.to_string(),
            auth_failure: err.is_auth_failure(),
        });
        self.finish_one();
    }

    fn finish_one(&self) {
        if self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("All items settled");
            self.done.cancel();
        }
    }

    fn report(&self, seeded: Vec<RelPath>) -> UploadReport {
        let ledger = std::mem::take(&mut *self.ledger());

        let mut succeeded = ledger.succeeded;
        succeeded.sort();
        let mut failures = ledger.failures;
        failures.sort_by(|a, b| a.path.cmp(&b.path));

        let settled: HashSet<&RelPath> = succeeded.iter().collect();
        let mut abandoned: Vec<RelPath> = seeded
            .into_iter()
            .filter(|p| !settled.contains(p) && !self.rejections.contains(p))
            .collect();
        abandoned.sort();

        info!(
            succeeded = succeeded.len(),
            rejected = failures.len(),
            abandoned = abandoned.len(),
            retries = ledger.retries.len(),
            "Upload pipeline finished"
        );

        UploadReport {
            succeeded,
            failures,
            abandoned,
            retries: ledger.retries,
            calls: ledger.calls,
            rejections: self.rejections.clone(),
            cancelled: self.ctx.cancel.is_cancelled(),
        }
    }
}
