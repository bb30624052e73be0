//! upsync sync - incremental upload engine
//!
//! Provides:
//! - Content fingerprinting of a source tree and the persisted cache
//! - A bounded worker pool that uploads changed files
//! - Exponential-backoff retries through a delay queue
//! - Run orchestration that never records a file it did not upload
//!
//! ## Modules
//!
//! - [`fingerprint_cache`] - scan, load, diff and atomically dump fingerprints
//! - [`retry`] - retry policy (max tries, backoff schedule)
//! - [`scheduler`] - delay queue that feeds retried items back to the workers
//! - [`transfer`] - builds one streamed, optionally gzipped, store request
//! - [`pipeline`] - the worker pool and its accounting
//! - [`engine`] - `run_uploads` / `finalize_cache` orchestration

pub mod engine;
pub mod fingerprint_cache;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod transfer;

use std::path::PathBuf;

use thiserror::Error;

/// Run-level errors. Per-file transfer failures never surface here.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The source tree could not be enumerated or hashed
    #[error("Cannot scan {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted cache exists but cannot be read back
    #[error("Fingerprint cache {path} is corrupt: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    /// Persisting the new cache failed; the previous file is untouched
    #[error("Failed to write fingerprint cache {path}: {source}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error outside scanning and cache persistence
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// A domain-level error propagated from upsync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] upsync_core::domain::DomainError),

    /// A background task panicked or was aborted
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::TaskFailed(err.to_string())
    }
}
