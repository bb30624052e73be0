//! Object store port (driven/secondary port)
//!
//! The upload pipeline talks to the remote store only through
//! [`StoreClient`]. Adapters map their transport failures onto
//! [`TransferError`], whose [`TransferError::class`] drives the
//! retry-or-reject decision.
//!
//! ## Design Notes
//!
//! - Bodies are streams of [`Bytes`], so a compressor can sit between the
//!   file and the transport without buffering the whole object.
//! - Uses `#[async_trait]` for async trait methods.
//! - Implementations must be safe to call from many workers at once.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::headers::HeaderSet;

/// Streamed request body
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

// ============================================================================
// Requests and receipts
// ============================================================================

/// One object transfer
pub struct StoreRequest {
    /// Target bucket (or container) name
    pub bucket: String,
    /// Object key, the `/`-separated relative path
    pub key: String,
    /// Object content, possibly already compressed
    pub body: BodyStream,
    /// MIME type of the uncompressed content
    pub content_type: Option<String>,
    /// Encoding, caching and encryption directives
    pub headers: HeaderSet,
}

impl fmt::Debug for StoreRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRequest")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// What the store reported after accepting an object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReceipt {
    /// URL or other locator for the stored object
    pub location: String,
    pub etag: Option<String>,
    pub version_id: Option<String>,
}

// ============================================================================
// Errors and classification
// ============================================================================

/// Whether a failed transfer is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Recoverable,
    Fatal,
}

/// A failed transfer of one object
#[derive(Debug, Error)]
pub enum TransferError {
    /// The request or response timed out
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection could not be established or was reset
    #[error("Connection error: {0}")]
    Connection(String),

    /// The store asked us to slow down
    #[error("Throttled by the store, retry after {retry_after:?}")]
    Throttled {
        /// Server-suggested wait, if any
        retry_after: Option<Duration>,
    },

    /// Transient server-side failure
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Credentials missing, expired or invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Credentials valid but not allowed to write here
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bucket or endpoint does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store refused the request as malformed
    #[error("Bad request {status}: {message}")]
    BadRequest { status: u16, message: String },

    /// Reading or compressing the local file failed
    #[error("Local I/O error on {path}: {source}")]
    LocalIo {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Anything without a structured category
    #[error("{0}")]
    Other(String),
}

impl TransferError {
    /// Classify this error for the retry policy
    ///
    /// Structured variants decide directly. [`TransferError::Other`] has no
    /// structured signal and goes through [`classify_message`].
    pub fn class(&self) -> ErrorClass {
        match self {
            TransferError::Timeout(_)
            | TransferError::Connection(_)
            | TransferError::Throttled { .. }
            | TransferError::Server { .. } => ErrorClass::Recoverable,
            TransferError::Unauthorized(_)
            | TransferError::Forbidden(_)
            | TransferError::NotFound(_)
            | TransferError::BadRequest { .. } => ErrorClass::Fatal,
            TransferError::LocalIo { source, .. } => classify_io(source),
            TransferError::Other(message) => classify_message(message),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.class() == ErrorClass::Recoverable
    }

    /// True for credential and permission failures
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            TransferError::Unauthorized(_) | TransferError::Forbidden(_)
        )
    }

    /// Short machine-readable code for reports
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Timeout(_) => "TIMEOUT",
            TransferError::Connection(_) => "CONNECTION",
            TransferError::Throttled { .. } => "THROTTLED",
            TransferError::Server { .. } => "SERVER_ERROR",
            TransferError::Unauthorized(_) => "UNAUTHORIZED",
            TransferError::Forbidden(_) => "FORBIDDEN",
            TransferError::NotFound(_) => "NOT_FOUND",
            TransferError::BadRequest { .. } => "BAD_REQUEST",
            TransferError::LocalIo { .. } => "LOCAL_IO",
            TransferError::Other(_) => "OTHER",
        }
    }
}

/// Local read failures that can plausibly clear up on their own
fn classify_io(err: &io::Error) -> ErrorClass {
    match err.kind() {
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
            ErrorClass::Recoverable
        }
        _ => ErrorClass::Fatal,
    }
}

/// Best-effort classification of a free-text error message
///
/// Used only when a transport gives nothing structured. Matches known
/// substrings for network trouble, throttling, S3 transient error codes and
/// 5xx statuses; everything else is fatal.
pub fn classify_message(message: &str) -> ErrorClass {
    const RECOVERABLE_MARKERS: &[&str] = &[
        // network
        "timeout",
        "timed out",
        "connection",
        "reset by peer",
        "broken pipe",
        "no such host",
        "dial tcp",
        "dns",
        // throttling
        "throttl",
        "slowdown",
        "slow down",
        "too many requests",
        "rate limit",
        // S3 transient codes
        "requesttimeout",
        "internalerror",
        "serviceunavailable",
        // 5xx
        "500",
        "502",
        "503",
        "504",
        "server error",
    ];

    let lowered = message.to_lowercase();
    if RECOVERABLE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        ErrorClass::Recoverable
    } else {
        ErrorClass::Fatal
    }
}

// ============================================================================
// StoreClient trait
// ============================================================================

/// Transfers a single object to the remote store
#[async_trait::async_trait]
pub trait StoreClient: Send + Sync {
    /// Upload one object
    ///
    /// The body is consumed. Implementations must fully drain or drop it
    /// before returning.
    async fn upload(&self, request: StoreRequest) -> Result<StoreReceipt, TransferError>;
}

/// Store client for dry runs: accepts everything, touches nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunStoreClient;

#[async_trait::async_trait]
impl StoreClient for DryRunStoreClient {
    async fn upload(&self, request: StoreRequest) -> Result<StoreReceipt, TransferError> {
        Ok(StoreReceipt {
            location: format!("dry-run://{}/{}", request.bucket, request.key),
            etag: None,
            version_id: None,
        })
    }
}
