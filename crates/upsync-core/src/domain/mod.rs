//! Domain entities and business logic
//!
//! - Newtypes for validated relative paths and content hashes
//! - Fingerprints and fingerprint sets (change detection)
//! - Header rules and the first-match resolver
//! - The shared rejection log
//! - Work items and their upload state machine
//! - Domain-specific error types

pub mod errors;
pub mod fingerprint;
pub mod headers;
pub mod newtypes;
pub mod rejection;
pub mod work_item;

pub use errors::DomainError;
pub use fingerprint::{Fingerprint, FingerprintSet};
pub use headers::{HeaderResolver, HeaderRule, HeaderSet, GZIP_ENCODING, DEFAULT_ENCRYPTION};
pub use newtypes::{ContentHash, RelPath};
pub use rejection::RejectionLog;
pub use work_item::{ItemState, WorkItem};
