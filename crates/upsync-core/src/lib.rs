//! upsync core - domain types and ports for incremental bucket uploads
//!
//! This crate contains:
//! - **Domain entities** - `Fingerprint`, `FingerprintSet`, `WorkItem`, `RejectionLog`
//! - **Header rules** - `HeaderResolver` mapping paths to transfer headers
//! - **Port definitions** - the `StoreClient` trait implemented by transport adapters
//! - **Configuration** - the YAML-backed `Config` shared by the CLI and the engine
//!
//! # Architecture
//!
//! The domain module has no I/O. Scanning, caching and the upload pipeline
//! live in `upsync-sync`; the HTTP transport lives in `upsync-store`.

pub mod config;
pub mod domain;
pub mod ports;
