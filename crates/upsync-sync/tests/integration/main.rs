//! Integration tests for upsync-sync
//!
//! Drives the engine and the pipeline against a recording in-memory store
//! and real temporary directories.

mod common;

mod test_pipeline;
