//! Integration tests for upsync-store
//!
//! Uses wiremock to stand in for an S3-compatible endpoint.

mod common;

mod test_s3;
mod test_upload;
