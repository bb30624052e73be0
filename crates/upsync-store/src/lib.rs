//! upsync-store - object store clients
//!
//! Two implementations of [`upsync_core::ports::StoreClient`]:
//!
//! - [`S3StoreClient`] - `aws-sdk-s3` `PutObject` with SigV4 signing, for
//!   Amazon S3 and compatible services that expect signed requests
//! - [`HttpStoreClient`] - `reqwest` path-style `PUT {endpoint}/{bucket}/{key}`
//!   with an optional bearer token, for gateways in front of a store
//!
//! Both classify failures into [`upsync_core::ports::TransferError`]
//! variants through [`response::classify_error`], so the upload pipeline can
//! decide between retrying and rejecting without knowing the transport.

pub mod client;
pub mod response;
pub mod s3;

pub use client::{HttpStoreClient, StoreError};
pub use s3::{S3Options, S3StoreClient};
