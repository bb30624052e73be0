//! Port definitions
//!
//! Ports are the interfaces the pipeline depends on but whose
//! implementations live in adapter crates.
//!
//! - [`StoreClient`] - transfers one file body to the object store

pub mod store_client;

pub use store_client::{
    BodyStream, DryRunStoreClient, ErrorClass, StoreClient, StoreReceipt, StoreRequest,
    TransferError,
};
