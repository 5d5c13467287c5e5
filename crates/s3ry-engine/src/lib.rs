#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Concurrent transfer engine for `s3ry`: a bounded worker pool executing
//! parallel object-transfer jobs against an S3-compatible store, with
//! multipart orchestration, classified retries, and a rate-limited
//! progress bus for the UI.

/// Public API for the engine crate.
pub mod api;

mod engine;
mod error;
mod job;
mod ops;
mod pool;
mod progress;
mod store;
mod transfer;
mod worker;

pub use api::{
    BucketInfo, ByteRange, Engine, EngineConfig, EngineSnapshot, ObjectBody, ObjectInfo,
    ObjectPage, ObjectStore, PartTag, ProgressUpdate, RetryPolicy, S3Store, S3StoreConfig,
    StoreError, StoreResult, TransferError, TransferSummary, UploadCandidate,
};
