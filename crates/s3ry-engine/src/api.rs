//! Public API types for the `s3ry` transfer engine.

use std::time::Duration;

pub use crate::engine::Engine;
pub use crate::error::{RetryPolicy, StoreError};
pub use crate::ops::UploadCandidate;
pub use crate::progress::{EngineSnapshot, ProgressUpdate};
pub use crate::store::{
    BucketInfo, ByteRange, ObjectBody, ObjectInfo, ObjectPage, ObjectStore, PartTag, S3Store,
    S3StoreConfig, StoreResult,
};
pub use crate::transfer::{TransferError, TransferSummary};

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of pool workers. Clamped to at least 1.
    pub workers: usize,
    /// Capacity of the pool's job inbox; submission back-pressures here.
    pub inbox_capacity: usize,
    /// Multipart part size in bytes. Objects at or below this transfer
    /// whole.
    pub part_size: u64,
    /// Retry policy for `Throttled`/`Transient` failures.
    pub retry: RetryPolicy,
    /// Progress coalescing window (one update per transfer per window).
    pub progress_window: Duration,
}

impl EngineConfig {
    /// Default inbox capacity.
    pub const DEFAULT_INBOX_CAPACITY: usize = 256;

    /// Default multipart part size (8 MiB).
    pub const DEFAULT_PART_SIZE: u64 = 8 * 1024 * 1024;

    /// Default progress coalescing window (~60 updates/s).
    pub const DEFAULT_PROGRESS_WINDOW: Duration = Duration::from_millis(16);
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            inbox_capacity: Self::DEFAULT_INBOX_CAPACITY,
            part_size: Self::DEFAULT_PART_SIZE,
            retry: RetryPolicy::default(),
            progress_window: Self::DEFAULT_PROGRESS_WINDOW,
        }
    }
}
