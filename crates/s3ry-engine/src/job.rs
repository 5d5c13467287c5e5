use std::path::PathBuf;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::store::{ByteRange, ObjectPage};

/// What a job does. Specs are plain values; retries clone the spec into a
/// fresh job with a fresh sink.
#[derive(Debug, Clone)]
pub(crate) enum JobSpec {
    /// Put a whole object from a local file.
    UploadWhole {
        bucket: String,
        key: String,
        path: PathBuf,
        len: u64,
        content_type: String,
    },
    /// Upload one part of a multipart session, read from `path` at
    /// `offset` on every attempt.
    UploadPart {
        bucket: String,
        key: String,
        upload_id: String,
        part_number: i32,
        path: PathBuf,
        offset: u64,
        len: u64,
    },
    /// Stream a whole object into a local file.
    DownloadWhole {
        bucket: String,
        key: String,
        dest: PathBuf,
        len: u64,
    },
    /// Stream one byte range into its offset of a pre-allocated file.
    DownloadPart {
        bucket: String,
        key: String,
        range: ByteRange,
        dest: PathBuf,
    },
    /// Delete a single object.
    DeleteOne { bucket: String, key: String },
    /// Fetch one listing page.
    ListPage {
        bucket: String,
        token: Option<String>,
    },
}

impl JobSpec {
    /// Operation name for logs.
    pub(crate) fn op_name(&self) -> &'static str {
        match self {
            JobSpec::UploadWhole { .. } => "PutObject",
            JobSpec::UploadPart { .. } => "UploadPart",
            JobSpec::DownloadWhole { .. } => "GetObject",
            JobSpec::DownloadPart { .. } => "GetObjectRange",
            JobSpec::DeleteOne { .. } => "DeleteObject",
            JobSpec::ListPage { .. } => "ListObjectsV2",
        }
    }
}

/// Successful job payload.
#[derive(Debug)]
pub(crate) enum JobOutput {
    /// Bytes moved plus the entity tag the service assigned, if any.
    Transferred { bytes: u64, etag: Option<String> },
    /// A listing page.
    Page(ObjectPage),
    /// A completed deletion.
    Deleted,
}

/// The single result every job delivers on its sink.
#[derive(Debug)]
pub(crate) struct JobResult {
    /// Sequence number within the owning transfer (part number for part
    /// jobs, 0 for singleton jobs).
    pub(crate) seq: u32,
    pub(crate) outcome: Result<JobOutput, StoreError>,
}

/// A unit of work owned by the pool from dequeue to result delivery.
#[derive(Debug)]
pub(crate) struct Job {
    pub(crate) transfer_id: u64,
    pub(crate) seq: u32,
    pub(crate) spec: JobSpec,
    /// Child of the owning transfer's token.
    pub(crate) cancel: CancellationToken,
    result_tx: oneshot::Sender<JobResult>,
}

impl Job {
    /// Build a job and the receiving end of its result sink.
    pub(crate) fn new(
        transfer_id: u64,
        seq: u32,
        spec: JobSpec,
        cancel: CancellationToken,
    ) -> (Self, oneshot::Receiver<JobResult>) {
        let (result_tx, result_rx) = oneshot::channel();
        (
            Self {
                transfer_id,
                seq,
                spec,
                cancel,
                result_tx,
            },
            result_rx,
        )
    }

    /// Deliver the job's one and only result. A dropped receiver means the
    /// orchestrator already gave up on the transfer; that is fine.
    pub(crate) fn finish(self, outcome: Result<JobOutput, StoreError>) {
        let _ = self.result_tx.send(JobResult {
            seq: self.seq,
            outcome,
        });
    }

    /// Deliver a `Cancelled` result without running the job.
    pub(crate) fn finish_cancelled(self) {
        let op = self.spec.op_name();
        self.finish(Err(StoreError::cancelled(op)));
    }
}
