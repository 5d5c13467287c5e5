use std::sync::Arc;

use tokio::io::{AsyncReadExt as _, AsyncSeekExt as _, AsyncWriteExt as _};
use tokio::sync::mpsc;

use s3ry_core::error::ErrorKind;

use crate::error::StoreError;
use crate::job::{Job, JobOutput, JobSpec};
use crate::progress::ProgressSink;
use crate::store::{ObjectBody, ObjectStore};

/// Granularity of streamed download copies and their progress deltas.
const COPY_BUF_LEN: usize = 64 * 1024;

/// One worker: take a job, run it, report idle, repeat until the pool
/// closes the channel. The copy buffer is allocated once per worker and
/// reused across jobs, so steady-state memory is independent of
/// throughput.
pub(crate) async fn run_worker(
    worker_idx: usize,
    store: Arc<dyn ObjectStore>,
    progress: ProgressSink,
    mut rx: mpsc::Receiver<Job>,
    idle_tx: mpsc::UnboundedSender<usize>,
) {
    let mut copy_buf = vec![0u8; COPY_BUF_LEN];

    while let Some(job) = rx.recv().await {
        execute(job, store.as_ref(), &progress, &mut copy_buf).await;
        if idle_tx.send(worker_idx).is_err() {
            break;
        }
    }
}

async fn execute(job: Job, store: &dyn ObjectStore, progress: &ProgressSink, copy_buf: &mut [u8]) {
    let outcome = run_spec(&job, store, progress, copy_buf).await;

    // A cancelled job never reports success, even when the call beat the
    // token to the finish line.
    if job.cancel.is_cancelled() {
        job.finish_cancelled();
    } else {
        job.finish(outcome);
    }
}

fn io_error(op: &'static str, err: std::io::Error) -> StoreError {
    StoreError::new(ErrorKind::Fatal, op, err.to_string())
}

async fn run_spec(
    job: &Job,
    store: &dyn ObjectStore,
    progress: &ProgressSink,
    copy_buf: &mut [u8],
) -> Result<JobOutput, StoreError> {
    match &job.spec {
        JobSpec::UploadWhole {
            bucket,
            key,
            path,
            len,
            content_type,
        } => {
            // Whole-object puts are only issued below the part-size
            // threshold, so this read is bounded.
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| io_error("PutObject", e))?;
            let etag = store
                .put_object(bucket, key, data, content_type, &job.cancel)
                .await?;
            progress.add(job.transfer_id, *len, 1);
            Ok(JobOutput::Transferred {
                bytes: *len,
                etag: Some(etag),
            })
        }

        JobSpec::UploadPart {
            bucket,
            key,
            upload_id,
            part_number,
            path,
            offset,
            len,
        } => {
            // Re-read from disk on every attempt; nothing is held across
            // retry backoffs.
            let mut file = tokio::fs::File::open(path)
                .await
                .map_err(|e| io_error("UploadPart", e))?;
            file.seek(std::io::SeekFrom::Start(*offset))
                .await
                .map_err(|e| io_error("UploadPart", e))?;
            let mut data = vec![0u8; *len as usize];
            file.read_exact(&mut data)
                .await
                .map_err(|e| io_error("UploadPart", e))?;

            let etag = store
                .upload_part(bucket, key, upload_id, *part_number, data, &job.cancel)
                .await?;
            progress.add(job.transfer_id, *len, 1);
            Ok(JobOutput::Transferred {
                bytes: *len,
                etag: Some(etag),
            })
        }

        JobSpec::DownloadWhole {
            bucket,
            key,
            dest,
            len,
        } => {
            let body = store.get_object(bucket, key, None, &job.cancel).await?;
            let file = tokio::fs::File::create(dest)
                .await
                .map_err(|e| io_error("GetObject", e))?;
            let written = copy_body(job, body, file, progress, copy_buf).await?;
            if written != *len {
                progress.discard(job.transfer_id, written);
                return Err(StoreError::new(
                    ErrorKind::Fatal,
                    "GetObject",
                    format!("body ended after {written} of {len} bytes"),
                ));
            }
            progress.add(job.transfer_id, 0, 1);
            Ok(JobOutput::Transferred {
                bytes: written,
                etag: None,
            })
        }

        JobSpec::DownloadPart {
            bucket,
            key,
            range,
            dest,
        } => {
            let body = store
                .get_object(bucket, key, Some(*range), &job.cancel)
                .await?;
            // The orchestrator pre-allocated the file; each part owns a
            // disjoint offset range through its own handle.
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(dest)
                .await
                .map_err(|e| io_error("GetObjectRange", e))?;
            file.seek(std::io::SeekFrom::Start(range.start))
                .await
                .map_err(|e| io_error("GetObjectRange", e))?;

            let expected = range.len();
            let written = copy_body(job, body, file, progress, copy_buf).await?;
            if written != expected {
                progress.discard(job.transfer_id, written);
                return Err(StoreError::new(
                    ErrorKind::Fatal,
                    "GetObjectRange",
                    format!("range body ended after {written} of {expected} bytes"),
                ));
            }
            progress.add(job.transfer_id, 0, 1);
            Ok(JobOutput::Transferred {
                bytes: written,
                etag: None,
            })
        }

        JobSpec::DeleteOne { bucket, key } => {
            store.delete_object(bucket, key, &job.cancel).await?;
            progress.add(job.transfer_id, 0, 1);
            Ok(JobOutput::Deleted)
        }

        JobSpec::ListPage { bucket, token } => {
            let page = store
                .list_objects_page(bucket, token.as_deref(), &job.cancel)
                .await?;
            progress.add(job.transfer_id, 0, 1);
            Ok(JobOutput::Page(page))
        }
    }
}

/// Stream a download body to a file in fixed-size chunks, emitting a
/// progress delta per chunk and observing cancellation between chunks.
/// A failed copy rolls its streamed bytes back off the progress board so
/// the retry starts from a clean count.
async fn copy_body(
    job: &Job,
    mut body: ObjectBody,
    mut file: tokio::fs::File,
    progress: &ProgressSink,
    copy_buf: &mut [u8],
) -> Result<u64, StoreError> {
    let op = job.spec.op_name();
    let mut written = 0u64;

    let outcome = loop {
        if job.cancel.is_cancelled() {
            break Err(StoreError::cancelled(op));
        }
        let n = match body.reader.read(copy_buf).await {
            Ok(n) => n,
            Err(e) => break Err(StoreError::classified(op, None, e.to_string())),
        };
        if n == 0 {
            break match file.flush().await {
                Ok(()) => Ok(written),
                Err(e) => Err(io_error(op, e)),
            };
        }
        if let Err(e) = file.write_all(&copy_buf[..n]).await {
            break Err(io_error(op, e));
        }
        written += n as u64;
        progress.add(job.transfer_id, n as u64, 0);
    };

    if outcome.is_err() {
        progress.discard(job.transfer_id, written);
    }
    outcome
}
