use std::collections::{HashMap, VecDeque};
use std::path::Path;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use s3ry_core::error::ErrorKind;

use crate::error::{RetryPolicy, StoreError};
use crate::job::{Job, JobOutput, JobSpec};
use crate::pool::{SubmitRejected, WorkerPool};
use crate::progress::ProgressSink;
use crate::store::{ByteRange, ObjectStore, PartTag};

/// Outcome of one completed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    /// Engine-assigned transfer id.
    pub transfer_id: u64,
    /// Total bytes moved, summed over successful part results.
    pub bytes: u64,
    /// Number of parts (1 for whole-object transfers).
    pub parts: u32,
    /// Retries spent across all parts.
    pub retries: u32,
    /// Final entity tag, when the service assigned one.
    pub etag: Option<String>,
}

/// A failed transfer: the first permanent error, plus every part that
/// ended without success, for diagnostics.
#[derive(Debug, thiserror::Error)]
#[error("{first}")]
pub struct TransferError {
    /// First permanent failure observed.
    pub first: StoreError,
    /// Sequence numbers of all parts that did not succeed.
    pub failed_parts: Vec<u32>,
}

impl TransferError {
    /// Classified kind of the first permanent failure.
    pub fn kind(&self) -> ErrorKind {
        self.first.kind
    }
}

/// Shared context for one orchestrated transfer.
pub(crate) struct TransferContext<'a> {
    pub(crate) store: &'a dyn ObjectStore,
    pub(crate) pool: &'a WorkerPool,
    pub(crate) progress: ProgressSink,
    pub(crate) policy: RetryPolicy,
    pub(crate) part_size: u64,
}

/// Partition `[0, size)` into 1-based contiguous parts of `part_size`
/// bytes, last part possibly shorter. Empty for zero-byte objects.
pub(crate) fn plan_parts(size: u64, part_size: u64) -> Vec<ByteRange> {
    debug_assert!(part_size > 0);
    let mut parts = Vec::new();
    let mut start = 0u64;
    while start < size {
        let end = (start + part_size - 1).min(size - 1);
        parts.push(ByteRange::new(start, end));
        start = end + 1;
    }
    parts
}

/// Retry a direct (non-pooled) store call under the policy.
pub(crate) async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut call: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if policy.should_retry(err.kind, attempt) && !cancel.is_cancelled() => {
                let delay = policy.delay(attempt);
                attempt += 1;
                tracing::debug!(
                    op = err.op,
                    kind = %err.kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying storage call"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StoreError::cancelled(err.op)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Debug)]
struct PartSuccess {
    seq: u32,
    bytes: u64,
    etag: Option<String>,
}

/// Drive a set of part jobs through the pool to terminal state.
///
/// Submits in sequence order (bounded by the pool inbox), collects results
/// as they land, resubmits `Throttled`/`Transient` failures under the
/// policy, and on the first permanent failure cancels the transfer's
/// remaining work before reporting.
async fn run_parts(
    ctx: &TransferContext<'_>,
    transfer_id: u64,
    specs: Vec<(u32, JobSpec)>,
    cancel: &CancellationToken,
) -> Result<(Vec<PartSuccess>, u32), TransferError> {
    let total = specs.len();
    let op_tag = specs
        .first()
        .map(|(_, spec)| spec.op_name())
        .unwrap_or("Transfer");

    let mut templates: HashMap<u32, JobSpec> = HashMap::new();
    let mut queue: VecDeque<(u32, u32)> = VecDeque::new(); // (seq, attempt)
    for (seq, spec) in specs {
        templates.insert(seq, spec);
        queue.push_back((seq, 0));
    }

    // Sinks resolve to (seq, attempt, outcome); retry timers to (seq, attempt).
    let mut sinks: JoinSet<(u32, u32, Result<JobOutput, StoreError>)> = JoinSet::new();
    let mut timers: JoinSet<(u32, u32)> = JoinSet::new();
    let mut retry_seqs: std::collections::HashSet<u32> = std::collections::HashSet::new();
    let mut in_flight: usize = 0;

    let mut successes: Vec<PartSuccess> = Vec::new();
    let mut failed: Vec<(u32, StoreError)> = Vec::new();
    let mut first_error: Option<StoreError> = None;
    let mut retries: u32 = 0;

    while successes.len() + failed.len() < total {
        let giving_up = first_error.is_some() || cancel.is_cancelled();

        if giving_up {
            // Stop submitting; everything not yet terminal is cancelled.
            while let Some((seq, _)) = queue.pop_front() {
                failed.push((seq, StoreError::cancelled(op_tag)));
            }
            if !retry_seqs.is_empty() {
                timers.abort_all();
                while timers.join_next().await.is_some() {}
                for seq in retry_seqs.drain() {
                    failed.push((seq, StoreError::cancelled(op_tag)));
                }
            }
            if in_flight == 0 {
                break;
            }
        } else {
            // Top up the pool without blocking result collection.
            while let Some((seq, attempt)) = queue.pop_front() {
                let spec = templates.get(&seq).expect("part template").clone();
                let (job, rx) = Job::new(transfer_id, seq, spec, cancel.child_token());
                match ctx.pool.try_submit(job) {
                    Ok(()) => {
                        in_flight += 1;
                        sinks.spawn(async move {
                            match rx.await {
                                Ok(result) => (seq, attempt, result.outcome),
                                Err(_) => (seq, attempt, Err(StoreError::cancelled("Transfer"))),
                            }
                        });
                    }
                    Err(SubmitRejected::Full(_)) => {
                        queue.push_front((seq, attempt));
                        break;
                    }
                    Err(SubmitRejected::Closed(_)) => {
                        queue.push_front((seq, attempt));
                        cancel.cancel();
                        break;
                    }
                }
            }

            // Inbox full of other transfers' work and nothing of ours is
            // running: lean on submit back-pressure for one job.
            if in_flight == 0 && retry_seqs.is_empty() {
                if let Some((seq, attempt)) = queue.pop_front() {
                    let spec = templates.get(&seq).expect("part template").clone();
                    let (job, rx) = Job::new(transfer_id, seq, spec, cancel.child_token());
                    ctx.pool.submit(job).await;
                    in_flight += 1;
                    sinks.spawn(async move {
                        match rx.await {
                            Ok(result) => (seq, attempt, result.outcome),
                            Err(_) => (seq, attempt, Err(StoreError::cancelled("Transfer"))),
                        }
                    });
                }
            }
        }

        if in_flight == 0 && retry_seqs.is_empty() {
            continue;
        }

        let (seq, attempt, outcome) = tokio::select! {
            joined = sinks.join_next(), if in_flight > 0 => {
                in_flight -= 1;
                match joined {
                    Some(Ok(entry)) => entry,
                    _ => continue,
                }
            }
            joined = timers.join_next(), if !retry_seqs.is_empty() => {
                if let Some(Ok((seq, attempt))) = joined {
                    retry_seqs.remove(&seq);
                    queue.push_back((seq, attempt));
                }
                continue;
            }
        };

        match outcome {
            Ok(JobOutput::Transferred { bytes, etag }) => {
                successes.push(PartSuccess { seq, bytes, etag });
            }
            Ok(JobOutput::Deleted) => {
                successes.push(PartSuccess {
                    seq,
                    bytes: 0,
                    etag: None,
                });
            }
            Ok(_) => {
                // Part jobs only ever transfer bytes.
                failed.push((
                    seq,
                    StoreError::new(ErrorKind::Fatal, op_tag, "unexpected job output"),
                ));
                first_error.get_or_insert_with(|| {
                    StoreError::new(ErrorKind::Fatal, op_tag, "unexpected job output")
                });
                cancel.cancel();
            }
            Err(err) => {
                let may_retry = first_error.is_none()
                    && !cancel.is_cancelled()
                    && ctx.policy.should_retry(err.kind, attempt);
                if may_retry {
                    retries += 1;
                    let delay = ctx.policy.delay(attempt);
                    tracing::debug!(
                        transfer_id,
                        part = seq,
                        kind = %err.kind,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying part"
                    );
                    retry_seqs.insert(seq);
                    timers.spawn(async move {
                        tokio::time::sleep(delay).await;
                        (seq, attempt + 1)
                    });
                } else {
                    first_error.get_or_insert_with(|| err.clone());
                    failed.push((seq, err));
                    // Permanent failure poisons the whole transfer.
                    cancel.cancel();
                }
            }
        }
    }

    if let Some(first) = first_error {
        let mut failed_parts: Vec<u32> = failed.iter().map(|(seq, _)| *seq).collect();
        failed_parts.sort_unstable();
        failed_parts.dedup();
        Err(TransferError {
            first,
            failed_parts,
        })
    } else if !failed.is_empty() {
        let mut failed_parts: Vec<u32> = failed.iter().map(|(seq, _)| *seq).collect();
        failed_parts.sort_unstable();
        failed_parts.dedup();
        let first = failed.into_iter().next().map(|(_, err)| err).expect("nonempty");
        Err(TransferError {
            first,
            failed_parts,
        })
    } else {
        Ok((successes, retries))
    }
}

/// Run a batch of independent jobs (e.g. deletions) with the same retry,
/// cancellation, and partial-failure behavior as transfer parts. Returns
/// the number of successful jobs.
pub(crate) async fn run_batch(
    ctx: &TransferContext<'_>,
    transfer_id: u64,
    specs: Vec<(u32, JobSpec)>,
    cancel: &CancellationToken,
) -> Result<u32, TransferError> {
    let (successes, _retries) = run_parts(ctx, transfer_id, specs, cancel).await?;
    Ok(successes.len() as u32)
}

/// Upload one local file to `bucket/key`, splitting into a multipart
/// session when it exceeds the part size.
pub(crate) async fn upload_object(
    ctx: &TransferContext<'_>,
    transfer_id: u64,
    bucket: &str,
    key: &str,
    path: &Path,
    size: u64,
    content_type: &str,
    cancel: &CancellationToken,
) -> Result<TransferSummary, TransferError> {
    let parts = if size <= ctx.part_size {
        1
    } else {
        plan_parts(size, ctx.part_size).len()
    };
    ctx.progress
        .transfer_started(transfer_id, key, size, parts as u64);

    let result = upload_inner(ctx, transfer_id, bucket, key, path, size, content_type, cancel).await;
    ctx.progress.transfer_finished(transfer_id);
    result
}

#[allow(clippy::too_many_arguments)]
async fn upload_inner(
    ctx: &TransferContext<'_>,
    transfer_id: u64,
    bucket: &str,
    key: &str,
    path: &Path,
    size: u64,
    content_type: &str,
    cancel: &CancellationToken,
) -> Result<TransferSummary, TransferError> {
    if size <= ctx.part_size {
        let spec = JobSpec::UploadWhole {
            bucket: bucket.to_string(),
            key: key.to_string(),
            path: path.to_path_buf(),
            len: size,
            content_type: content_type.to_string(),
        };
        let (successes, retries) = run_parts(ctx, transfer_id, vec![(0, spec)], cancel).await?;
        let etag = successes.into_iter().next().and_then(|s| s.etag);
        return Ok(TransferSummary {
            transfer_id,
            bytes: size,
            parts: 1,
            retries,
            etag,
        });
    }

    let upload_id = with_retries(&ctx.policy, cancel, || {
        ctx.store.create_multipart(bucket, key, content_type, cancel)
    })
    .await
    .map_err(|err| TransferError {
        first: err,
        failed_parts: Vec::new(),
    })?;

    let ranges = plan_parts(size, ctx.part_size);
    let specs: Vec<(u32, JobSpec)> = ranges
        .iter()
        .enumerate()
        .map(|(idx, range)| {
            let part_number = idx as u32 + 1;
            (
                part_number,
                JobSpec::UploadPart {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    upload_id: upload_id.clone(),
                    part_number: part_number as i32,
                    path: path.to_path_buf(),
                    offset: range.start,
                    len: range.len(),
                },
            )
        })
        .collect();
    let part_count = specs.len() as u32;

    match run_parts(ctx, transfer_id, specs, cancel).await {
        Ok((successes, retries)) => {
            let mut tags = Vec::with_capacity(successes.len());
            let mut bytes = 0u64;
            for success in &successes {
                bytes += success.bytes;
                let Some(etag) = success.etag.clone() else {
                    abort_session(ctx, bucket, key, &upload_id).await;
                    return Err(TransferError {
                        first: StoreError::new(
                            ErrorKind::Fatal,
                            "UploadPart",
                            format!("part {} returned no entity tag", success.seq),
                        ),
                        failed_parts: vec![success.seq],
                    });
                };
                tags.push(PartTag {
                    part_number: success.seq as i32,
                    etag,
                });
            }
            tags.sort_by_key(|t| t.part_number);

            match with_retries(&ctx.policy, cancel, || {
                ctx.store
                    .complete_multipart(bucket, key, &upload_id, &tags, cancel)
            })
            .await
            {
                Ok(etag) => Ok(TransferSummary {
                    transfer_id,
                    bytes,
                    parts: part_count,
                    retries,
                    etag: Some(etag),
                }),
                Err(err) => {
                    abort_session(ctx, bucket, key, &upload_id).await;
                    Err(TransferError {
                        first: err,
                        failed_parts: Vec::new(),
                    })
                }
            }
        }
        Err(err) => {
            abort_session(ctx, bucket, key, &upload_id).await;
            Err(err)
        }
    }
}

/// Best-effort session abort with a fresh token, so cleanup still runs
/// after the transfer's own token is cancelled.
async fn abort_session(ctx: &TransferContext<'_>, bucket: &str, key: &str, upload_id: &str) {
    let cleanup_token = CancellationToken::new();
    if let Err(err) = ctx
        .store
        .abort_multipart(bucket, key, upload_id, &cleanup_token)
        .await
    {
        tracing::warn!(bucket, key, upload_id, error = %err, "failed to abort multipart session");
    }
}

/// Download `bucket/key` (of known `size`) into `dest`, splitting into
/// ranged parts over a pre-allocated file when it exceeds the part size.
pub(crate) async fn download_object(
    ctx: &TransferContext<'_>,
    transfer_id: u64,
    bucket: &str,
    key: &str,
    size: u64,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<TransferSummary, TransferError> {
    let parts = if size <= ctx.part_size {
        1
    } else {
        plan_parts(size, ctx.part_size).len()
    };
    ctx.progress
        .transfer_started(transfer_id, key, size, parts as u64);

    let result = download_inner(ctx, transfer_id, bucket, key, size, dest, cancel).await;
    ctx.progress.transfer_finished(transfer_id);

    if result.is_err() {
        // Never leave a partial file behind.
        if let Err(err) = tokio::fs::remove_file(dest).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dest = %dest.display(), error = %err, "failed to remove partial download");
            }
        }
    }
    result
}

async fn download_inner(
    ctx: &TransferContext<'_>,
    transfer_id: u64,
    bucket: &str,
    key: &str,
    size: u64,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<TransferSummary, TransferError> {
    if size <= ctx.part_size {
        let spec = JobSpec::DownloadWhole {
            bucket: bucket.to_string(),
            key: key.to_string(),
            dest: dest.to_path_buf(),
            len: size,
        };
        let (successes, retries) = run_parts(ctx, transfer_id, vec![(0, spec)], cancel).await?;
        let bytes = successes.iter().map(|s| s.bytes).sum();
        return Ok(TransferSummary {
            transfer_id,
            bytes,
            parts: 1,
            retries,
            etag: None,
        });
    }

    // Pre-allocate so every part can write at its own offset.
    let file = tokio::fs::File::create(dest).await.map_err(|err| TransferError {
        first: StoreError::new(ErrorKind::Fatal, "GetObjectRange", err.to_string()),
        failed_parts: Vec::new(),
    })?;
    file.set_len(size).await.map_err(|err| TransferError {
        first: StoreError::new(ErrorKind::Fatal, "GetObjectRange", err.to_string()),
        failed_parts: Vec::new(),
    })?;
    drop(file);

    let ranges = plan_parts(size, ctx.part_size);
    let specs: Vec<(u32, JobSpec)> = ranges
        .iter()
        .enumerate()
        .map(|(idx, range)| {
            (
                idx as u32 + 1,
                JobSpec::DownloadPart {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    range: *range,
                    dest: dest.to_path_buf(),
                },
            )
        })
        .collect();
    let part_count = specs.len() as u32;

    let (successes, retries) = run_parts(ctx, transfer_id, specs, cancel).await?;
    let bytes = successes.iter().map(|s| s.bytes).sum();
    Ok(TransferSummary {
        transfer_id,
        bytes,
        parts: part_count,
        retries,
        etag: None,
    })
}

#[cfg(test)]
mod tests {
    use super::plan_parts;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn zero_byte_objects_need_no_parts() {
        assert!(plan_parts(0, 8 * MIB).is_empty());
    }

    #[test]
    fn exact_part_size_is_a_single_part() {
        let parts = plan_parts(8 * MIB, 8 * MIB);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].start, 0);
        assert_eq!(parts[0].end, 8 * MIB - 1);
    }

    #[test]
    fn one_extra_byte_splits_into_two_parts() {
        let parts = plan_parts(8 * MIB + 1, 8 * MIB);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].start, 8 * MIB);
        assert_eq!(parts[1].end, 8 * MIB);
        assert_eq!(parts[1].len(), 1);
    }

    #[test]
    fn parts_are_contiguous_and_cover_the_object() {
        let size = 100 * MIB;
        let parts = plan_parts(size, 8 * MIB);
        assert_eq!(parts.len(), 13);
        let mut expected_start = 0;
        let mut covered = 0;
        for part in &parts {
            assert_eq!(part.start, expected_start);
            covered += part.len();
            expected_start = part.end + 1;
        }
        assert_eq!(covered, size);
        assert_eq!(parts.last().unwrap().len(), 4 * MIB);
    }
}
