use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt as _;
use tokio_util::sync::CancellationToken;

use s3ry_core::error::ErrorKind;

use crate::error::{RetryPolicy, StoreError};
use crate::job::{Job, JobOutput, JobSpec};
use crate::pool::WorkerPool;
use crate::progress::ProgressSink;
use crate::store::{BucketInfo, ObjectInfo, ObjectStore};
use crate::transfer::{self, TransferContext, TransferError, TransferSummary, with_retries};

/// Everything an operation needs from the engine.
pub(crate) struct OpsContext<'a> {
    pub(crate) store: &'a dyn ObjectStore,
    pub(crate) pool: &'a WorkerPool,
    pub(crate) progress: ProgressSink,
    pub(crate) policy: RetryPolicy,
    pub(crate) part_size: u64,
}

impl<'a> OpsContext<'a> {
    fn transfer_ctx(&self) -> TransferContext<'a> {
        TransferContext {
            store: self.store,
            pool: self.pool,
            progress: self.progress.clone(),
            policy: self.policy.clone(),
            part_size: self.part_size,
        }
    }
}

/// Run one job through the pool, resubmitting under the retry policy.
async fn run_single_job(
    ctx: &OpsContext<'_>,
    transfer_id: u64,
    spec: JobSpec,
    cancel: &CancellationToken,
) -> Result<JobOutput, StoreError> {
    let op = spec.op_name();
    let mut attempt = 0u32;
    loop {
        let (job, rx) = Job::new(transfer_id, 0, spec.clone(), cancel.child_token());
        ctx.pool.submit(job).await;
        let outcome = match rx.await {
            Ok(result) => result.outcome,
            Err(_) => Err(StoreError::cancelled(op)),
        };
        match outcome {
            Ok(output) => return Ok(output),
            Err(err) if ctx.policy.should_retry(err.kind, attempt) && !cancel.is_cancelled() => {
                let delay = ctx.policy.delay(attempt);
                attempt += 1;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StoreError::cancelled(op)),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => return Err(err),
        }
    }
}

/// Browse buckets: one listing call, retried under the policy.
pub(crate) async fn list_buckets(
    ctx: &OpsContext<'_>,
    cancel: &CancellationToken,
) -> Result<Vec<BucketInfo>, StoreError> {
    with_retries(&ctx.policy, cancel, || ctx.store.list_buckets(cancel)).await
}

/// Sort a listing the way the browser presents it: newest first, ties
/// broken by key.
pub(crate) fn sort_objects(objects: &mut [ObjectInfo]) {
    objects.sort_by(|a, b| {
        b.last_modified
            .cmp(&a.last_modified)
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// Browse objects: stitch listing pages until exhaustion or `limit`,
/// eliding folder-marker keys, newest first.
pub(crate) async fn list_objects(
    ctx: &OpsContext<'_>,
    transfer_id: u64,
    bucket: &str,
    limit: Option<usize>,
    cancel: &CancellationToken,
) -> Result<Vec<ObjectInfo>, StoreError> {
    ctx.progress.transfer_started(transfer_id, bucket, 0, 0);
    let result = collect_objects(ctx, transfer_id, bucket, limit, cancel).await;
    ctx.progress.transfer_finished(transfer_id);
    result
}

async fn collect_objects(
    ctx: &OpsContext<'_>,
    transfer_id: u64,
    bucket: &str,
    limit: Option<usize>,
    cancel: &CancellationToken,
) -> Result<Vec<ObjectInfo>, StoreError> {
    let mut objects: Vec<ObjectInfo> = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let spec = JobSpec::ListPage {
            bucket: bucket.to_string(),
            token: token.clone(),
        };
        let output = run_single_job(ctx, transfer_id, spec, cancel).await?;
        let page = match output {
            JobOutput::Page(page) => page,
            _ => {
                return Err(StoreError::new(
                    ErrorKind::Fatal,
                    "ListObjectsV2",
                    "unexpected job output",
                ));
            }
        };

        objects.extend(
            page.objects
                .into_iter()
                .filter(|obj| !obj.key.ends_with('/')),
        );

        let done = page.next_token.is_none()
            || limit.is_some_and(|limit| objects.len() >= limit);
        if done {
            break;
        }
        token = page.next_token;
    }

    sort_objects(&mut objects);
    if let Some(limit) = limit {
        objects.truncate(limit);
    }
    Ok(objects)
}

/// Local destination derived from a key's basename.
pub(crate) fn local_dest_for_key(key: &str) -> PathBuf {
    let basename = key.rsplit('/').next().filter(|s| !s.is_empty());
    PathBuf::from(basename.unwrap_or("download"))
}

/// Download one object into `dest`. Size is resolved with a HEAD first.
pub(crate) async fn download(
    ctx: &OpsContext<'_>,
    transfer_id: u64,
    bucket: &str,
    key: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<TransferSummary, TransferError> {
    let head = with_retries(&ctx.policy, cancel, || {
        ctx.store.head_object(bucket, key, cancel)
    })
    .await
    .map_err(|err| TransferError {
        first: err,
        failed_parts: Vec::new(),
    })?;

    transfer::download_object(
        &ctx.transfer_ctx(),
        transfer_id,
        bucket,
        key,
        head.size,
        dest,
        cancel,
    )
    .await
}

/// Content type for an upload, from the filename extension.
pub(crate) fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Upload one local file to `bucket/key`.
pub(crate) async fn upload(
    ctx: &OpsContext<'_>,
    transfer_id: u64,
    bucket: &str,
    key: &str,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<TransferSummary, TransferError> {
    let size = std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|err| TransferError {
            first: StoreError::new(ErrorKind::Fatal, "PutObject", err.to_string()),
            failed_parts: Vec::new(),
        })?;
    let content_type = content_type_for(path);

    transfer::upload_object(
        &ctx.transfer_ctx(),
        transfer_id,
        bucket,
        key,
        path,
        size,
        &content_type,
        cancel,
    )
    .await
}

/// A local file eligible for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadCandidate {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Object key: the path relative to the upload root, `/`-separated.
    pub key: String,
    /// File size in bytes.
    pub size: u64,
}

fn key_for_relative(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn walk_upload_dir(
    root: &Path,
    dir: &Path,
    out: &mut Vec<UploadCandidate>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        // Symlinks are not followed; hidden files are included.
        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            walk_upload_dir(root, &path, out)?;
        } else {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            let size = entry.metadata()?.len();
            out.push(UploadCandidate {
                key: key_for_relative(rel),
                path,
                size,
            });
        }
    }
    Ok(())
}

/// Enumerate upload candidates under `root`, recursively, sorted by key.
pub(crate) fn enumerate_upload_files(root: &Path) -> std::io::Result<Vec<UploadCandidate>> {
    let mut out = Vec::new();
    walk_upload_dir(root, root, &mut out)?;
    out.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(out)
}

/// Delete many keys, one job each, concurrently through the pool.
///
/// Stops on the first permanent failure (remaining deletes come back
/// cancelled); the error lists the 1-based indices of the keys that did
/// not get deleted.
pub(crate) async fn delete(
    ctx: &OpsContext<'_>,
    transfer_id: u64,
    bucket: &str,
    keys: &[String],
    cancel: &CancellationToken,
) -> Result<usize, TransferError> {
    if keys.is_empty() {
        return Ok(0);
    }

    ctx.progress
        .transfer_started(transfer_id, bucket, 0, keys.len() as u64);

    let specs: Vec<(u32, JobSpec)> = keys
        .iter()
        .enumerate()
        .map(|(idx, key)| {
            (
                idx as u32 + 1,
                JobSpec::DeleteOne {
                    bucket: bucket.to_string(),
                    key: key.clone(),
                },
            )
        })
        .collect();

    let result = transfer::run_batch(&ctx.transfer_ctx(), transfer_id, specs, cancel).await;
    ctx.progress.transfer_finished(transfer_id);
    result.map(|count| count as usize)
}

/// Default inventory export filename.
pub(crate) fn default_inventory_filename(bucket: &str, now: chrono::DateTime<chrono::Utc>) -> String {
    format!("s3ry_inventory_{bucket}_{}.txt", now.format("%Y%m%d%H%M%S"))
}

/// One inventory line: `<iso-8601>\t<size>\t<key>` with a trailing LF.
pub(crate) fn inventory_line(obj: &ObjectInfo) -> Result<String, StoreError> {
    if obj.key.contains('\t') {
        return Err(StoreError::new(
            ErrorKind::InvalidKey,
            "ListObjectsV2",
            format!("key contains a tab character: {:?}", obj.key),
        ));
    }
    let ts = obj
        .last_modified
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    Ok(format!("{ts}\t{}\t{}\n", obj.size, obj.key))
}

/// Export the full listing of `bucket` to `dest`, one object per line.
pub(crate) async fn export_inventory(
    ctx: &OpsContext<'_>,
    transfer_id: u64,
    bucket: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<usize, StoreError> {
    ctx.progress.transfer_started(transfer_id, bucket, 0, 0);
    let result = write_inventory(ctx, transfer_id, bucket, dest, cancel).await;
    ctx.progress.transfer_finished(transfer_id);

    if result.is_err() {
        let _ = tokio::fs::remove_file(dest).await;
    }
    result
}

async fn write_inventory(
    ctx: &OpsContext<'_>,
    transfer_id: u64,
    bucket: &str,
    dest: &Path,
    cancel: &CancellationToken,
) -> Result<usize, StoreError> {
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|err| StoreError::new(ErrorKind::Fatal, "ListObjectsV2", err.to_string()))?;

    let mut token: Option<String> = None;
    let mut count = 0usize;

    loop {
        let spec = JobSpec::ListPage {
            bucket: bucket.to_string(),
            token: token.clone(),
        };
        let output = run_single_job(ctx, transfer_id, spec, cancel).await?;
        let page = match output {
            JobOutput::Page(page) => page,
            _ => {
                return Err(StoreError::new(
                    ErrorKind::Fatal,
                    "ListObjectsV2",
                    "unexpected job output",
                ));
            }
        };

        for obj in &page.objects {
            let line = inventory_line(obj)?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|err| StoreError::new(ErrorKind::Fatal, "ListObjectsV2", err.to_string()))?;
            count += 1;
        }

        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    file.flush()
        .await
        .map_err(|err| StoreError::new(ErrorKind::Fatal, "ListObjectsV2", err.to_string()))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};

    use super::*;

    fn obj(key: &str, size: u64, ts: i64) -> ObjectInfo {
        ObjectInfo {
            key: key.to_string(),
            size,
            last_modified: Utc.timestamp_opt(ts, 0).unwrap(),
            etag: "etag".to_string(),
            storage_class: None,
        }
    }

    #[test]
    fn listing_sorts_newest_first_then_key() {
        let mut objects = vec![obj("a", 10, 100), obj("b", 20, 200), obj("c", 30, 300)];
        sort_objects(&mut objects);
        let keys: Vec<&str> = objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "b", "a"]);

        let mut tied = vec![obj("z", 1, 100), obj("a", 1, 100), obj("m", 1, 100)];
        sort_objects(&mut tied);
        let keys: Vec<&str> = tied.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "m", "z"]);
    }

    #[test]
    fn dest_path_is_the_key_basename() {
        assert_eq!(local_dest_for_key("a/b/c.txt"), PathBuf::from("c.txt"));
        assert_eq!(local_dest_for_key("plain.bin"), PathBuf::from("plain.bin"));
        assert_eq!(local_dest_for_key("trailing/"), PathBuf::from("download"));
    }

    #[test]
    fn relative_paths_become_forward_slash_keys() {
        let rel = Path::new("photos").join("2024").join("img.png");
        assert_eq!(key_for_relative(&rel), "photos/2024/img.png");
    }

    #[test]
    fn content_type_from_extension_with_fallback() {
        assert_eq!(content_type_for(Path::new("a.txt")), "text/plain");
        assert_eq!(content_type_for(Path::new("a.png")), "image/png");
        assert_eq!(
            content_type_for(Path::new("a.unknownext")),
            "application/octet-stream"
        );
    }

    #[test]
    fn inventory_line_format() {
        let o = obj("docs/readme.md", 1234, 1_700_000_000);
        let line = inventory_line(&o).unwrap();
        let fields: Vec<&str> = line.trim_end_matches('\n').split('\t').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1], "1234");
        assert_eq!(fields[2], "docs/readme.md");
        assert!(fields[0].ends_with('Z'));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn inventory_rejects_tab_keys() {
        let o = obj("bad\tkey", 1, 0);
        let err = inventory_line(&o).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidKey);
    }

    #[test]
    fn inventory_filename_carries_bucket_and_timestamp() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let name = default_inventory_filename("photos", now);
        assert!(name.starts_with("s3ry_inventory_photos_"));
        assert!(name.ends_with(".txt"));
    }

    #[test]
    fn upload_enumeration_recurses_and_skips_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub/deeper")).unwrap();
        std::fs::write(root.join("top.txt"), b"1").unwrap();
        std::fs::write(root.join(".hidden"), b"2").unwrap();
        std::fs::write(root.join("sub/deeper/leaf.bin"), b"333").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(root.join("top.txt"), root.join("link.txt")).unwrap();

        let files = enumerate_upload_files(root).unwrap();
        let keys: Vec<&str> = files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec![".hidden", "sub/deeper/leaf.bin", "top.txt"]);
        assert_eq!(files[1].size, 3);
    }
}
