use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::api::EngineConfig;
use crate::error::StoreError;
use crate::ops::{self, OpsContext, UploadCandidate};
use crate::pool::WorkerPool;
use crate::progress::{EngineSnapshot, ProgressBus, ProgressUpdate};
use crate::store::{BucketInfo, ObjectInfo, ObjectStore};
use crate::transfer::{TransferError, TransferSummary};

/// The running transfer engine: a worker pool, a progress bus, and the
/// operations built on top of them.
///
/// Ownership is flat by design: the engine owns the store handle and the
/// pool, the progress bus is independent, and the UI only ever touches
/// the subscription side plus the cancellation token.
pub struct Engine {
    store: Arc<dyn ObjectStore>,
    pool: WorkerPool,
    progress: ProgressBus,
    config: EngineConfig,
    root_cancel: CancellationToken,
    next_transfer_id: AtomicU64,
}

impl Engine {
    /// Start an engine over `store`.
    pub fn new(store: Arc<dyn ObjectStore>, config: EngineConfig) -> Self {
        let progress = ProgressBus::new(config.progress_window);
        let pool = WorkerPool::new(
            store.clone(),
            progress.sink(),
            config.workers,
            config.inbox_capacity,
        );

        Self {
            store,
            pool,
            progress,
            config,
            root_cancel: CancellationToken::new(),
            next_transfer_id: AtomicU64::new(1),
        }
    }

    /// Number of workers the pool was built with.
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Subscribe to coalesced progress updates.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.progress.subscribe()
    }

    /// Latest progress board, for polling renderers.
    pub fn snapshot(&self) -> EngineSnapshot {
        self.progress.snapshot()
    }

    /// Cancel everything in flight. Jobs answer with `Cancelled` results;
    /// orchestrators run their cleanup paths.
    pub fn cancel_all(&self) {
        self.root_cancel.cancel();
    }

    /// Whether [`Engine::cancel_all`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.root_cancel.is_cancelled()
    }

    /// Drain shutdown: in-flight jobs finish, workers exit, the progress
    /// bus flushes and closes.
    pub async fn shutdown(self) {
        let Engine {
            pool, progress, ..
        } = self;
        pool.shutdown().await;
        progress.shutdown().await;
    }

    fn next_id(&self) -> u64 {
        self.next_transfer_id.fetch_add(1, Ordering::Relaxed)
    }

    fn ops_ctx(&self) -> OpsContext<'_> {
        OpsContext {
            store: self.store.as_ref(),
            pool: &self.pool,
            progress: self.progress.sink(),
            policy: self.config.retry.clone(),
            part_size: self.config.part_size,
        }
    }

    /// List all buckets visible to the session credentials.
    pub async fn list_buckets(&self) -> Result<Vec<BucketInfo>, StoreError> {
        let cancel = self.root_cancel.child_token();
        ops::list_buckets(&self.ops_ctx(), &cancel).await
    }

    /// List `bucket`'s objects, newest first, folder markers elided,
    /// optionally stopping after `limit` objects.
    pub async fn list_objects(
        &self,
        bucket: &str,
        limit: Option<usize>,
    ) -> Result<Vec<ObjectInfo>, StoreError> {
        let cancel = self.root_cancel.child_token();
        ops::list_objects(&self.ops_ctx(), self.next_id(), bucket, limit, &cancel).await
    }

    /// Download `bucket/key` to `dest`. The destination must already be
    /// resolved (collision prompts live in the caller).
    pub async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<TransferSummary, TransferError> {
        let cancel = self.root_cancel.child_token();
        ops::download(&self.ops_ctx(), self.next_id(), bucket, key, dest, &cancel).await
    }

    /// Upload the local file at `path` to `bucket/key`.
    pub async fn upload(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<TransferSummary, TransferError> {
        let cancel = self.root_cancel.child_token();
        ops::upload(&self.ops_ctx(), self.next_id(), bucket, key, path, &cancel).await
    }

    /// Delete `keys` from `bucket`, concurrently. Returns the number of
    /// deleted objects.
    pub async fn delete(&self, bucket: &str, keys: &[String]) -> Result<usize, TransferError> {
        let cancel = self.root_cancel.child_token();
        ops::delete(&self.ops_ctx(), self.next_id(), bucket, keys, &cancel).await
    }

    /// Write `bucket`'s full inventory to `dest`, one object per line.
    /// Returns the number of objects written.
    pub async fn export_inventory(
        &self,
        bucket: &str,
        dest: &Path,
    ) -> Result<usize, StoreError> {
        let cancel = self.root_cancel.child_token();
        ops::export_inventory(&self.ops_ctx(), self.next_id(), bucket, dest, &cancel).await
    }

    /// Enumerate the files under `root` eligible for upload: recursive,
    /// symlinks skipped, hidden files included, sorted by key.
    pub fn upload_candidates(root: &Path) -> std::io::Result<Vec<UploadCandidate>> {
        ops::enumerate_upload_files(root)
    }

    /// Local destination filename derived from a key's basename.
    pub fn local_dest_for_key(key: &str) -> PathBuf {
        ops::local_dest_for_key(key)
    }

    /// Default filename for an inventory export of `bucket`.
    pub fn default_inventory_filename(bucket: &str) -> String {
        ops::default_inventory_filename(bucket, chrono::Utc::now())
    }
}
