use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::job::Job;
use crate::progress::ProgressSink;
use crate::store::ObjectStore;
use crate::worker::run_worker;

/// Error from [`WorkerPool::try_submit`].
#[derive(Debug)]
pub(crate) enum SubmitRejected {
    /// The inbox is at capacity; the job is handed back.
    Full(Job),
    /// The pool is shutting down; the job is handed back.
    Closed(Job),
}

/// A fixed set of workers servicing one bounded FIFO inbox.
///
/// Jobs are dispatched in arrival order to whichever worker frees up
/// first. Submission back-pressures on the inbox; the cancel path runs
/// through the jobs' own tokens, so a cancelled job is answered with a
/// `Cancelled` result instead of being dispatched.
pub(crate) struct WorkerPool {
    inbox_tx: mpsc::Sender<Job>,
    dispatcher: tokio::task::JoinHandle<()>,
    workers: usize,
}

impl WorkerPool {
    pub(crate) fn new(
        store: Arc<dyn ObjectStore>,
        progress: ProgressSink,
        workers: usize,
        inbox_capacity: usize,
    ) -> Self {
        let workers = workers.max(1);
        let inbox_capacity = inbox_capacity.max(1);

        let (inbox_tx, inbox_rx) = mpsc::channel::<Job>(inbox_capacity);
        let (idle_tx, idle_rx) = mpsc::unbounded_channel::<usize>();

        let mut worker_txs = Vec::with_capacity(workers);
        let mut worker_join = JoinSet::new();
        for worker_idx in 0..workers {
            // Rendezvous-sized: a worker holds at most the job it is running.
            let (tx, rx) = mpsc::channel::<Job>(1);
            worker_txs.push(tx);

            let store = store.clone();
            let progress = progress.clone();
            let idle_tx = idle_tx.clone();
            worker_join.spawn(async move {
                run_worker(worker_idx, store, progress, rx, idle_tx).await;
            });
        }
        drop(idle_tx);

        let dispatcher = tokio::spawn(run_dispatcher(
            inbox_rx,
            worker_txs,
            idle_rx,
            worker_join,
        ));

        Self {
            inbox_tx,
            dispatcher,
            workers,
        }
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.workers
    }

    /// Submit a job, waiting while the inbox is full (back-pressure).
    ///
    /// If the pool has started shutting down the job is answered with a
    /// `Cancelled` result immediately.
    pub(crate) async fn submit(&self, job: Job) {
        if let Err(err) = self.inbox_tx.send(job).await {
            err.0.finish_cancelled();
        }
    }

    /// Non-blocking submission; rejects instead of waiting when full.
    pub(crate) fn try_submit(&self, job: Job) -> Result<(), SubmitRejected> {
        match self.inbox_tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => Err(SubmitRejected::Full(job)),
            Err(mpsc::error::TrySendError::Closed(job)) => Err(SubmitRejected::Closed(job)),
        }
    }

    /// Drain shutdown: no new submissions, queued and in-flight jobs run to
    /// completion, then the workers exit.
    pub(crate) async fn shutdown(self) {
        let WorkerPool {
            inbox_tx,
            dispatcher,
            ..
        } = self;
        drop(inbox_tx);
        let _ = dispatcher.await;
    }
}

async fn run_dispatcher(
    mut inbox_rx: mpsc::Receiver<Job>,
    worker_txs: Vec<mpsc::Sender<Job>>,
    mut idle_rx: mpsc::UnboundedReceiver<usize>,
    mut worker_join: JoinSet<()>,
) {
    let mut idle: VecDeque<usize> = (0..worker_txs.len()).collect();

    loop {
        if idle.is_empty() {
            // Every worker is busy; nothing to do until one frees up.
            match idle_rx.recv().await {
                Some(idx) => idle.push_back(idx),
                None => break,
            }
            continue;
        }

        tokio::select! {
            // Keep arrival order: a job is only pulled when a worker can
            // take it, so the bounded inbox is the entire queue.
            job = inbox_rx.recv() => {
                let Some(job) = job else { break };
                if job.cancel.is_cancelled() {
                    // Cancellation is itself a result; never dispatch.
                    job.finish_cancelled();
                    continue;
                }
                let idx = idle.pop_front().expect("idle worker available");
                if let Err(err) = worker_txs[idx].send(job).await {
                    err.0.finish_cancelled();
                    tracing::error!(worker = idx, "worker channel closed unexpectedly");
                }
            }
            idx = idle_rx.recv() => {
                match idx {
                    Some(idx) => idle.push_back(idx),
                    None => break,
                }
            }
        }
    }

    // Inbox closed: answer anything still queued, then retire the workers.
    while let Ok(job) = inbox_rx.try_recv() {
        job.finish_cancelled();
    }
    drop(worker_txs);
    while worker_join.join_next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use crate::job::{Job, JobSpec};
    use crate::progress::ProgressBus;
    use crate::store::{
        BucketInfo, ByteRange, ObjectBody, ObjectInfo, ObjectPage, ObjectStore, PartTag,
        StoreResult,
    };

    use super::*;

    /// Store whose deletes block until released; enough to exercise pool
    /// mechanics without the full test-double from the integration suite.
    struct SlowStore {
        delay: Duration,
        deletes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ObjectStore for SlowStore {
        async fn list_buckets(&self, _: &CancellationToken) -> StoreResult<Vec<BucketInfo>> {
            Ok(Vec::new())
        }

        async fn list_objects_page(
            &self,
            _: &str,
            _: Option<&str>,
            _: &CancellationToken,
        ) -> StoreResult<ObjectPage> {
            Ok(ObjectPage::default())
        }

        async fn head_object(
            &self,
            _: &str,
            _: &str,
            _: &CancellationToken,
        ) -> StoreResult<ObjectInfo> {
            unimplemented!("not used by pool tests")
        }

        async fn get_object(
            &self,
            _: &str,
            _: &str,
            _: Option<ByteRange>,
            _: &CancellationToken,
        ) -> StoreResult<ObjectBody> {
            unimplemented!("not used by pool tests")
        }

        async fn put_object(
            &self,
            _: &str,
            _: &str,
            _: Vec<u8>,
            _: &str,
            _: &CancellationToken,
        ) -> StoreResult<String> {
            unimplemented!("not used by pool tests")
        }

        async fn create_multipart(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &CancellationToken,
        ) -> StoreResult<String> {
            unimplemented!("not used by pool tests")
        }

        async fn upload_part(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: i32,
            _: Vec<u8>,
            _: &CancellationToken,
        ) -> StoreResult<String> {
            unimplemented!("not used by pool tests")
        }

        async fn complete_multipart(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &[PartTag],
            _: &CancellationToken,
        ) -> StoreResult<String> {
            unimplemented!("not used by pool tests")
        }

        async fn abort_multipart(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &CancellationToken,
        ) -> StoreResult<()> {
            unimplemented!("not used by pool tests")
        }

        async fn delete_object(
            &self,
            _: &str,
            _: &str,
            cancel: &CancellationToken,
        ) -> StoreResult<()> {
            tokio::select! {
                _ = cancel.cancelled() => {
                    Err(crate::error::StoreError::cancelled("DeleteObject"))
                }
                _ = tokio::time::sleep(self.delay) => {
                    self.deletes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        }
    }

    fn delete_job(cancel: &CancellationToken, n: u32) -> (Job, tokio::sync::oneshot::Receiver<crate::job::JobResult>) {
        Job::new(
            u64::from(n),
            0,
            JobSpec::DeleteOne {
                bucket: "b".into(),
                key: format!("k{n}"),
            },
            cancel.child_token(),
        )
    }

    #[tokio::test]
    async fn every_job_gets_exactly_one_result_through_drain() {
        let store = Arc::new(SlowStore {
            delay: Duration::from_millis(5),
            deletes: AtomicUsize::new(0),
        });
        let bus = ProgressBus::new(Duration::from_millis(10));
        let pool = WorkerPool::new(store.clone(), bus.sink(), 3, 4);
        let cancel = CancellationToken::new();

        let mut sinks = Vec::new();
        for n in 0..20 {
            let (job, rx) = delete_job(&cancel, n);
            pool.submit(job).await;
            sinks.push(rx);
        }

        pool.shutdown().await;
        bus.shutdown().await;

        for rx in sinks {
            let result = rx.await.expect("sink delivered");
            assert!(result.outcome.is_ok());
        }
        assert_eq!(store.deletes.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn cancelled_jobs_are_answered_not_dispatched() {
        let store = Arc::new(SlowStore {
            delay: Duration::from_millis(50),
            deletes: AtomicUsize::new(0),
        });
        let bus = ProgressBus::new(Duration::from_millis(10));
        let pool = WorkerPool::new(store.clone(), bus.sink(), 1, 8);
        let cancel = CancellationToken::new();

        let mut sinks = Vec::new();
        for n in 0..8 {
            let (job, rx) = delete_job(&cancel, n);
            pool.submit(job).await;
            sinks.push(rx);
        }

        // Let the single worker pick up the first job, then cancel the rest.
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        pool.shutdown().await;
        bus.shutdown().await;

        let mut cancelled = 0;
        for rx in sinks {
            let result = rx.await.expect("sink delivered");
            if let Err(err) = result.outcome {
                assert_eq!(err.kind, s3ry_core::error::ErrorKind::Cancelled);
                cancelled += 1;
            }
        }
        assert!(cancelled >= 7, "queued jobs must come back cancelled");
        assert!(store.deletes.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn try_submit_rejects_when_full() {
        let store = Arc::new(SlowStore {
            delay: Duration::from_millis(100),
            deletes: AtomicUsize::new(0),
        });
        let bus = ProgressBus::new(Duration::from_millis(10));
        let pool = WorkerPool::new(store, bus.sink(), 1, 1);
        let cancel = CancellationToken::new();

        // First job occupies the worker, second fills the inbox; the rest
        // must be rejected rather than queued.
        let mut accepted = 0usize;
        let mut rejected = 0usize;
        let mut sinks = Vec::new();
        for n in 0..6 {
            let (job, rx) = delete_job(&cancel, n);
            match pool.try_submit(job) {
                Ok(()) => {
                    accepted += 1;
                    sinks.push(rx);
                }
                Err(SubmitRejected::Full(job)) => {
                    rejected += 1;
                    job.finish_cancelled();
                }
                Err(SubmitRejected::Closed(_)) => panic!("pool is open"),
            }
            // Give the dispatcher a beat on the first iteration so the
            // worker takes job 0 and the inbox slot frees predictably.
            if n == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }

        assert!(accepted >= 2);
        assert!(rejected >= 1);
        pool.shutdown().await;
        bus.shutdown().await;
    }
}
