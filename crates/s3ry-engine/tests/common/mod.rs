//! In-memory `ObjectStore` double with scripted failures and a call log.
//!
//! Tests exercise the engine end to end without any network: objects live
//! in a mutex-guarded map, multipart sessions are assembled in memory, and
//! failure rules let a test fault any operation a fixed number of times.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone as _, Utc};
use tokio_util::sync::CancellationToken;

use s3ry_core::error::ErrorKind;
use s3ry_engine::{
    BucketInfo, ByteRange, ObjectBody, ObjectInfo, ObjectPage, ObjectStore, PartTag, StoreError,
    StoreResult,
};

/// One recorded storage call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub op: &'static str,
    pub key: String,
    pub part_number: Option<i32>,
}

/// Fault injection: fail `op` (optionally scoped to a part or key) the
/// next `times` times with `kind`.
#[derive(Debug, Clone)]
pub struct FailureRule {
    pub op: &'static str,
    pub part_number: Option<i32>,
    pub key_contains: Option<String>,
    pub times: usize,
    pub kind: ErrorKind,
}

impl FailureRule {
    pub fn new(op: &'static str, kind: ErrorKind, times: usize) -> Self {
        Self {
            op,
            part_number: None,
            key_contains: None,
            times,
            kind,
        }
    }

    pub fn for_part(mut self, part_number: i32) -> Self {
        self.part_number = Some(part_number);
        self
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
    etag: String,
}

#[derive(Debug, Default)]
struct MultipartSession {
    bucket: String,
    key: String,
    parts: BTreeMap<i32, (String, Vec<u8>)>,
}

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, BTreeMap<String, StoredObject>>,
    sessions: HashMap<String, MultipartSession>,
    rules: Vec<FailureRule>,
    calls: Vec<CallRecord>,
    /// Part-number lists passed to CompleteMultipartUpload, in call order.
    completions: Vec<Vec<i32>>,
    aborted_sessions: Vec<String>,
}

/// The store double.
pub struct MemoryStore {
    state: Mutex<State>,
    seq: AtomicU64,
    /// Artificial per-call latency, to widen cancellation windows.
    pub latency: Duration,
    /// Listing page size, small by default to force pagination.
    pub page_size: usize,
}

#[allow(dead_code)] // not every test file uses every helper
impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            seq: AtomicU64::new(1),
            latency: Duration::ZERO,
            page_size: 1000,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn create_bucket(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.buckets.entry(name.to_string()).or_default();
    }

    pub fn put(&self, bucket: &str, key: &str, data: &[u8], modified_at: i64) {
        let etag = self.next_etag();
        let mut state = self.state.lock().unwrap();
        state.buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data: data.to_vec(),
                last_modified: Utc.timestamp_opt(modified_at, 0).unwrap(),
                etag,
            },
        );
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|o| o.data.clone())
    }

    pub fn inject(&self, rule: FailureRule) {
        self.state.lock().unwrap().rules.push(rule);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, op: &'static str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    pub fn completions(&self) -> Vec<Vec<i32>> {
        self.state.lock().unwrap().completions.clone()
    }

    pub fn aborted_sessions(&self) -> Vec<String> {
        self.state.lock().unwrap().aborted_sessions.clone()
    }

    pub fn open_session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    fn next_etag(&self) -> String {
        format!("etag-{}", self.seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Record the call, apply latency (observing the token), and fire any
    /// matching failure rule.
    async fn enter(
        &self,
        op: &'static str,
        key: &str,
        part_number: Option<i32>,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            state.calls.push(CallRecord {
                op,
                key: key.to_string(),
                part_number,
            });
        }

        if cancel.is_cancelled() {
            return Err(StoreError::new(ErrorKind::Cancelled, op, "cancelled"));
        }
        if !self.latency.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(StoreError::new(ErrorKind::Cancelled, op, "cancelled"));
                }
                _ = tokio::time::sleep(self.latency) => {}
            }
        }

        let planned = {
            let mut state = self.state.lock().unwrap();
            let matched = state.rules.iter_mut().find(|rule| {
                rule.times > 0
                    && rule.op == op
                    && rule.part_number.is_none_or(|p| Some(p) == part_number)
                    && rule
                        .key_contains
                        .as_ref()
                        .is_none_or(|needle| key.contains(needle))
            });
            match matched {
                Some(rule) => {
                    rule.times -= 1;
                    Some(rule.kind)
                }
                None => None,
            }
        };

        match planned {
            Some(kind) => Err(StoreError::new(kind, op, "injected failure")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_buckets(&self, cancel: &CancellationToken) -> StoreResult<Vec<BucketInfo>> {
        self.enter("ListBuckets", "", None, cancel).await?;
        let state = self.state.lock().unwrap();
        Ok(state
            .buckets
            .keys()
            .map(|name| BucketInfo {
                name: name.clone(),
                created: Some(Utc.timestamp_opt(0, 0).unwrap()),
                region: Some("us-east-1".to_string()),
            })
            .collect())
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> StoreResult<ObjectPage> {
        self.enter("ListObjectsV2", bucket, None, cancel).await?;
        let state = self.state.lock().unwrap();
        let Some(objects) = state.buckets.get(bucket) else {
            return Err(StoreError::new(
                ErrorKind::NotFound,
                "ListObjectsV2",
                format!("no such bucket: {bucket}"),
            ));
        };

        let page: Vec<ObjectInfo> = objects
            .range::<String, _>((
                token
                    .map(|t| std::ops::Bound::Excluded(t.to_string()))
                    .unwrap_or(std::ops::Bound::Unbounded),
                std::ops::Bound::Unbounded,
            ))
            .take(self.page_size)
            .map(|(key, obj)| ObjectInfo {
                key: key.clone(),
                size: obj.data.len() as u64,
                last_modified: obj.last_modified,
                etag: obj.etag.clone(),
                storage_class: None,
            })
            .collect();

        let next_token = if page.len() == self.page_size
            && objects
                .range::<String, _>((
                    std::ops::Bound::Excluded(page.last().unwrap().key.clone()),
                    std::ops::Bound::Unbounded,
                ))
                .next()
                .is_some()
        {
            page.last().map(|o| o.key.clone())
        } else {
            None
        };

        Ok(ObjectPage {
            objects: page,
            next_token,
        })
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<ObjectInfo> {
        self.enter("HeadObject", key, None, cancel).await?;
        let state = self.state.lock().unwrap();
        let obj = state
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .ok_or_else(|| {
                StoreError::new(
                    ErrorKind::NotFound,
                    "HeadObject",
                    format!("no such key: {key}"),
                )
            })?;
        Ok(ObjectInfo {
            key: key.to_string(),
            size: obj.data.len() as u64,
            last_modified: obj.last_modified,
            etag: obj.etag.clone(),
            storage_class: None,
        })
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
        cancel: &CancellationToken,
    ) -> StoreResult<ObjectBody> {
        // Ranged reads are matched by their start offset, so tests can
        // fault an individual part of a split download.
        let part_hint = range.map(|r| r.start as i32);
        self.enter("GetObject", key, part_hint, cancel).await?;
        let state = self.state.lock().unwrap();
        let obj = state
            .buckets
            .get(bucket)
            .and_then(|b| b.get(key))
            .ok_or_else(|| {
                StoreError::new(
                    ErrorKind::NotFound,
                    "GetObject",
                    format!("no such key: {key}"),
                )
            })?;

        let data = match range {
            Some(range) => {
                let end = (range.end as usize + 1).min(obj.data.len());
                obj.data[range.start as usize..end].to_vec()
            }
            None => obj.data.clone(),
        };

        Ok(ObjectBody {
            len: data.len() as u64,
            reader: Box::new(std::io::Cursor::new(data)),
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        _content_type: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<String> {
        self.enter("PutObject", key, None, cancel).await?;
        let etag = self.next_etag();
        let mut state = self.state.lock().unwrap();
        state.buckets.entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        _content_type: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<String> {
        self.enter("CreateMultipartUpload", key, None, cancel).await?;
        let upload_id = format!("session-{}", self.seq.fetch_add(1, Ordering::Relaxed));
        let mut state = self.state.lock().unwrap();
        state.sessions.insert(
            upload_id.clone(),
            MultipartSession {
                bucket: bucket.to_string(),
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
        cancel: &CancellationToken,
    ) -> StoreResult<String> {
        self.enter("UploadPart", key, Some(part_number), cancel)
            .await?;
        let etag = self.next_etag();
        let mut state = self.state.lock().unwrap();
        let session = state.sessions.get_mut(upload_id).ok_or_else(|| {
            StoreError::new(
                ErrorKind::NotFound,
                "UploadPart",
                format!("no such upload: {upload_id}"),
            )
        })?;
        session.parts.insert(part_number, (etag.clone(), data));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartTag],
        cancel: &CancellationToken,
    ) -> StoreResult<String> {
        self.enter("CompleteMultipartUpload", key, None, cancel)
            .await?;
        let etag = self.next_etag();
        let mut state = self.state.lock().unwrap();

        let session = state.sessions.remove(upload_id).ok_or_else(|| {
            StoreError::new(
                ErrorKind::NotFound,
                "CompleteMultipartUpload",
                format!("no such upload: {upload_id}"),
            )
        })?;

        let mut data = Vec::new();
        for tag in parts {
            let (stored_etag, part_data) =
                session.parts.get(&tag.part_number).ok_or_else(|| {
                    StoreError::new(
                        ErrorKind::Fatal,
                        "CompleteMultipartUpload",
                        format!("part {} was never uploaded", tag.part_number),
                    )
                })?;
            if stored_etag != &tag.etag {
                return Err(StoreError::new(
                    ErrorKind::Fatal,
                    "CompleteMultipartUpload",
                    format!("part {} entity tag mismatch", tag.part_number),
                ));
            }
            data.extend_from_slice(part_data);
        }

        state
            .completions
            .push(parts.iter().map(|p| p.part_number).collect());

        let bucket = session.bucket.clone();
        state.buckets.entry(bucket).or_default().insert(
            session.key.clone(),
            StoredObject {
                data,
                last_modified: Utc::now(),
                etag: etag.clone(),
            },
        );
        Ok(etag)
    }

    async fn abort_multipart(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        self.enter("AbortMultipartUpload", key, None, cancel).await?;
        let mut state = self.state.lock().unwrap();
        state.sessions.remove(upload_id);
        state.aborted_sessions.push(upload_id.to_string());
        Ok(())
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        self.enter("DeleteObject", key, None, cancel).await?;
        let mut state = self.state.lock().unwrap();
        if let Some(objects) = state.buckets.get_mut(bucket) {
            objects.remove(key);
        }
        // Deleting a missing key succeeds, as the protocol promises.
        Ok(())
    }
}
