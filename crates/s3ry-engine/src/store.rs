use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use chrono::{DateTime, Utc};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use s3ry_core::error::ErrorKind;

use crate::error::StoreError;

/// Result alias for storage calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// A bucket as returned by the listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    /// Bucket name.
    pub name: String,
    /// Creation timestamp, when the service reported one.
    pub created: Option<DateTime<Utc>>,
    /// The session region; per-bucket regions would cost one extra call each.
    pub region: Option<String>,
}

/// An object descriptor, immutable once produced by a listing or HEAD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last-modified timestamp (UTC).
    pub last_modified: DateTime<Utc>,
    /// Opaque entity tag, quotes stripped.
    pub etag: String,
    /// Storage class, when the service reported one.
    pub storage_class: Option<String>,
}

/// One page of a paged object listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Objects on this page, in service order.
    pub objects: Vec<ObjectInfo>,
    /// Absent on the last page.
    pub next_token: Option<String>,
}

/// An inclusive byte range within an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl ByteRange {
    /// Build a range; `end` must not precede `start`.
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(end >= start);
        Self { start, end }
    }

    /// Number of bytes covered; ranges are inclusive on both ends.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// A streaming download body. The reader yields exactly `len` bytes.
pub struct ObjectBody {
    /// Content length of the body.
    pub len: u64,
    /// The body stream.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

/// A committed part's identity, used to complete a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTag {
    /// 1-based part number.
    pub part_number: i32,
    /// Per-part entity tag from the upload response.
    pub etag: String,
}

/// The storage operations the engine needs, one request-response call
/// each. Every call observes the given cancellation token and returns a
/// classified [`StoreError`] on failure.
///
/// Implementations must not buffer whole objects: download bodies stream,
/// and upload bodies are bounded by the part size.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List all buckets visible to the credentials.
    async fn list_buckets(&self, cancel: &CancellationToken) -> StoreResult<Vec<BucketInfo>>;

    /// Fetch one page of the bucket's object listing.
    async fn list_objects_page(
        &self,
        bucket: &str,
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> StoreResult<ObjectPage>;

    /// Resolve an object's size and metadata without fetching its body.
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<ObjectInfo>;

    /// Fetch an object body, optionally restricted to a byte range.
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
        cancel: &CancellationToken,
    ) -> StoreResult<ObjectBody>;

    /// Store a whole object; returns its entity tag.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<String>;

    /// Open a multipart upload session; returns the session id.
    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<String>;

    /// Upload one part; returns the per-part entity tag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
        cancel: &CancellationToken,
    ) -> StoreResult<String>;

    /// Commit a multipart upload from the ordered part tags.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartTag],
        cancel: &CancellationToken,
    ) -> StoreResult<String>;

    /// Abandon a multipart upload session.
    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<()>;

    /// Delete one object. Idempotent at the protocol level.
    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<()>;
}

// ── S3 implementation ───────────────────────────────────────────────────

/// Connection parameters for [`S3Store`]. Credential *discovery* is not
/// handled here; the caller hands in a resolved profile or key pair.
#[derive(Debug, Clone, Default)]
pub struct S3StoreConfig {
    /// Region override for the session.
    pub region: Option<String>,
    /// Named credential profile.
    pub profile: Option<String>,
    /// Custom endpoint (MinIO and friends); switches to path-style URLs.
    pub endpoint: Option<String>,
    /// Static access key, paired with `secret_key`.
    pub access_key: Option<String>,
    /// Static secret key, paired with `access_key`.
    pub secret_key: Option<String>,
    /// Per-attempt timeout for every storage call.
    pub attempt_timeout: Duration,
}

/// [`ObjectStore`] over the S3 HTTP API via the AWS SDK.
pub struct S3Store {
    client: S3Client,
    region: Option<String>,
    attempt_timeout: Duration,
}

impl S3Store {
    /// Build a store from resolved connection parameters.
    pub async fn connect(cfg: S3StoreConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let Some(region) = cfg.region.clone() {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let (Some(ak), Some(sk)) = (&cfg.access_key, &cfg.secret_key) {
            let creds = aws_credential_types::Credentials::new(
                ak.clone(),
                sk.clone(),
                None,
                None,
                "s3ry-manual",
            );
            loader = loader.credentials_provider(creds);
        } else if let Some(profile) = &cfg.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint) = &cfg.endpoint {
            if !endpoint.is_empty() {
                loader = loader.endpoint_url(endpoint);
            }
        }

        let shared = loader.load().await;
        let region = shared
            .region()
            .map(|r| r.to_string())
            .or_else(|| cfg.region.clone());

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if cfg.endpoint.as_deref().is_some_and(|e| !e.is_empty()) {
            builder = builder.force_path_style(true);
        }

        let attempt_timeout = if cfg.attempt_timeout.is_zero() {
            Duration::from_secs(30)
        } else {
            cfg.attempt_timeout
        };

        Self {
            client: S3Client::from_conf(builder.build()),
            region,
            attempt_timeout,
        }
    }

    /// Run one storage call under the per-attempt timeout, observing the
    /// cancellation token. Failures are logged with enough context to
    /// correlate with the transfer that issued them.
    async fn guarded<T, F>(
        &self,
        op: &'static str,
        bucket: &str,
        key: Option<&str>,
        cancel: &CancellationToken,
        fut: F,
    ) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        if cancel.is_cancelled() {
            return Err(StoreError::cancelled(op));
        }

        let correlation_id = uuid::Uuid::new_v4();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(StoreError::cancelled(op)),
            res = tokio::time::timeout(self.attempt_timeout, fut) => match res {
                Ok(res) => res,
                Err(_) => Err(StoreError::timed_out(op, self.attempt_timeout)),
            },
        };

        if let Err(err) = &outcome {
            tracing::debug!(
                op,
                bucket,
                key = key.unwrap_or(""),
                %correlation_id,
                kind = %err.kind,
                code = err.code.as_deref().unwrap_or(""),
                message = %err.message,
                "storage call failed"
            );
        }
        outcome
    }
}

fn from_sdk<E>(op: &'static str, err: SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let code = ProvideErrorMetadata::code(&err).map(str::to_string);
    let message = DisplayErrorContext(&err).to_string();
    StoreError::classified(op, code, message)
}

fn to_utc(ts: Option<&aws_sdk_s3::primitives::DateTime>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| t.to_millis().ok())
        .and_then(DateTime::from_timestamp_millis)
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_buckets(&self, cancel: &CancellationToken) -> StoreResult<Vec<BucketInfo>> {
        const OP: &str = "ListBuckets";
        let region = self.region.clone();
        self.guarded(OP, "", None, cancel, async {
            let resp = self
                .client
                .list_buckets()
                .send()
                .await
                .map_err(|e| from_sdk(OP, e))?;

            let buckets = resp
                .buckets()
                .iter()
                .filter_map(|b| {
                    let name = b.name()?.to_string();
                    Some(BucketInfo {
                        name,
                        created: to_utc(b.creation_date()),
                        region: region.clone(),
                    })
                })
                .collect();
            Ok(buckets)
        })
        .await
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        token: Option<&str>,
        cancel: &CancellationToken,
    ) -> StoreResult<ObjectPage> {
        const OP: &str = "ListObjectsV2";
        self.guarded(OP, bucket, None, cancel, async {
            let mut req = self.client.list_objects_v2().bucket(bucket);
            if let Some(token) = token {
                req = req.continuation_token(token);
            }
            let resp = req.send().await.map_err(|e| from_sdk(OP, e))?;

            let objects = resp
                .contents()
                .iter()
                .filter_map(|obj| {
                    let key = obj.key()?.to_string();
                    Some(ObjectInfo {
                        key,
                        size: obj.size().unwrap_or(0).max(0) as u64,
                        last_modified: to_utc(obj.last_modified()).unwrap_or_default(),
                        etag: obj.e_tag().unwrap_or("").trim_matches('"').to_string(),
                        storage_class: obj.storage_class().map(|s| s.as_str().to_string()),
                    })
                })
                .collect();

            let next_token = if resp.is_truncated() == Some(true) {
                resp.next_continuation_token().map(str::to_string)
            } else {
                None
            };

            Ok(ObjectPage {
                objects,
                next_token,
            })
        })
        .await
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<ObjectInfo> {
        const OP: &str = "HeadObject";
        self.guarded(OP, bucket, Some(key), cancel, async {
            let resp = self
                .client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| from_sdk(OP, e))?;

            Ok(ObjectInfo {
                key: key.to_string(),
                size: resp.content_length().unwrap_or(0).max(0) as u64,
                last_modified: to_utc(resp.last_modified()).unwrap_or_default(),
                etag: resp.e_tag().unwrap_or("").trim_matches('"').to_string(),
                storage_class: resp.storage_class().map(|s| s.as_str().to_string()),
            })
        })
        .await
    }

    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
        cancel: &CancellationToken,
    ) -> StoreResult<ObjectBody> {
        const OP: &str = "GetObject";
        self.guarded(OP, bucket, Some(key), cancel, async {
            let mut req = self.client.get_object().bucket(bucket).key(key);
            if let Some(range) = range {
                req = req.range(format!("bytes={}-{}", range.start, range.end));
            }
            let resp = req.send().await.map_err(|e| from_sdk(OP, e))?;

            let len = match (resp.content_length(), range) {
                (Some(len), _) if len >= 0 => len as u64,
                (_, Some(range)) => range.len(),
                _ => {
                    return Err(StoreError::new(
                        ErrorKind::Fatal,
                        OP,
                        "response carried no content length",
                    ));
                }
            };

            Ok(ObjectBody {
                len,
                reader: Box::new(resp.body.into_async_read()),
            })
        })
        .await
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<String> {
        const OP: &str = "PutObject";
        self.guarded(OP, bucket, Some(key), cancel, async {
            let resp = self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .content_type(content_type)
                .body(data.into())
                .send()
                .await
                .map_err(|e| from_sdk(OP, e))?;

            Ok(resp.e_tag().unwrap_or("").trim_matches('"').to_string())
        })
        .await
    }

    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<String> {
        const OP: &str = "CreateMultipartUpload";
        self.guarded(OP, bucket, Some(key), cancel, async {
            let resp = self
                .client
                .create_multipart_upload()
                .bucket(bucket)
                .key(key)
                .content_type(content_type)
                .send()
                .await
                .map_err(|e| from_sdk(OP, e))?;

            resp.upload_id().map(str::to_string).ok_or_else(|| {
                StoreError::new(ErrorKind::Fatal, OP, "response carried no upload id")
            })
        })
        .await
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Vec<u8>,
        cancel: &CancellationToken,
    ) -> StoreResult<String> {
        const OP: &str = "UploadPart";
        self.guarded(OP, bucket, Some(key), cancel, async {
            let resp = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(data.into())
                .send()
                .await
                .map_err(|e| from_sdk(OP, e))?;

            resp.e_tag()
                .map(|t| t.trim_matches('"').to_string())
                .ok_or_else(|| {
                    StoreError::new(ErrorKind::Fatal, OP, "response carried no entity tag")
                })
        })
        .await
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartTag],
        cancel: &CancellationToken,
    ) -> StoreResult<String> {
        const OP: &str = "CompleteMultipartUpload";
        self.guarded(OP, bucket, Some(key), cancel, async {
            let completed: Vec<_> = parts
                .iter()
                .map(|p| {
                    aws_sdk_s3::types::CompletedPart::builder()
                        .part_number(p.part_number)
                        .e_tag(&p.etag)
                        .build()
                })
                .collect();

            let upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
                .set_parts(Some(completed))
                .build();

            let resp = self
                .client
                .complete_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .multipart_upload(upload)
                .send()
                .await
                .map_err(|e| from_sdk(OP, e))?;

            Ok(resp.e_tag().unwrap_or("").trim_matches('"').to_string())
        })
        .await
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        const OP: &str = "AbortMultipartUpload";
        self.guarded(OP, bucket, Some(key), cancel, async {
            self.client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
                .map_err(|e| from_sdk(OP, e))?;
            Ok(())
        })
        .await
    }

    async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        const OP: &str = "DeleteObject";
        self.guarded(OP, bucket, Some(key), cancel, async {
            self.client
                .delete_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| from_sdk(OP, e))?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::ByteRange;

    #[test]
    fn byte_range_length_is_inclusive() {
        assert_eq!(ByteRange::new(0, 0).len(), 1);
        assert_eq!(ByteRange::new(0, 4095).len(), 4096);
        assert_eq!(ByteRange::new(100, 199).len(), 100);
    }
}
