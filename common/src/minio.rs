//! [`ObjectStore`] over MinIO or any other S3-compatible service.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use bytes::Bytes;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{InputError, StorageError};
use crate::store::{ListPage, Metadata, ObjectInfo, ObjectStore, PutOutcome, StoredObject};

const MAX_KEYS_PER_PAGE: i32 = 1000;

/// An `s3://bucket/prefix` location. A trailing `*` is dropped, so
/// `s3://logs/2016/*` names prefix `2016/` of bucket `logs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Path {
    pub bucket: String,
    pub prefix: String,
}

impl FromStr for S3Path {
    type Err = InputError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| InputError::InvalidPath(raw.to_string(), reason);

        let url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
        if url.scheme() != "s3" {
            return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
        }
        let bucket = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(invalid("missing bucket".to_string())),
        };
        let prefix = url.path().trim_start_matches('/').trim_end_matches('*');

        Ok(Self {
            bucket,
            prefix: prefix.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    /// Endpoint of the service, e.g. `http://127.0.0.1:9000`.
    pub url: String,
}

/// [`ObjectStore`] backed by an S3-compatible service.
#[derive(Debug, Clone)]
pub struct S3Store {
    pub client: s3::Client,
}

impl S3Store {
    pub fn from_conf(cfg: ClientConfig) -> Self {
        let cred = s3::config::Credentials::new(
            cfg.access_key_id,
            cfg.secret_access_key,
            None,
            None,
            "lmr-static",
        );
        let region = s3::config::Region::new(cfg.region);
        let conf = s3::config::Builder::new()
            .credentials_provider(cred)
            .region(region)
            .endpoint_url(cfg.url)
            .force_path_style(true)
            .behavior_version_latest()
            .build();

        info!("Configured S3 object store client");
        Self {
            client: s3::Client::from_conf(conf),
        }
    }
}

fn unavailable<E: std::fmt::Debug>(err: E) -> StorageError {
    StorageError::Unavailable(format!("{err:?}"))
}

/// Attempts of a conditional put that keeps colliding with a concurrent
/// conditional write of the same key.
const CONDITIONAL_PUT_ATTEMPTS: u32 = 3;
const CONDITIONAL_PUT_BACKOFF: Duration = Duration::from_millis(100);

/// How a rejected `If-None-Match: *` put failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    /// 412: the key already exists.
    Exists,
    /// 409: a concurrent conditional write of the key is in flight.
    Conflict,
    Other,
}

fn classify_rejection(err: &SdkError<PutObjectError>) -> Rejection {
    match err {
        SdkError::ServiceError(se) => match se.err().code() {
            Some("PreconditionFailed") => Rejection::Exists,
            Some("ConditionalRequestConflict") => Rejection::Conflict,
            _ => Rejection::Other,
        },
        _ => Rejection::Other,
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: Metadata,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_metadata(Some(metadata))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(unavailable)?;
        debug!(bucket, key, "put object");
        Ok(())
    }

    async fn put_if_absent(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        metadata: Metadata,
    ) -> Result<PutOutcome, StorageError> {
        let mut attempt = 1;
        loop {
            let put = self
                .client
                .put_object()
                .bucket(bucket)
                .key(key)
                .if_none_match("*")
                .set_metadata(Some(metadata.clone()))
                .body(ByteStream::from(body.clone()))
                .send()
                .await;

            let err = match put {
                Ok(_) => return Ok(PutOutcome::Created),
                Err(err) => err,
            };
            match classify_rejection(&err) {
                Rejection::Exists => return Ok(PutOutcome::AlreadyExists),
                Rejection::Conflict if attempt < CONDITIONAL_PUT_ATTEMPTS => {
                    warn!(bucket, key, attempt, "conditional put conflicted, retrying");
                    tokio::time::sleep(CONDITIONAL_PUT_BACKOFF * attempt).await;
                    attempt += 1;
                }
                _ => return Err(unavailable(err)),
            }
        }
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StorageError> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match err {
                SdkError::ServiceError(ref se) if se.err().is_no_such_key() => {
                    StorageError::not_found(bucket, key)
                }
                other => unavailable(other),
            })?;

        let metadata = out.metadata().cloned().unwrap_or_default();
        let body = out.body.collect().await.map_err(unavailable)?.into_bytes();

        Ok(StoredObject { body, metadata })
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let object_request = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await;

        match object_request {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(se)) if se.err().is_not_found() => Ok(false),
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StorageError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .max_keys(MAX_KEYS_PER_PAGE)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(unavailable)?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?;
                let size = object.size().unwrap_or_default().max(0) as u64;
                Some(ObjectInfo::new(key, size))
            })
            .collect();

        let next = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage { objects, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_bucket_and_prefix() {
        let path: S3Path = "s3://input-bucket/logs/2016/*".parse().unwrap();
        assert_eq!(path.bucket, "input-bucket");
        assert_eq!(path.prefix, "logs/2016/");

        let path: S3Path = "s3://input-bucket/logs/part-".parse().unwrap();
        assert_eq!(path.prefix, "logs/part-");

        let path: S3Path = "s3://input-bucket".parse().unwrap();
        assert_eq!(path.prefix, "");
    }

    #[test]
    fn rejects_other_schemes() {
        assert!("http://bucket/key".parse::<S3Path>().is_err());
        assert!("not a url".parse::<S3Path>().is_err());
    }

    fn rejected_put(status: u16, code: &str) -> SdkError<PutObjectError> {
        let metadata = s3::error::ErrorMetadata::builder().code(code).build();
        let raw = s3::config::http::HttpResponse::new(
            status.try_into().unwrap(),
            aws_smithy_types::body::SdkBody::empty(),
        );
        SdkError::service_error(PutObjectError::generic(metadata), raw)
    }

    #[test]
    fn a_failed_precondition_means_the_key_exists() {
        let err = rejected_put(412, "PreconditionFailed");
        assert_eq!(classify_rejection(&err), Rejection::Exists);
    }

    #[test]
    fn a_conditional_write_conflict_is_retried() {
        let err = rejected_put(409, "ConditionalRequestConflict");
        assert_eq!(classify_rejection(&err), Rejection::Conflict);
    }

    #[test]
    fn other_rejections_are_failures() {
        assert_eq!(
            classify_rejection(&rejected_put(403, "AccessDenied")),
            Rejection::Other
        );
        assert_eq!(
            classify_rejection(&SdkError::timeout_error("slow")),
            Rejection::Other
        );
    }
}
