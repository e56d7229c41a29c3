//! Object-store capability.
//!
//! Every stage reads and writes through [`ObjectStore`]; the S3-backed
//! implementation lives here and the integration tests provide an in-memory
//! one. Conditional writes carry the merge stage's optimistic concurrency.

use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use thiserror::Error;
use tracing::{info, warn};

use crate::keys;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write precondition failed for {key}")]
    PreconditionFailed { key: String },
    #[error("object store request failed for {key}: {message}")]
    Service { key: String, message: String },
}

/// An object body together with the entity tag it was read under.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub size: i64,
    pub etag: Option<String>,
}

/// Condition attached to a write; a failed condition surfaces as
/// [`StoreError::PreconditionFailed`].
#[derive(Debug, Clone)]
pub enum WritePrecondition {
    /// The object must still carry this entity tag.
    IfMatch(String),
    /// The object must not exist yet.
    IfAbsent,
}

pub trait ObjectStore {
    /// Fetch an object; `Ok(None)` when the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError>;

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError>;

    async fn put_conditional(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        precondition: WritePrecondition,
    ) -> Result<(), StoreError>;

    /// Metadata without the body; `Ok(None)` when the key does not exist.
    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError>;

    async fn list(&self, prefix: &str, max_keys: i32) -> Result<Vec<String>, StoreError>;
}

/// Production store: one bucket on S3.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ObjectStore {
    #[must_use]
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl ObjectStore for S3ObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match response {
            Ok(output) => {
                let etag = output.e_tag().map(ToString::to_string);
                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| service_failure(key, &e.to_string()))?
                    .into_bytes()
                    .to_vec();
                Ok(Some(StoredObject { body, etag }))
            }
            Err(err) => {
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_no_such_key())
                {
                    Ok(None)
                } else {
                    Err(service_failure(key, &DisplayErrorContext(&err).to_string()))
                }
            }
        }
    }

    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| service_failure(key, &DisplayErrorContext(&err).to_string()))?;
        Ok(())
    }

    async fn put_conditional(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        precondition: WritePrecondition,
    ) -> Result<(), StoreError> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body));

        let request = match precondition {
            WritePrecondition::IfMatch(etag) => request.if_match(etag),
            WritePrecondition::IfAbsent => request.if_none_match("*"),
        };

        match request.send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                if let SdkError::ServiceError(context) = &err {
                    let status = context.raw().status().as_u16();
                    if status == 412 || status == 409 {
                        return Err(StoreError::PreconditionFailed {
                            key: key.to_string(),
                        });
                    }
                }
                Err(service_failure(key, &DisplayErrorContext(&err).to_string()))
            }
        }
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        let response = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match response {
            Ok(output) => Ok(Some(ObjectMeta {
                size: output.content_length().unwrap_or(0),
                etag: output.e_tag().map(ToString::to_string),
            })),
            Err(err) => {
                if err.as_service_error().is_some_and(|e| e.is_not_found()) {
                    Ok(None)
                } else {
                    Err(service_failure(key, &DisplayErrorContext(&err).to_string()))
                }
            }
        }
    }

    async fn list(&self, prefix: &str, max_keys: i32) -> Result<Vec<String>, StoreError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .send()
            .await
            .map_err(|err| service_failure(prefix, &DisplayErrorContext(&err).to_string()))?;

        Ok(output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(ToString::to_string))
            .collect())
    }
}

fn service_failure(key: &str, message: &str) -> StoreError {
    StoreError::Service {
        key: key.to_string(),
        message: message.to_string(),
    }
}

/// Read an object that may not be visible yet (the store is allowed a short
/// read-after-write lag). Returns `Ok(None)` once the retry budget is spent.
pub async fn get_with_visibility_retry<S: ObjectStore>(
    store: &S,
    key: &str,
    policy: RetryPolicy,
) -> Result<Option<StoredObject>, StoreError> {
    for attempt in 0..policy.attempts {
        if let Some(object) = store.get(key).await? {
            return Ok(Some(object));
        }
        if attempt + 1 < policy.attempts {
            warn!(key, attempt, "object not visible yet, backing off");
            tokio::time::sleep(policy.delay(attempt)).await;
        }
    }
    Ok(None)
}

/// Log a bounded listing of the keys next to `key`, for diagnosing events
/// that arrived before their object became visible.
pub async fn log_sibling_listing<S: ObjectStore>(store: &S, key: &str) {
    let prefix = keys::parent_prefix(key);
    match store.list(&prefix, 50).await {
        Ok(listed) => info!(prefix, siblings = ?listed, "sibling listing"),
        Err(err) => warn!(prefix, error = %err, "sibling listing failed"),
    }
}
