//! Fire-and-forget chaining between pipeline stages.
//!
//! A stage that finishes writing an output hands the next stage a synthetic
//! store-notification event naming that object. Delivery is best-effort; a
//! failed invocation is logged and swallowed so replaying the triggering
//! event stays the recovery path.

use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[error("async invocation failed: {0}")]
pub struct InvokeError(pub String);

pub trait StageInvoker {
    /// Asynchronously invoke `function_name` with an object-created event for
    /// `bucket`/`key`.
    async fn invoke_object_created(
        &self,
        function_name: &str,
        bucket: &str,
        key: &str,
    ) -> Result<(), InvokeError>;
}

/// Build the synthetic store-notification payload.
#[must_use]
pub fn object_created_event(bucket: &str, key: &str) -> serde_json::Value {
    json!({
        "Records": [{
            "s3": {
                "bucket": { "name": bucket },
                "object": { "key": key }
            }
        }]
    })
}

#[derive(Debug, Clone)]
pub struct LambdaInvoker {
    client: aws_sdk_lambda::Client,
}

impl LambdaInvoker {
    #[must_use]
    pub fn new(client: aws_sdk_lambda::Client) -> Self {
        Self { client }
    }
}

impl StageInvoker for LambdaInvoker {
    async fn invoke_object_created(
        &self,
        function_name: &str,
        bucket: &str,
        key: &str,
    ) -> Result<(), InvokeError> {
        let payload = object_created_event(bucket, key).to_string();
        self.client
            .invoke()
            .function_name(function_name)
            .invocation_type(InvocationType::Event)
            .payload(Blob::new(payload.into_bytes()))
            .send()
            .await
            .map_err(|err| InvokeError(DisplayErrorContext(&err).to_string()))?;
        Ok(())
    }
}

/// Chain into the next stage when both a transport and a target are
/// configured; failures are logged, never propagated.
pub async fn invoke_next_stage<I: StageInvoker>(
    invoker: Option<&I>,
    function_name: Option<&str>,
    bucket: &str,
    key: &str,
) {
    let (Some(invoker), Some(function_name)) = (invoker, function_name) else {
        return;
    };
    if let Err(err) = invoker.invoke_object_created(function_name, bucket, key).await {
        warn!(function_name, key, error = %err, "async invoke failed");
    }
}
