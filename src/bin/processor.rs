use aws_lambda_events::event::s3::S3Event;
use geodiary::config::{self, PipelineConfig};
use geodiary::invoke::LambdaInvoker;
use geodiary::keys;
use geodiary::stages::merge;
use geodiary::store::S3ObjectStore;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if config::debug_mode() {
                    "debug"
                } else {
                    "info"
                })
            }),
        )
        .json()
        .init();

    run(service_fn(handler)).await
}

async fn handler(event: LambdaEvent<S3Event>) -> Result<(), Error> {
    let config = PipelineConfig::from_env().map_err(|e| Error::from(e.to_string()))?;
    let aws_config = config::load_aws_config().await;
    let store = S3ObjectStore::new(aws_sdk_s3::Client::new(&aws_config), config.raw_bucket.clone());
    let invoker = LambdaInvoker::new(aws_sdk_lambda::Client::new(&aws_config));

    for record in event.payload.records {
        let (Some(bucket), Some(key)) = (record.s3.bucket.name, record.s3.object.key) else {
            warn!("event record missing bucket or key");
            continue;
        };
        let key = keys::normalize_event_key(&key);

        if bucket != config.raw_bucket {
            info!(bucket, key, "skipping record from another bucket");
            continue;
        }

        match merge::process_raw_object(&store, Some(&invoker), &config, &key).await {
            Ok(merge::MergeOutcome::Skipped(reason)) => info!(key, reason, "record skipped"),
            Ok(merge::MergeOutcome::Merged(days)) => {
                info!(key, days = days.len(), "raw object merged");
            }
            Err(err) => error!(key, error = %err, "merge failed"),
        }
    }

    Ok(())
}
