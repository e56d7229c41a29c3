use aws_lambda_events::event::s3::S3Event;
use geodiary::config::{self, PipelineConfig};
use geodiary::keys;
use geodiary::location::LocationRouteCalculator;
use geodiary::stages::trips::{self, TripsOutcome};
use geodiary::store::S3ObjectStore;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde_json::{json, Value};
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

/// Besides store notifications, this stage accepts a manual replay payload:
/// `{"bucket": "...", "key": "processed/<dev>/date=YYYY-MM-DD/stays_enriched.json"}`.
async fn handler(event: LambdaEvent<Value>) -> Result<Value, Error> {
    let config = PipelineConfig::from_env().map_err(|e| Error::from(e.to_string()))?;
    let aws_config = config::load_aws_config().await;
    let store = S3ObjectStore::new(aws_sdk_s3::Client::new(&aws_config), config.raw_bucket.clone());
    let router = config
        .route_calculator
        .clone()
        .map(|name| LocationRouteCalculator::new(aws_sdk_location::Client::new(&aws_config), name));

    info!(
        route_calculator = router.is_some(),
        raw_bucket = config.raw_bucket,
        "trips invocation started"
    );

    let payload = event.payload;
    let records = serde_json::from_value::<S3Event>(payload.clone())
        .map(|s3_event| s3_event.records)
        .unwrap_or_default();

    if records.is_empty() {
        let bucket = payload
            .get("bucket")
            .and_then(Value::as_str)
            .unwrap_or(&config.raw_bucket)
            .to_string();
        let Some(key) = payload.get("key").and_then(Value::as_str) else {
            warn!("manual invocation without a key");
            return Ok(json!({"ok": false, "error": "no key"}));
        };
        info!(bucket, key, "manual invocation");
        let ok = process_one(&store, router.as_ref(), &config, &bucket, key).await;
        return Ok(json!({"ok": ok, "processed": u32::from(ok), "records_seen": 1}));
    }

    let mut seen = 0;
    let mut processed = 0;
    for record in records {
        seen += 1;
        let (Some(bucket), Some(key)) = (record.s3.bucket.name, record.s3.object.key) else {
            warn!("event record missing bucket or key");
            continue;
        };
        if process_one(&store, router.as_ref(), &config, &bucket, &key).await {
            processed += 1;
        }
    }

    Ok(json!({"ok": processed > 0, "processed": processed, "records_seen": seen}))
}

async fn process_one(
    store: &S3ObjectStore,
    router: Option<&LocationRouteCalculator>,
    config: &PipelineConfig,
    bucket: &str,
    key: &str,
) -> bool {
    let key = keys::normalize_event_key(key);

    if bucket != config.raw_bucket {
        info!(bucket, key, "skipping record from another bucket");
        return false;
    }

    match trips::process_stays_object(store, router, &key).await {
        Ok(TripsOutcome::Skipped(reason)) => {
            info!(key, reason, "record skipped");
            false
        }
        Ok(TripsOutcome::Written {
            trips,
            skipped_missing_center,
            ..
        }) => {
            info!(key, trips, skipped_missing_center, "trip outputs written");
            true
        }
        Err(err) => {
            error!(key, error = %err, "trip build failed");
            false
        }
    }
}
