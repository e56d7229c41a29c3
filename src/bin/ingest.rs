use chrono::Utc;
use geodiary::config::{self, PipelineConfig};
use geodiary::location::{LocationTracker, PlaceIndexGeocoder};
use geodiary::stages::ingest::{self, IngestOutcome};
use geodiary::store::S3ObjectStore;
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::Serialize;
use tracing::info;

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

    run(service_fn(function_handler)).await
}

async fn function_handler(event: Request) -> Result<Response<Body>, Error> {
    if event.method().as_str() == "OPTIONS" {
        return respond(200, &serde_json::json!({"ok": true}));
    }

    let config = PipelineConfig::from_env().map_err(|e| Error::from(e.to_string()))?;
    let aws_config = config::load_aws_config().await;
    let store = S3ObjectStore::new(aws_sdk_s3::Client::new(&aws_config), config.raw_bucket.clone());
    let location_client = aws_sdk_location::Client::new(&aws_config);

    let tracker = config
        .tracker_name
        .clone()
        .map(|name| LocationTracker::new(location_client.clone(), name));
    let geocoder = config
        .place_index
        .clone()
        .map(|index| PlaceIndexGeocoder::new(location_client, index, config.max_results));

    let request_id = event.lambda_context().request_id;
    info!(
        request_id,
        method = event.method().as_str(),
        "ingest request received"
    );

    let outcome = ingest::process_body(
        &store,
        tracker.as_ref(),
        geocoder.as_ref(),
        &request_id,
        event.body().as_ref(),
        Utc::now(),
    )
    .await;

    match outcome {
        IngestOutcome::Accepted(receipt) => respond(200, &receipt),
        IngestOutcome::Rejected(rejection) => respond(400, &rejection),
    }
}

fn respond<T: Serialize>(status: u16, body: &T) -> Result<Response<Body>, Error> {
    let payload = serde_json::to_string(body)?;
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "OPTIONS,POST")
        .header("Access-Control-Allow-Headers", "Content-Type,x-api-key")
        .body(Body::from(payload))
        .map_err(|e| Error::from(e.to_string()))
}
