//! Ingest: accept a batch or single location payload, mirror positions to
//! the live tracker, optionally attach a reverse-geocoded address, and write
//! one raw object per accepted sample.
//!
//! Only this stage talks to a caller; tracker and geocoder failures are
//! logged and never abort the store writes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::keys;
use crate::location::{Geocoder, PositionUpdate, Tracker};
use crate::model::RawRecord;
use crate::payload::LocationPayload;
use crate::stages::JSON_CONTENT_TYPE;
use crate::store::ObjectStore;

/// Tracker updates go out in groups of at most this many positions.
const TRACKER_BATCH_SIZE: usize = 10;

/// Correlation id length embedded in raw object keys.
const RID_LEN: usize = 8;

#[derive(Debug, Serialize)]
pub struct IngestReceipt {
    pub ok: bool,
    pub saved: usize,
    pub keys: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestRejection {
    pub ok: bool,
    pub error: String,
}

#[derive(Debug)]
pub enum IngestOutcome {
    /// Maps to HTTP 200.
    Accepted(IngestReceipt),
    /// Maps to HTTP 400.
    Rejected(IngestRejection),
}

fn rejection(error: &str) -> IngestOutcome {
    IngestOutcome::Rejected(IngestRejection {
        ok: false,
        error: error.to_string(),
    })
}

/// Derive the 8-character correlation id from the invocation's request id,
/// falling back to a random one for hosts that do not supply it.
#[must_use]
pub fn correlation_rid(request_id: &str) -> String {
    let trimmed: String = request_id.chars().take(RID_LEN).collect();
    if trimmed.is_empty() {
        Uuid::new_v4().simple().to_string()[..RID_LEN].to_string()
    } else {
        trimmed
    }
}

pub async fn process_body<S, T, G>(
    store: &S,
    tracker: Option<&T>,
    geocoder: Option<&G>,
    request_id: &str,
    body: &[u8],
    now: DateTime<Utc>,
) -> IngestOutcome
where
    S: ObjectStore,
    T: Tracker,
    G: Geocoder,
{
    let Ok(payload) = serde_json::from_slice::<LocationPayload>(body) else {
        return rejection("invalid_json");
    };

    let batch = payload.normalize(now);
    if batch.samples.is_empty() {
        return rejection("no_valid_locations");
    }

    let rid = correlation_rid(request_id);
    debug!(
        rid,
        device_id = batch.device_id,
        samples = batch.samples.len(),
        "accepted location payload"
    );

    if let Some(tracker) = tracker {
        let updates: Vec<PositionUpdate> = batch
            .samples
            .iter()
            .map(|sample| PositionUpdate {
                device_id: batch.device_id.clone(),
                lon: sample.lon,
                lat: sample.lat,
                ts_ms: sample.ts_ms,
            })
            .collect();
        for chunk in updates.chunks(TRACKER_BATCH_SIZE) {
            if let Err(err) = tracker.batch_update(chunk).await {
                warn!(error = %err, positions = chunk.len(), "tracker update failed");
            }
        }
    }

    let mut saved_keys = Vec::with_capacity(batch.samples.len());
    for (idx, sample) in batch.samples.iter().enumerate() {
        let address = match geocoder {
            Some(geocoder) => match geocoder.reverse_geocode(sample.lat, sample.lon).await {
                Ok(place) => place.and_then(|p| p.label),
                Err(err) => {
                    warn!(error = %err, "ingest reverse geocode failed");
                    None
                }
            },
            None => None,
        };

        let record = RawRecord {
            device_id: batch.device_id.clone(),
            timestamp: sample.ts_ms,
            latitude: sample.lat,
            longitude: sample.lon,
            address,
        };
        let Ok(body) = serde_json::to_vec(&record) else {
            continue;
        };

        let key = keys::raw_object(&batch.device_id, sample.ts_ms, &rid, idx);
        match store.put(&key, body, JSON_CONTENT_TYPE).await {
            Ok(()) => saved_keys.push(key),
            Err(err) => error!(key, error = %err, "raw object write failed"),
        }
    }

    IngestOutcome::Accepted(IngestReceipt {
        ok: true,
        saved: saved_keys.len(),
        keys: saved_keys,
    })
}
