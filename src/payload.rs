//! Ingress payload shapes and their normalization.
//!
//! The same rules apply at both entry points: the HTTP body accepted by
//! ingest and the raw objects re-read by the merge stage. Downstream code
//! only ever sees the canonical `{deviceId, lat, lon, ts}` record.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::model::{self, Point};

pub const DEFAULT_DEVICE_ID: &str = "web-unknown";

/// Numeric timestamps above this are milliseconds, below are seconds.
const MS_THRESHOLD: f64 = 1e12;

/// The two accepted request shapes. A body with a `locations` array is a
/// batch; anything else is treated as a single sample.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum LocationPayload {
    Batch {
        #[serde(rename = "deviceId")]
        device_id: Option<String>,
        locations: Vec<Value>,
    },
    Single {
        #[serde(rename = "deviceId")]
        device_id: Option<String>,
        #[serde(flatten)]
        sample: Value,
    },
}

/// A sample that survived normalization: in-range coordinates and a decided
/// UTC instant in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub lat: f64,
    pub lon: f64,
    pub ts_ms: i64,
}

#[derive(Debug)]
pub struct NormalizedBatch {
    pub device_id: String,
    pub samples: Vec<Sample>,
}

impl LocationPayload {
    /// Normalize to canonical samples. Undecidable records (missing or
    /// out-of-range coordinates, unparseable timestamps) are dropped, never
    /// defaulted; an absent timestamp means `now`.
    #[must_use]
    pub fn normalize(self, now: DateTime<Utc>) -> NormalizedBatch {
        match self {
            Self::Batch {
                device_id,
                locations,
            } => NormalizedBatch {
                device_id: resolve_device_id(device_id),
                samples: locations
                    .iter()
                    .filter_map(|value| sample_from_value(value, now))
                    .collect(),
            },
            Self::Single { device_id, sample } => NormalizedBatch {
                device_id: resolve_device_id(device_id),
                samples: sample_from_value(&sample, now).into_iter().collect(),
            },
        }
    }
}

impl NormalizedBatch {
    /// Lift the samples into canonical points (second-precision timestamps).
    #[must_use]
    pub fn points(&self) -> Vec<Point> {
        self.samples
            .iter()
            .filter_map(|sample| {
                Some(Point {
                    device_id: self.device_id.clone(),
                    lat: sample.lat,
                    lon: sample.lon,
                    ts: model::ts_from_ms(sample.ts_ms)?,
                })
            })
            .collect()
    }
}

fn resolve_device_id(device_id: Option<String>) -> String {
    device_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string())
}

fn sample_from_value(value: &Value, now: DateTime<Utc>) -> Option<Sample> {
    let lat = coerce_f64(value.get("latitude").or_else(|| value.get("lat"))?)?;
    let lon = coerce_f64(value.get("longitude").or_else(|| value.get("lon"))?)?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }

    let ts_ms = match value.get("timestamp") {
        None | Some(Value::Null) => now.timestamp_millis(),
        Some(raw) => timestamp_to_ms(raw)?,
    };

    Some(Sample { lat, lon, ts_ms })
}

/// Accept numbers and numeric strings; anything else is undecidable.
#[must_use]
pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalize a timestamp value to UTC epoch milliseconds.
///
/// Numbers are seconds or milliseconds, disambiguated by magnitude; strings
/// must be ISO-8601 with a trailing `Z` or an explicit offset.
#[must_use]
pub fn timestamp_to_ms(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if !raw.is_finite() {
                return None;
            }
            let ms = if raw > MS_THRESHOLD { raw } else { raw * 1000.0 };
            Some(ms as i64)
        }
        Value::String(s) => Some(model::parse_ts(s)?.timestamp_millis()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        model::parse_ts("2024-05-01T12:00:00Z").unwrap()
    }

    #[test]
    fn batch_shape_takes_priority_and_filters_bad_entries() {
        let payload: LocationPayload = serde_json::from_value(json!({
            "deviceId": "d1",
            "locations": [
                {"latitude": 35.68, "longitude": 139.76, "timestamp": "2024-05-01T10:00:00Z"},
                {"latitude": "not-a-number", "longitude": 139.76},
                {"longitude": 139.76, "timestamp": 1_714_557_600},
            ]
        }))
        .unwrap();

        let batch = payload.normalize(now());
        assert_eq!(batch.device_id, "d1");
        assert_eq!(
            batch.samples,
            vec![Sample {
                lat: 35.68,
                lon: 139.76,
                ts_ms: 1_714_557_600_000
            }]
        );
    }

    #[test]
    fn single_shape_accepts_short_field_names() {
        let payload: LocationPayload = serde_json::from_value(json!({
            "lat": "35.68",
            "lon": 139.76,
            "timestamp": 1_714_557_600_000_i64
        }))
        .unwrap();

        let batch = payload.normalize(now());
        assert_eq!(batch.device_id, DEFAULT_DEVICE_ID);
        assert_eq!(batch.samples[0].ts_ms, 1_714_557_600_000);
    }

    #[test]
    fn mixed_timestamp_units_normalize_to_one_instant() {
        let expected = 1_714_557_600_000_i64;
        assert_eq!(timestamp_to_ms(&json!(1_714_557_600)), Some(expected));
        assert_eq!(timestamp_to_ms(&json!(1_714_557_600_000_i64)), Some(expected));
        assert_eq!(
            timestamp_to_ms(&json!("2024-05-01T10:00:00Z")),
            Some(expected)
        );
        assert_eq!(
            timestamp_to_ms(&json!("2024-05-01T19:00:00+09:00")),
            Some(expected)
        );
    }

    #[test]
    fn absent_timestamp_defaults_to_now_but_garbage_drops_the_record() {
        let fresh: LocationPayload =
            serde_json::from_value(json!({"latitude": 1.0, "longitude": 2.0})).unwrap();
        let batch = fresh.normalize(now());
        assert_eq!(batch.samples[0].ts_ms, now().timestamp_millis());

        let garbage: LocationPayload = serde_json::from_value(
            json!({"latitude": 1.0, "longitude": 2.0, "timestamp": "yesterday-ish"}),
        )
        .unwrap();
        assert!(garbage.normalize(now()).samples.is_empty());
    }

    #[test]
    fn out_of_range_coordinates_are_dropped() {
        let payload: LocationPayload = serde_json::from_value(json!({
            "locations": [
                {"latitude": 91.0, "longitude": 0.0},
                {"latitude": 0.0, "longitude": -181.0},
            ]
        }))
        .unwrap();
        assert!(payload.normalize(now()).samples.is_empty());
    }

    #[test]
    fn empty_device_id_falls_back_to_default() {
        let payload: LocationPayload = serde_json::from_value(json!({
            "deviceId": "  ",
            "locations": [{"lat": 1.0, "lon": 2.0, "timestamp": 1_714_557_600}]
        }))
        .unwrap();
        assert_eq!(payload.normalize(now()).device_id, DEFAULT_DEVICE_ID);
    }
}
