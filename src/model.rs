//! Canonical records shared by the pipeline stages.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::geo;

/// Timestamps are stored with second precision and a trailing `Z`.
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Dedupe rounds coordinates to six decimal places (~0.11 m).
const DEDUPE_COORD_PRECISION: i32 = 6;

/// A single normalized observation inside a per-day point file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(with = "ts_seconds_utc")]
    pub ts: DateTime<Utc>,
}

impl Point {
    /// UTC calendar day the point belongs to (`YYYY-MM-DD`).
    #[must_use]
    pub fn utc_day(&self) -> String {
        self.ts.format("%Y-%m-%d").to_string()
    }

    /// Canonical identity under which duplicates collapse:
    /// (`ts`, round(lat, 6), round(lon, 6)).
    #[must_use]
    pub fn dedupe_key(&self) -> (i64, i64, i64) {
        (
            self.ts.timestamp(),
            micro_degrees(self.lat),
            micro_degrees(self.lon),
        )
    }

    /// Total order used for the canonical file: `ts` first, then the rounded
    /// coordinates so equal-second points from different batches always land
    /// in the same sequence.
    #[must_use]
    pub fn sort_key(&self) -> (i64, i64, i64) {
        self.dedupe_key()
    }
}

fn micro_degrees(value: f64) -> i64 {
    (geo::round_coordinate(value, DEDUPE_COORD_PRECISION) * 1e6).round() as i64
}

/// The raw object body written by ingest, one per accepted sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub device_id: String,
    /// Milliseconds since the epoch, UTC.
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Arithmetic-mean center of a segment's window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Center {
    pub lat: f64,
    pub lon: f64,
}

/// A dwell period: the same shape serves stays and visits, computed under
/// different radius/duration regimes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub center: Center,
    #[serde(with = "ts_seconds_utc")]
    pub start: DateTime<Utc>,
    #[serde(with = "ts_seconds_utc")]
    pub end: DateTime<Utc>,
}

/// Recognized reverse-geocode attributes; absent keys are omitted on the
/// wire. The key set is closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subregion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighborhood: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One end of a trip, taken from the bounding stays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripEndpoint {
    pub time: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub label: Option<String>,
}

/// A journey between two temporally adjacent stays on the same day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub from: TripEndpoint,
    pub to: TripEndpoint,
    pub distance_km: Option<f64>,
    pub fallback: bool,
}

/// Format a timestamp in the canonical second-precision form.
#[must_use]
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

/// Parse an ISO-8601 timestamp with `Z` or an explicit offset.
#[must_use]
pub fn parse_ts(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Epoch milliseconds to a second-precision UTC instant (floor division, as
/// the stored format cannot carry the fraction anyway).
#[must_use]
pub fn ts_from_ms(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ms.div_euclid(1000), 0).single()
}

/// Serde codec for the canonical `%Y-%m-%dT%H:%M:%SZ` representation.
pub mod ts_seconds_utc {
    use chrono::{DateTime, Utc};
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_ts(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_ts(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}")))
    }
}
