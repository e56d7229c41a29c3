//! Object-key layout of the shared bucket.
//!
//! ```text
//! raw/{deviceId}/{tsMs}-{rid}-{idx}.json
//! processed/{deviceId}/date={YYYY-MM-DD}/
//!     points.jsonl
//!     stays.json      visits.json
//!     stays_enriched.json   visits_enriched.json
//!     trips.json      geojson.json
//!     diary_stub.txt
//! ```

use percent_encoding::percent_decode_str;

pub const RAW_PREFIX: &str = "raw/";
pub const PROCESSED_PREFIX: &str = "processed/";

pub const POINTS_FILE: &str = "points.jsonl";
pub const STAYS_FILE: &str = "stays.json";
pub const VISITS_FILE: &str = "visits.json";
pub const STAYS_ENRICHED_FILE: &str = "stays_enriched.json";
pub const VISITS_ENRICHED_FILE: &str = "visits_enriched.json";
pub const TRIPS_FILE: &str = "trips.json";
pub const GEOJSON_FILE: &str = "geojson.json";
pub const DIARY_STUB_FILE: &str = "diary_stub.txt";

#[must_use]
pub fn raw_object(device_id: &str, ts_ms: i64, rid: &str, idx: usize) -> String {
    format!("{RAW_PREFIX}{device_id}/{ts_ms}-{rid}-{idx}.json")
}

#[must_use]
pub fn day_prefix(device_id: &str, day: &str) -> String {
    format!("{PROCESSED_PREFIX}{device_id}/date={day}")
}

#[must_use]
pub fn points_object(device_id: &str, day: &str) -> String {
    format!("{}/{POINTS_FILE}", day_prefix(device_id, day))
}

/// Replace the file-name component of `key` with `file_name`.
#[must_use]
pub fn sibling(key: &str, file_name: &str) -> String {
    key.rsplit_once('/').map_or_else(
        || file_name.to_string(),
        |(prefix, _)| format!("{prefix}/{file_name}"),
    )
}

/// The directory-style prefix of `key`, trailing slash included.
#[must_use]
pub fn parent_prefix(key: &str) -> String {
    key.rsplit_once('/')
        .map_or_else(String::new, |(prefix, _)| format!("{prefix}/"))
}

/// Extract (device, day) from a `processed/{device}/date={day}/...` key.
#[must_use]
pub fn parse_processed_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix(PROCESSED_PREFIX)?;
    let (device_id, rest) = rest.split_once('/')?;
    let (date_dir, _file) = rest.split_once('/')?;
    let day = date_dir.strip_prefix("date=")?;
    Some((device_id, day))
}

/// Undo the encoding applied to keys in store notifications (`+` for spaces,
/// percent-escapes) and clean up slash artifacts.
#[must_use]
pub fn normalize_event_key(raw: &str) -> String {
    let decoded = percent_decode_str(&raw.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned();
    let mut key = decoded.trim_start_matches('/').to_string();
    while key.contains("//") {
        key = key.replace("//", "/");
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_object_key_shape() {
        assert_eq!(
            raw_object("d1", 1_714_557_600_000, "ab12cd34", 0),
            "raw/d1/1714557600000-ab12cd34-0.json"
        );
    }

    #[test]
    fn sibling_swaps_only_the_file_name() {
        let key = "processed/d1/date=2024-05-01/stays.json";
        assert_eq!(
            sibling(key, STAYS_ENRICHED_FILE),
            "processed/d1/date=2024-05-01/stays_enriched.json"
        );
        assert_eq!(parent_prefix(key), "processed/d1/date=2024-05-01/");
    }

    #[test]
    fn parse_processed_key_extracts_device_and_day() {
        assert_eq!(
            parse_processed_key("processed/d1/date=2024-05-01/points.jsonl"),
            Some(("d1", "2024-05-01"))
        );
        assert_eq!(parse_processed_key("raw/d1/1-a-0.json"), None);
    }

    #[test]
    fn normalize_event_key_undoes_notification_encoding() {
        assert_eq!(
            normalize_event_key("processed/my%20device/date%3D2024-05-01/points.jsonl"),
            "processed/my device/date=2024-05-01/points.jsonl"
        );
        assert_eq!(normalize_event_key("a+b/c.json"), "a b/c.json");
        assert_eq!(normalize_event_key("//raw//d1/x.json"), "raw/d1/x.json");
    }
}
