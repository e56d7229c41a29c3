//! Enrichment: attach reverse-geocoded labels to stays and visits.
//!
//! Segments are handled as loose JSON so unknown fields pass through and the
//! visits variant can fall back through its historical coordinate holders
//! (`center`, `point`, `location`, the record itself). Stays only ever use
//! `center`. A segment without usable coordinates keeps a null label.

use serde_json::Value;
use tracing::{error, info, warn};

use crate::config::PipelineConfig;
use crate::keys;
use crate::location::{reverse_geocode_with_retry, Geocoder};
use crate::stages::JSON_CONTENT_TYPE;
use crate::store::{get_with_visibility_retry, log_sibling_listing, ObjectStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Stays,
    Visits,
}

impl SegmentKind {
    /// Classify an event key; `None` for keys this stage does not own.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        if !key.starts_with(keys::PROCESSED_PREFIX) {
            return None;
        }
        if key.ends_with(keys::STAYS_FILE) {
            Some(Self::Stays)
        } else if key.ends_with(keys::VISITS_FILE) {
            Some(Self::Visits)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn output_file(self) -> &'static str {
        match self {
            Self::Stays => keys::STAYS_ENRICHED_FILE,
            Self::Visits => keys::VISITS_ENRICHED_FILE,
        }
    }
}

#[derive(Debug)]
pub enum EnrichOutcome {
    Skipped(&'static str),
    Enriched { out_key: String, count: usize },
}

/// Handle one `stays.json` / `visits.json` object.
pub async fn process_segments_object<S, G>(
    store: &S,
    geocoder: &G,
    config: &PipelineConfig,
    key: &str,
) -> Result<EnrichOutcome, StoreError>
where
    S: ObjectStore,
    G: Geocoder,
{
    let Some(kind) = SegmentKind::from_key(key) else {
        return Ok(EnrichOutcome::Skipped("key_not_segments"));
    };

    let Some(object) = get_with_visibility_retry(store, key, config.read_retry).await? else {
        error!(key, "input never became visible, abandoning event");
        log_sibling_listing(store, key).await;
        return Ok(EnrichOutcome::Skipped("input_not_visible"));
    };

    let Ok(value) = serde_json::from_slice::<Value>(&object.body) else {
        warn!(key, "segments object is not valid JSON");
        return Ok(EnrichOutcome::Skipped("invalid_json"));
    };
    let Value::Array(segments) = value else {
        info!(key, "segments object is not a list, skipping");
        return Ok(EnrichOutcome::Skipped("not_a_list"));
    };

    let mut enriched = Vec::with_capacity(segments.len());
    for mut segment in segments {
        annotate_segment(&mut segment, kind, geocoder, config).await;
        enriched.push(segment);
    }

    let out_key = keys::sibling(key, kind.output_file());
    let body = serde_json::to_vec(&enriched).map_err(|err| StoreError::Service {
        key: out_key.clone(),
        message: err.to_string(),
    })?;
    store.put(&out_key, body, JSON_CONTENT_TYPE).await?;
    info!(out_key, count = enriched.len(), "wrote enriched segments");

    Ok(EnrichOutcome::Enriched {
        out_key,
        count: enriched.len(),
    })
}

async fn annotate_segment<G: Geocoder>(
    segment: &mut Value,
    kind: SegmentKind,
    geocoder: &G,
    config: &PipelineConfig,
) {
    if !segment.is_object() {
        // Not a record; leave it untouched.
        return;
    }

    let coords = match kind {
        SegmentKind::Stays => segment.get("center").and_then(coords_of),
        SegmentKind::Visits => coords_of(visit_coordinate_holder(segment)),
    };

    let Some((lat, lon)) = coords else {
        set_field(segment, "label", Value::Null);
        return;
    };

    match reverse_geocode_with_retry(geocoder, lat, lon, config.geocode_retry).await {
        Some(place) => {
            set_field(
                segment,
                "label",
                place.label.map_or(Value::Null, Value::String),
            );
            if let Ok(info) = serde_json::to_value(&place.info) {
                set_field(segment, "placeInfo", info);
            }
        }
        None => set_field(segment, "label", Value::Null),
    }
}

/// Visits historically carried their coordinates under several names; the
/// first non-empty object wins, and the record itself is the last resort.
fn visit_coordinate_holder(segment: &Value) -> &Value {
    for field in ["center", "point", "location"] {
        if let Some(candidate) = segment.get(field) {
            if candidate.as_object().is_some_and(|map| !map.is_empty()) {
                return candidate;
            }
        }
    }
    segment
}

fn coords_of(holder: &Value) -> Option<(f64, f64)> {
    let lat = holder.get("lat").and_then(Value::as_f64)?;
    let lon = holder.get("lon").and_then(Value::as_f64)?;
    Some((lat, lon))
}

fn set_field(segment: &mut Value, field: &str, value: Value) {
    if let Some(map) = segment.as_object_mut() {
        map.insert(field.to_string(), value);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_is_derived_from_the_key_suffix() {
        assert_eq!(
            SegmentKind::from_key("processed/d1/date=2024-05-01/stays.json"),
            Some(SegmentKind::Stays)
        );
        assert_eq!(
            SegmentKind::from_key("processed/d1/date=2024-05-01/visits.json"),
            Some(SegmentKind::Visits)
        );
        // Already-enriched outputs and foreign keys are not inputs.
        assert_eq!(
            SegmentKind::from_key("processed/d1/date=2024-05-01/stays_enriched.json"),
            None
        );
        assert_eq!(SegmentKind::from_key("raw/d1/1-a-0.json"), None);
    }

    #[test]
    fn visit_holder_falls_back_through_the_historical_names() {
        let with_point = json!({"point": {"lat": 1.0, "lon": 2.0}});
        assert_eq!(coords_of(visit_coordinate_holder(&with_point)), Some((1.0, 2.0)));

        // An empty center is skipped, not chosen.
        let empty_center = json!({"center": {}, "location": {"lat": 3.0, "lon": 4.0}});
        assert_eq!(
            coords_of(visit_coordinate_holder(&empty_center)),
            Some((3.0, 4.0))
        );

        let flat = json!({"lat": 5.0, "lon": 6.0});
        assert_eq!(coords_of(visit_coordinate_holder(&flat)), Some((5.0, 6.0)));
    }

    #[test]
    fn stay_coords_come_only_from_center() {
        let stay = json!({"center": {"lat": 1.0, "lon": 2.0}});
        assert_eq!(stay.get("center").and_then(coords_of), Some((1.0, 2.0)));

        let no_center = json!({"point": {"lat": 1.0, "lon": 2.0}});
        assert_eq!(no_center.get("center").and_then(coords_of), None);
    }
}
