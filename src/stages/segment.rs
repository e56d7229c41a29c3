//! Segmentation: detect dwell periods in a day's point file.
//!
//! A single pass slides a window with a moving centroid. When a point pushes
//! the window past the regime radius, the window up to (but excluding) that
//! point is emitted if it lasted long enough, and the boundary point seeds
//! the next window. Stays and visits are the same computation under
//! different thresholds.

use tracing::{info, warn};

use crate::config::{PipelineConfig, SegmentThresholds};
use crate::geo;
use crate::invoke::{invoke_next_stage, StageInvoker};
use crate::keys;
use crate::model::{Center, Point, Segment};
use crate::stages::merge::parse_points_lenient;
use crate::stages::JSON_CONTENT_TYPE;
use crate::store::{ObjectStore, StoreError};

#[derive(Debug)]
pub enum SegmentOutcome {
    Skipped(&'static str),
    Segmented {
        stays_key: String,
        visits_key: String,
        stays: usize,
        visits: usize,
    },
}

/// Pure dwell detection over a time-ordered point slice.
#[must_use]
pub fn detect_segments(points: &[Point], thresholds: SegmentThresholds) -> Vec<Segment> {
    let mut segments = Vec::new();
    let n = points.len();
    if n == 0 {
        return segments;
    }

    let mut start = 0;
    for i in 1..=n {
        let window = &points[start..i];
        let center = centroid(window);
        let max_r = window
            .iter()
            .map(|p| geo::haversine_m(center.lat, center.lon, p.lat, p.lon))
            .fold(0.0, f64::max);
        let duration = (window[window.len() - 1].ts - window[0].ts).num_seconds();

        if max_r > thresholds.radius_m {
            if duration >= thresholds.min_duration_s && window.len() > 1 {
                // The boundary point is excluded here but restarts the next
                // window, so it belongs to both.
                segments.push(segment_over(&points[start..i - 1]));
            }
            start = i - 1;
        }
    }

    let tail = &points[start..];
    let tail_duration = (tail[tail.len() - 1].ts - tail[0].ts).num_seconds();
    if tail_duration >= thresholds.min_duration_s && tail.len() > 1 {
        segments.push(segment_over(tail));
    }

    segments
}

fn centroid(window: &[Point]) -> Center {
    let n = window.len() as f64;
    Center {
        lat: window.iter().map(|p| p.lat).sum::<f64>() / n,
        lon: window.iter().map(|p| p.lon).sum::<f64>() / n,
    }
}

fn segment_over(window: &[Point]) -> Segment {
    Segment {
        center: centroid(window),
        start: window[0].ts,
        end: window[window.len() - 1].ts,
    }
}

/// Handle one `points.jsonl`: compute both segment collections and write the
/// sibling `stays.json` / `visits.json`, then chain each into enrichment.
pub async fn process_points_object<S, I>(
    store: &S,
    invoker: Option<&I>,
    config: &PipelineConfig,
    key: &str,
) -> Result<SegmentOutcome, StoreError>
where
    S: ObjectStore,
    I: StageInvoker,
{
    if !key.starts_with(keys::PROCESSED_PREFIX) || !key.ends_with(keys::POINTS_FILE) {
        return Ok(SegmentOutcome::Skipped("key_not_points"));
    }

    let Some(object) = store.get(key).await? else {
        warn!(key, "points object not found");
        return Ok(SegmentOutcome::Skipped("points_missing"));
    };

    let device_fallback = keys::parse_processed_key(key).map_or("", |(device, _)| device);
    let mut points = parse_points_lenient(&object.body, device_fallback);
    points.sort_by_key(Point::sort_key);

    let stays = detect_segments(&points, config.stay);
    let visits = detect_segments(&points, config.visit);
    info!(
        key,
        points = points.len(),
        stays = stays.len(),
        visits = visits.len(),
        "segmented day"
    );

    let stays_key = keys::sibling(key, keys::STAYS_FILE);
    let visits_key = keys::sibling(key, keys::VISITS_FILE);
    write_segments(store, &stays_key, &stays).await?;
    write_segments(store, &visits_key, &visits).await?;

    for out_key in [&stays_key, &visits_key] {
        invoke_next_stage(
            invoker,
            config.enrich_function.as_deref(),
            &config.raw_bucket,
            out_key,
        )
        .await;
    }

    Ok(SegmentOutcome::Segmented {
        stays_key,
        visits_key,
        stays: stays.len(),
        visits: visits.len(),
    })
}

async fn write_segments<S: ObjectStore>(
    store: &S,
    key: &str,
    segments: &[Segment],
) -> Result<(), StoreError> {
    let body = serde_json::to_vec(segments).map_err(|err| StoreError::Service {
        key: key.to_string(),
        message: err.to_string(),
    })?;
    store.put(key, body, JSON_CONTENT_TYPE).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{format_ts, parse_ts};
    use chrono::{DateTime, Duration, Utc};

    const STAY: SegmentThresholds = SegmentThresholds::STAY_DEFAULT;

    fn base() -> DateTime<Utc> {
        parse_ts("2024-05-01T09:00:00Z").unwrap()
    }

    fn point(offset_s: i64, lat: f64, lon: f64) -> Point {
        Point {
            device_id: "d1".to_string(),
            lat,
            lon,
            ts: base() + Duration::seconds(offset_s),
        }
    }

    #[test]
    fn empty_and_single_point_yield_no_segments() {
        assert!(detect_segments(&[], STAY).is_empty());
        assert!(detect_segments(&[point(0, 35.68, 139.76)], STAY).is_empty());
    }

    #[test]
    fn stationary_dwell_becomes_one_segment_spanning_everything() {
        let points: Vec<Point> = (0..30).map(|i| point(i * 20, 35.68, 139.76)).collect();

        let stays = detect_segments(&points, STAY);
        assert_eq!(stays.len(), 1);
        assert_eq!(format_ts(stays[0].start), "2024-05-01T09:00:00Z");
        assert_eq!(format_ts(stays[0].end), "2024-05-01T09:09:40Z");
        assert!((stays[0].center.lat - 35.68).abs() < 1e-9);
        assert!((stays[0].center.lon - 139.76).abs() < 1e-9);

        let visits = detect_segments(&points, SegmentThresholds::VISIT_DEFAULT);
        assert_eq!(visits.len(), 1);
        assert_eq!(format_ts(visits[0].start), format_ts(stays[0].start));
        assert_eq!(format_ts(visits[0].end), format_ts(stays[0].end));
    }

    #[test]
    fn short_dwell_is_a_visit_but_not_a_stay() {
        // One minute at a point: over the 30 s visit floor, under the 300 s
        // stay floor.
        let points: Vec<Point> = (0..4).map(|i| point(i * 20, 35.68, 139.76)).collect();

        assert!(detect_segments(&points, STAY).is_empty());
        assert_eq!(detect_segments(&points, SegmentThresholds::VISIT_DEFAULT).len(), 1);
    }

    #[test]
    fn movement_splits_two_dwells_and_reuses_the_boundary_point() {
        // Ten minutes at A, then a jump ~5.5 km north, twenty minutes at B.
        let mut points: Vec<Point> = (0..=10).map(|i| point(i * 60, 35.68, 139.76)).collect();
        points.extend((0..=20).map(|i| point(3600 + i * 60, 35.73, 139.76)));

        let stays = detect_segments(&points, STAY);
        assert_eq!(stays.len(), 2);
        assert_eq!(format_ts(stays[0].start), "2024-05-01T09:00:00Z");
        assert_eq!(format_ts(stays[0].end), "2024-05-01T09:10:00Z");
        assert_eq!(format_ts(stays[1].start), "2024-05-01T10:00:00Z");
        assert_eq!(format_ts(stays[1].end), "2024-05-01T10:20:00Z");
        assert!((stays[1].center.lat - 35.73).abs() < 1e-9);
    }

    #[test]
    fn too_brief_excursion_between_windows_emits_nothing() {
        // Two far-apart points a few seconds apart: radius breaks but no
        // window ever meets the stay minimum.
        let points = vec![point(0, 35.68, 139.76), point(10, 35.80, 139.76)];
        assert!(detect_segments(&points, STAY).is_empty());
    }
}
