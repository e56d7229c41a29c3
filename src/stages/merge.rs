//! Merge: fold a raw object into the canonical per-(device, UTC day) point
//! file.
//!
//! The merge is a read-merge-write transaction per day: existing lines are
//! parsed tolerantly, new points appended, duplicates collapsed under
//! (`ts`, round(lat, 6), round(lon, 6)) with the first occurrence winning,
//! and the union rewritten in total order. Replaying the same raw object is
//! byte-for-byte idempotent. Concurrent merges for the same day are resolved
//! with conditional writes: a lost precondition re-runs the transaction.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::invoke::{invoke_next_stage, StageInvoker};
use crate::keys;
use crate::model::{self, Point};
use crate::payload::{self, LocationPayload};
use crate::stages::{JSONL_CONTENT_TYPE, TEXT_CONTENT_TYPE};
use crate::store::{ObjectStore, StoreError, WritePrecondition};

#[derive(Debug)]
pub struct DayMerge {
    pub day: String,
    pub key: String,
    pub appended: usize,
    pub total: usize,
}

#[derive(Debug)]
pub enum MergeOutcome {
    Skipped(&'static str),
    Merged(Vec<DayMerge>),
}

#[derive(Debug)]
pub struct MergedPoints {
    pub points: Vec<Point>,
    /// Incoming points that were not already present.
    pub appended: usize,
}

/// Dedupe, append, and re-sort. Existing points win ties against incoming
/// ones, and the result is totally ordered by (`ts`, lat, lon) so the merge
/// is insensitive to arrival order.
#[must_use]
pub fn merge_points(existing: Vec<Point>, incoming: Vec<Point>) -> MergedPoints {
    let mut seen: HashSet<(i64, i64, i64)> = HashSet::new();
    let mut points: Vec<Point> = Vec::with_capacity(existing.len() + incoming.len());

    for point in existing {
        if seen.insert(point.dedupe_key()) {
            points.push(point);
        }
    }
    let base = points.len();
    for point in incoming {
        if seen.insert(point.dedupe_key()) {
            points.push(point);
        }
    }
    let appended = points.len() - base;

    points.sort_by_key(Point::sort_key);
    MergedPoints { points, appended }
}

/// Parse a `points.jsonl` body, dropping malformed lines silently.
#[must_use]
pub fn parse_points_lenient(body: &[u8], device_fallback: &str) -> Vec<Point> {
    let text = String::from_utf8_lossy(body);
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| point_from_line(line, device_fallback))
        .collect()
}

/// Canonical serialization: one compact record per line, append order equal
/// to sort order, trailing newline.
#[must_use]
pub fn serialize_points(points: &[Point]) -> Vec<u8> {
    let mut out = String::new();
    for point in points {
        if let Ok(line) = serde_json::to_string(point) {
            out.push_str(&line);
            out.push('\n');
        }
    }
    out.into_bytes()
}

/// A single tolerant line parse: `lat`/`latitude`, `lon`/`longitude`, and
/// either `ts` (ISO) or `timestamp` (numeric) are accepted.
fn point_from_line(line: &str, device_fallback: &str) -> Option<Point> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    let object = value.as_object()?;

    let lat = payload::coerce_f64(object.get("lat").or_else(|| object.get("latitude"))?)?;
    let lon = payload::coerce_f64(object.get("lon").or_else(|| object.get("longitude"))?)?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return None;
    }

    let ts = match object.get("ts").and_then(Value::as_str) {
        Some(iso) => model::parse_ts(iso)?,
        None => model::ts_from_ms(payload::timestamp_to_ms(object.get("timestamp")?)?)?,
    };

    let device_id = object
        .get("deviceId")
        .and_then(Value::as_str)
        .unwrap_or(device_fallback)
        .to_string();

    Some(Point {
        device_id,
        lat,
        lon,
        ts,
    })
}

/// Handle one raw object: normalize it, partition the points by UTC day, and
/// run a merge transaction per day. Each written day chains into the
/// segmentation stage and refreshes the debug sidecar.
pub async fn process_raw_object<S, I>(
    store: &S,
    invoker: Option<&I>,
    config: &PipelineConfig,
    key: &str,
) -> Result<MergeOutcome, StoreError>
where
    S: ObjectStore,
    I: StageInvoker,
{
    if !key.starts_with(keys::RAW_PREFIX) || !key.ends_with(".json") {
        return Ok(MergeOutcome::Skipped("key_not_raw"));
    }

    let Some(raw) = store.get(key).await? else {
        warn!(key, "raw object not found");
        return Ok(MergeOutcome::Skipped("raw_missing"));
    };

    let Ok(payload) = serde_json::from_slice::<LocationPayload>(&raw.body) else {
        warn!(key, "raw object is not a recognized payload shape");
        return Ok(MergeOutcome::Skipped("unrecognized_shape"));
    };

    let batch = payload.normalize(Utc::now());
    let points = batch.points();
    if points.is_empty() {
        warn!(key, "raw object produced no valid points");
        return Ok(MergeOutcome::Skipped("no_valid_points"));
    }

    let mut by_day: BTreeMap<String, Vec<Point>> = BTreeMap::new();
    for point in points {
        by_day.entry(point.utc_day()).or_default().push(point);
    }

    let mut merges = Vec::with_capacity(by_day.len());
    for (day, day_points) in by_day {
        let merge = merge_day(store, config, &batch.device_id, &day, day_points).await?;
        info!(
            key = merge.key,
            day = merge.day,
            appended = merge.appended,
            total = merge.total,
            "merged points"
        );

        let stub_key = keys::sibling(&merge.key, keys::DIARY_STUB_FILE);
        store
            .put(
                &stub_key,
                format!("{}\n", merge.appended).into_bytes(),
                TEXT_CONTENT_TYPE,
            )
            .await?;

        invoke_next_stage(
            invoker,
            config.stays_function.as_deref(),
            &config.raw_bucket,
            &merge.key,
        )
        .await;
        merges.push(merge);
    }

    Ok(MergeOutcome::Merged(merges))
}

async fn merge_day<S: ObjectStore>(
    store: &S,
    config: &PipelineConfig,
    device_id: &str,
    day: &str,
    incoming: Vec<Point>,
) -> Result<DayMerge, StoreError> {
    let key = keys::points_object(device_id, day);

    for attempt in 0..config.merge_retry.attempts {
        let existing = store.get(&key).await?;
        let (existing_points, etag) = match &existing {
            Some(object) => (
                parse_points_lenient(&object.body, device_id),
                object.etag.clone(),
            ),
            None => (Vec::new(), None),
        };

        let merged = merge_points(existing_points, incoming.clone());
        let body = serialize_points(&merged.points);
        let precondition = etag.map_or(WritePrecondition::IfAbsent, WritePrecondition::IfMatch);

        match store
            .put_conditional(&key, body, JSONL_CONTENT_TYPE, precondition)
            .await
        {
            Ok(()) => {
                return Ok(DayMerge {
                    day: day.to_string(),
                    key,
                    appended: merged.appended,
                    total: merged.points.len(),
                })
            }
            Err(StoreError::PreconditionFailed { .. }) => {
                debug!(key, attempt, "merge write conflict, rerunning transaction");
                tokio::time::sleep(config.merge_retry.delay(attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }

    Err(StoreError::Service {
        key,
        message: "merge conflict retries exhausted".to_string(),
    })
}
