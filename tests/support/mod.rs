//! In-memory fakes for the pipeline's capability boundaries.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use geodiary::config::{PipelineConfig, SegmentThresholds};
use geodiary::invoke::{InvokeError, StageInvoker};
use geodiary::location::{
    Geocoder, GeocodeError, Place, PositionUpdate, RouteCalculator, RouteError, RoutePolyline,
    Tracker, TrackerError,
};
use geodiary::model::PlaceInfo;
use geodiary::retry::RetryPolicy;
use geodiary::store::{
    ObjectMeta, ObjectStore, StoreError, StoredObject, WritePrecondition,
};

/// Stage configuration with zero backoff so retry paths run instantly.
pub fn test_config(bucket: &str) -> PipelineConfig {
    PipelineConfig {
        raw_bucket: bucket.to_string(),
        place_index: Some("test-place-index".to_string()),
        route_calculator: None,
        tracker_name: None,
        max_results: 1,
        stay: SegmentThresholds::STAY_DEFAULT,
        visit: SegmentThresholds::VISIT_DEFAULT,
        stays_function: Some("stays".to_string()),
        enrich_function: Some("enrich".to_string()),
        read_retry: RetryPolicy::new(3, Duration::ZERO),
        geocode_retry: RetryPolicy::new(3, Duration::ZERO),
        merge_retry: RetryPolicy::new(5, Duration::ZERO),
    }
}

/// Single-bucket in-memory store with versioned objects, so conditional
/// writes behave like the real thing.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, u64)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).map(|(body, _)| body.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, (Vec<u8>, u64)>> {
        self.objects.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<StoredObject>, StoreError> {
        Ok(self.lock().get(key).map(|(body, version)| StoredObject {
            body: body.clone(),
            etag: Some(version.to_string()),
        }))
    }

    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<(), StoreError> {
        let mut objects = self.lock();
        let version = objects.get(key).map_or(1, |(_, v)| v + 1);
        objects.insert(key.to_string(), (body, version));
        Ok(())
    }

    async fn put_conditional(
        &self,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
        precondition: WritePrecondition,
    ) -> Result<(), StoreError> {
        let mut objects = self.lock();
        let current = objects.get(key).map(|(_, v)| *v);
        let allowed = match &precondition {
            WritePrecondition::IfAbsent => current.is_none(),
            WritePrecondition::IfMatch(etag) => {
                current.is_some_and(|version| version.to_string() == *etag)
            }
        };
        if !allowed {
            return Err(StoreError::PreconditionFailed {
                key: key.to_string(),
            });
        }
        let version = current.map_or(1, |v| v + 1);
        objects.insert(key.to_string(), (body, version));
        Ok(())
    }

    async fn head(&self, key: &str) -> Result<Option<ObjectMeta>, StoreError> {
        Ok(self.lock().get(key).map(|(body, version)| ObjectMeta {
            size: body.len() as i64,
            etag: Some(version.to_string()),
        }))
    }

    async fn list(&self, prefix: &str, max_keys: i32) -> Result<Vec<String>, StoreError> {
        Ok(self
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .take(max_keys.max(0) as usize)
            .cloned()
            .collect())
    }
}

/// Geocoder that fails a configured number of times, then answers with a
/// fixed label.
#[derive(Debug)]
pub struct FakeGeocoder {
    label: Option<String>,
    failures_left: Mutex<u32>,
    pub calls: Mutex<u32>,
}

impl FakeGeocoder {
    pub fn with_label(label: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            failures_left: Mutex::new(0),
            calls: Mutex::new(0),
        }
    }

    pub fn failing_times(mut self, failures: u32) -> Self {
        self.failures_left = Mutex::new(failures);
        self
    }

    /// Always resolves to "no result here".
    pub fn empty() -> Self {
        Self {
            label: None,
            failures_left: Mutex::new(0),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Geocoder for FakeGeocoder {
    async fn reverse_geocode(&self, _lat: f64, _lon: f64) -> Result<Option<Place>, GeocodeError> {
        *self.calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner) += 1;

        let mut failures = self
            .failures_left
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *failures > 0 {
            *failures -= 1;
            return Err(GeocodeError("throttled".to_string()));
        }

        Ok(self.label.as_ref().map(|label| Place {
            label: Some(label.clone()),
            info: PlaceInfo {
                country: Some("JPN".to_string()),
                municipality: Some("Chiyoda".to_string()),
                ..PlaceInfo::default()
            },
        }))
    }
}

#[derive(Debug, Clone)]
pub enum RouterBehavior {
    Fail,
    NoGeometry,
    Line {
        line: Vec<Vec<f64>>,
        distance_km: Option<f64>,
    },
}

#[derive(Debug)]
pub struct FakeRouter {
    pub behavior: RouterBehavior,
}

impl RouteCalculator for FakeRouter {
    async fn calculate_route(
        &self,
        _from_lon: f64,
        _from_lat: f64,
        _to_lon: f64,
        _to_lat: f64,
    ) -> Result<RoutePolyline, RouteError> {
        match &self.behavior {
            RouterBehavior::Fail => Err(RouteError("route service down".to_string())),
            RouterBehavior::NoGeometry => Ok(RoutePolyline::default()),
            RouterBehavior::Line { line, distance_km } => Ok(RoutePolyline {
                distance_km: *distance_km,
                line: line.clone(),
            }),
        }
    }
}

/// Tracker that records every batch it receives.
#[derive(Debug, Default)]
pub struct RecordingTracker {
    pub batches: Mutex<Vec<Vec<PositionUpdate>>>,
}

impl RecordingTracker {
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(Vec::len)
            .collect()
    }
}

impl Tracker for RecordingTracker {
    async fn batch_update(&self, updates: &[PositionUpdate]) -> Result<(), TrackerError> {
        self.batches
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(updates.to_vec());
        Ok(())
    }
}

/// Invoker that records (function, key) instead of calling anything.
#[derive(Debug, Default)]
pub struct RecordingInvoker {
    pub invocations: Mutex<Vec<(String, String)>>,
}

impl RecordingInvoker {
    pub fn invoked_keys(&self, function_name: &str) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|(function, _)| function == function_name)
            .map(|(_, key)| key.clone())
            .collect()
    }
}

impl StageInvoker for RecordingInvoker {
    async fn invoke_object_created(
        &self,
        function_name: &str,
        _bucket: &str,
        key: &str,
    ) -> Result<(), InvokeError> {
        self.invocations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((function_name.to_string(), key.to_string()));
        Ok(())
    }
}
