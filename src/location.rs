//! Remote location capabilities: reverse geocoding, route calculation, and
//! the live-tracker echo. All three are backed by Amazon Location Service in
//! production and by fakes in tests.

use aws_sdk_location::error::DisplayErrorContext;
use aws_sdk_location::primitives::DateTime as LocationDateTime;
use aws_sdk_location::types::DevicePositionUpdate;
use thiserror::Error;
use tracing::warn;

use crate::model::PlaceInfo;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
#[error("reverse geocode failed: {0}")]
pub struct GeocodeError(pub String);

#[derive(Debug, Error)]
#[error("route calculation failed: {0}")]
pub struct RouteError(pub String);

#[derive(Debug, Error)]
#[error("tracker update failed: {0}")]
pub struct TrackerError(pub String);

/// A reverse-geocode hit: the display label plus the recognized attributes.
#[derive(Debug, Clone, Default)]
pub struct Place {
    pub label: Option<String>,
    pub info: PlaceInfo,
}

pub trait Geocoder {
    /// Resolve the nearest place; `Ok(None)` when the index has no result.
    async fn reverse_geocode(&self, lat: f64, lon: f64) -> Result<Option<Place>, GeocodeError>;
}

/// The first-leg polyline of a calculated route. An empty `line` means the
/// calculator returned no usable geometry.
#[derive(Debug, Clone, Default)]
pub struct RoutePolyline {
    pub distance_km: Option<f64>,
    /// `[lon, lat]` pairs.
    pub line: Vec<Vec<f64>>,
}

pub trait RouteCalculator {
    async fn calculate_route(
        &self,
        from_lon: f64,
        from_lat: f64,
        to_lon: f64,
        to_lat: f64,
    ) -> Result<RoutePolyline, RouteError>;
}

/// One position mirrored to the live tracker.
#[derive(Debug, Clone)]
pub struct PositionUpdate {
    pub device_id: String,
    pub lon: f64,
    pub lat: f64,
    pub ts_ms: i64,
}

pub trait Tracker {
    async fn batch_update(&self, updates: &[PositionUpdate]) -> Result<(), TrackerError>;
}

/// Reverse geocoder over an Amazon Location place index.
#[derive(Debug, Clone)]
pub struct PlaceIndexGeocoder {
    client: aws_sdk_location::Client,
    index_name: String,
    max_results: i32,
}

impl PlaceIndexGeocoder {
    #[must_use]
    pub fn new(client: aws_sdk_location::Client, index_name: String, max_results: i32) -> Self {
        Self {
            client,
            index_name,
            max_results,
        }
    }
}

impl Geocoder for PlaceIndexGeocoder {
    async fn reverse_geocode(&self, lat: f64, lon: f64) -> Result<Option<Place>, GeocodeError> {
        let response = self
            .client
            .search_place_index_for_position()
            .index_name(&self.index_name)
            .position(lon)
            .position(lat)
            .max_results(self.max_results)
            .language("ja")
            .send()
            .await
            .map_err(|err| GeocodeError(DisplayErrorContext(&err).to_string()))?;

        let Some(place) = response.results().first().and_then(|r| r.place()) else {
            return Ok(None);
        };

        Ok(Some(Place {
            label: place.label().map(ToString::to_string),
            info: PlaceInfo {
                country: non_empty(place.country()),
                region: non_empty(place.region()),
                subregion: non_empty(place.sub_region()),
                municipality: non_empty(place.municipality()),
                neighborhood: non_empty(place.neighborhood()),
                postal_code: non_empty(place.postal_code()),
                street: non_empty(place.street()),
                // The place index response carries no separate name field.
                name: None,
            },
        }))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Geocode with the stage retry budget; errors burn an attempt, an empty
/// result does not. Exhaustion resolves to `None` (segment keeps a null
/// label).
pub async fn reverse_geocode_with_retry<G: Geocoder>(
    geocoder: &G,
    lat: f64,
    lon: f64,
    policy: RetryPolicy,
) -> Option<Place> {
    for attempt in 0..policy.attempts {
        match geocoder.reverse_geocode(lat, lon).await {
            Ok(place) => return place,
            Err(err) => {
                warn!(attempt, error = %err, "reverse geocode attempt failed");
                if attempt + 1 < policy.attempts {
                    tokio::time::sleep(policy.delay(attempt)).await;
                }
            }
        }
    }
    None
}

/// Road-network routing over an Amazon Location route calculator.
#[derive(Debug, Clone)]
pub struct LocationRouteCalculator {
    client: aws_sdk_location::Client,
    calculator_name: String,
}

impl LocationRouteCalculator {
    #[must_use]
    pub fn new(client: aws_sdk_location::Client, calculator_name: String) -> Self {
        Self {
            client,
            calculator_name,
        }
    }
}

impl RouteCalculator for LocationRouteCalculator {
    async fn calculate_route(
        &self,
        from_lon: f64,
        from_lat: f64,
        to_lon: f64,
        to_lat: f64,
    ) -> Result<RoutePolyline, RouteError> {
        let response = self
            .client
            .calculate_route()
            .calculator_name(&self.calculator_name)
            .departure_position(from_lon)
            .departure_position(from_lat)
            .destination_position(to_lon)
            .destination_position(to_lat)
            .include_leg_geometry(true)
            .send()
            .await
            .map_err(|err| RouteError(DisplayErrorContext(&err).to_string()))?;

        let distance_km = response.summary().map(|summary| summary.distance());
        let line = response
            .legs()
            .first()
            .and_then(|leg| leg.geometry())
            .map(|geometry| {
                geometry
                    .line_string()
                    .iter()
                    .filter(|point| point.len() >= 2)
                    .map(|point| vec![point[0], point[1]])
                    .collect()
            })
            .unwrap_or_default();

        Ok(RoutePolyline { distance_km, line })
    }
}

/// Live-position echo into an Amazon Location tracker.
#[derive(Debug, Clone)]
pub struct LocationTracker {
    client: aws_sdk_location::Client,
    tracker_name: String,
}

impl LocationTracker {
    #[must_use]
    pub fn new(client: aws_sdk_location::Client, tracker_name: String) -> Self {
        Self {
            client,
            tracker_name,
        }
    }
}

impl Tracker for LocationTracker {
    async fn batch_update(&self, updates: &[PositionUpdate]) -> Result<(), TrackerError> {
        let mut request = self
            .client
            .batch_update_device_position()
            .tracker_name(&self.tracker_name);

        for update in updates {
            let entry = DevicePositionUpdate::builder()
                .device_id(&update.device_id)
                .position(update.lon)
                .position(update.lat)
                .sample_time(LocationDateTime::from_millis(update.ts_ms))
                .build()
                .map_err(|err| TrackerError(err.to_string()))?;
            request = request.updates(entry);
        }

        request
            .send()
            .await
            .map_err(|err| TrackerError(DisplayErrorContext(&err).to_string()))?;
        Ok(())
    }
}
