//! Trips: pair consecutive enriched stays into journeys with road-network
//! geometry, falling back to the straight two-point line when routing is
//! unavailable.

use geojson::{Feature, FeatureCollection, Geometry, JsonObject};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::geo;
use crate::keys;
use crate::location::{RouteCalculator, RoutePolyline};
use crate::model::{Trip, TripEndpoint};
use crate::stages::JSON_CONTENT_TYPE;
use crate::store::{ObjectStore, StoreError};

#[derive(Debug)]
pub enum TripsOutcome {
    Skipped(&'static str),
    Written {
        trips_key: String,
        geojson_key: String,
        trips: usize,
        skipped_missing_center: usize,
    },
}

/// Handle one `stays_enriched.json`: build the trip records and the
/// display-ready feature collection next to it. Empty or non-list input
/// still writes both outputs, as empty collections.
pub async fn process_stays_object<S, R>(
    store: &S,
    router: Option<&R>,
    key: &str,
) -> Result<TripsOutcome, StoreError>
where
    S: ObjectStore,
    R: RouteCalculator,
{
    if !key.starts_with(keys::PROCESSED_PREFIX) || !key.ends_with(keys::STAYS_ENRICHED_FILE) {
        return Ok(TripsOutcome::Skipped("key_not_target"));
    }

    match store.head(key).await {
        Ok(Some(meta)) => info!(key, size = meta.size, etag = ?meta.etag, "reading enriched stays"),
        Ok(None) | Err(_) => warn!(key, "head check failed before read"),
    }

    let Some(object) = store.get(key).await? else {
        warn!(key, "enriched stays object not found");
        return Ok(TripsOutcome::Skipped("input_missing"));
    };
    let Ok(value) = serde_json::from_slice::<Value>(&object.body) else {
        warn!(key, "enriched stays object is not valid JSON");
        return Ok(TripsOutcome::Skipped("invalid_json"));
    };

    let trips_key = keys::sibling(key, keys::TRIPS_FILE);
    let geojson_key = keys::sibling(key, keys::GEOJSON_FILE);

    let stays = match value.as_array() {
        Some(stays) if !stays.is_empty() => stays.clone(),
        _ => {
            warn!(key, "enriched stays empty or not a list, writing empty outputs");
            write_outputs(store, &trips_key, &geojson_key, &[], Vec::new()).await?;
            return Ok(TripsOutcome::Written {
                trips_key,
                geojson_key,
                trips: 0,
                skipped_missing_center: 0,
            });
        }
    };

    let built = build_trips(&stays, router).await;
    info!(
        key,
        trips = built.trips.len(),
        skipped_missing_center = built.skipped_missing_center,
        "built trips"
    );

    write_outputs(store, &trips_key, &geojson_key, &built.trips, built.features).await?;

    Ok(TripsOutcome::Written {
        trips_key,
        geojson_key,
        trips: built.trips.len(),
        skipped_missing_center: built.skipped_missing_center,
    })
}

#[derive(Debug)]
pub struct BuiltTrips {
    pub trips: Vec<Trip>,
    pub features: Vec<Feature>,
    pub skipped_missing_center: usize,
}

/// Sort the stays into time order and pair each with its successor. Pairs
/// with unusable centers are counted and skipped; everything else yields a
/// trip plus its polyline feature.
pub async fn build_trips<R: RouteCalculator>(stays: &[Value], router: Option<&R>) -> BuiltTrips {
    let mut sorted: Vec<&Value> = stays.iter().collect();
    sorted.sort_by_key(|stay| time_sort_key(stay));

    let mut trips = Vec::new();
    let mut features = Vec::new();
    let mut skipped_missing_center = 0;

    for pair in sorted.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let (Some((from_lat, from_lon)), Some((to_lat, to_lon))) = (center_of(a), center_of(b))
        else {
            skipped_missing_center += 1;
            continue;
        };

        let routed = route_or_fallback(router, from_lon, from_lat, to_lon, to_lat).await;

        let trip = Trip {
            from: TripEndpoint {
                time: endpoint_time(a, "end", "start"),
                lat: from_lat,
                lon: from_lon,
                label: label_of(a),
            },
            to: TripEndpoint {
                time: endpoint_time(b, "start", "end"),
                lat: to_lat,
                lon: to_lon,
                label: label_of(b),
            },
            distance_km: routed.distance_km.map(|km| geo::round_coordinate(km, 3)),
            fallback: routed.fallback,
        };
        debug!(
            from_time = ?trip.from.time,
            to_time = ?trip.to.time,
            distance_km = ?trip.distance_km,
            fallback = trip.fallback,
            points = routed.line.len(),
            "trip created"
        );

        features.push(feature_for(&trip, routed.line));
        trips.push(trip);
    }

    BuiltTrips {
        trips,
        features,
        skipped_missing_center,
    }
}

#[derive(Debug)]
struct RoutedLeg {
    line: Vec<Vec<f64>>,
    distance_km: Option<f64>,
    fallback: bool,
}

async fn route_or_fallback<R: RouteCalculator>(
    router: Option<&R>,
    from_lon: f64,
    from_lat: f64,
    to_lon: f64,
    to_lat: f64,
) -> RoutedLeg {
    let straight = vec![vec![from_lon, from_lat], vec![to_lon, to_lat]];
    let haversine = || geo::haversine_km(from_lat, from_lon, to_lat, to_lon);

    let Some(router) = router else {
        debug!("route calculator unconfigured, using straight line");
        return RoutedLeg {
            line: straight,
            distance_km: Some(haversine()),
            fallback: true,
        };
    };

    match router.calculate_route(from_lon, from_lat, to_lon, to_lat).await {
        Ok(RoutePolyline { distance_km, line }) if !line.is_empty() => RoutedLeg {
            line,
            distance_km: Some(distance_km.unwrap_or_else(haversine)),
            fallback: false,
        },
        Ok(RoutePolyline { distance_km, .. }) => {
            warn!("route response had no usable geometry");
            RoutedLeg {
                line: straight,
                distance_km: Some(distance_km.unwrap_or_else(haversine)),
                fallback: true,
            }
        }
        Err(err) => {
            warn!(error = %err, "route calculation failed, using straight line");
            RoutedLeg {
                line: straight,
                distance_km: Some(haversine()),
                fallback: true,
            }
        }
    }
}

/// Stays sort by `end`, falling back to `start`; empty strings count as
/// absent.
fn time_sort_key(stay: &Value) -> String {
    field_str(stay, "end")
        .or_else(|| field_str(stay, "start"))
        .unwrap_or_default()
}

fn endpoint_time(stay: &Value, primary: &str, secondary: &str) -> Option<String> {
    field_str(stay, primary).or_else(|| field_str(stay, secondary))
}

fn field_str(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn center_of(stay: &Value) -> Option<(f64, f64)> {
    let center = stay.get("center")?;
    let lat = center.get("lat").and_then(Value::as_f64)?;
    let lon = center.get("lon").and_then(Value::as_f64)?;
    Some((lat, lon))
}

fn label_of(stay: &Value) -> Option<String> {
    stay.get("label")
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn feature_for(trip: &Trip, line: Vec<Vec<f64>>) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("type".to_string(), json!("trip"));
    properties.insert("from_time".to_string(), json!(trip.from.time));
    properties.insert("to_time".to_string(), json!(trip.to.time));
    properties.insert("from_label".to_string(), json!(trip.from.label));
    properties.insert("to_label".to_string(), json!(trip.to.label));
    properties.insert("distance_km".to_string(), json!(trip.distance_km));
    properties.insert("fallback".to_string(), json!(trip.fallback));

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(geojson::Value::LineString(line))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

async fn write_outputs<S: ObjectStore>(
    store: &S,
    trips_key: &str,
    geojson_key: &str,
    trips: &[Trip],
    features: Vec<Feature>,
) -> Result<(), StoreError> {
    let trips_body = serde_json::to_vec(trips).map_err(|err| StoreError::Service {
        key: trips_key.to_string(),
        message: err.to_string(),
    })?;
    store.put(trips_key, trips_body, JSON_CONTENT_TYPE).await?;

    let collection = FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    };
    let geojson_body = serde_json::to_vec(&collection).map_err(|err| StoreError::Service {
        key: geojson_key.to_string(),
        message: err.to_string(),
    })?;
    store.put(geojson_key, geojson_body, JSON_CONTENT_TYPE).await
}
