//! Great-circle distance helpers.
//!
//! Two Earth radii are deliberately in play: segmentation measures window
//! spread in metres on the 6 371 000 m sphere, while trip distances are
//! reported with the 6 371.0088 km mean radius. Collapsing them would shift
//! observable output numbers.

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const EARTH_RADIUS_KM: f64 = 6_371.008_8;

/// Distance in metres, as used by the stay/visit segmentation.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine(EARTH_RADIUS_M, lat1, lon1, lat2, lon2)
}

/// Distance in kilometres, as reported on trips.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine(EARTH_RADIUS_KM, lat1, lon1, lat2, lon2)
}

fn haversine(radius: f64, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    radius * c
}

pub fn round_coordinate(value: f64, precision: i32) -> f64 {
    let factor = 10_f64.powi(precision);
    (value * factor).round() / factor
}
