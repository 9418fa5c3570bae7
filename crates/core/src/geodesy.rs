//! Great-circle geometry on a spherical Earth.

use api_types::GeoPosition;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Flat approximation of one degree of arc, used to turn a step radius in
/// kilometers into degrees.
pub const KM_PER_DEGREE: f64 = 111.0;

/// Haversine distance between two positions in kilometers.
pub fn haversine_km(from: GeoPosition, to: GeoPosition) -> f64 {
    let lat1 = from.latitude.to_radians();
    let lat2 = to.latitude.to_radians();
    let delta_lat = (to.latitude - from.latitude).to_radians();
    let delta_lon = (to.longitude - from.longitude).to_radians();

    let a = (delta_lat / 2.0).sin() * (delta_lat / 2.0).sin()
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin() * (delta_lon / 2.0).sin();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

pub fn km_to_degrees(km: f64) -> f64 {
    km / KM_PER_DEGREE
}
