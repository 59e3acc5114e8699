//! Geographic utilities: distance, path length, centroid and spread
//! calculations.
//!
//! Latitude/longitude from GPS recordings is always in the WGS84 datum.

use crate::GeoPoint;

/// WGS84 semi-major axis, in meters.
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// One degree of arc at the equator, in meters (~111.319 km).
pub const ONE_DEGREE: f64 = 2.0 * std::f64::consts::PI * EARTH_RADIUS / 360.0;

/// Great-circle (haversine) distance between two points, in meters.
///
/// Implemented from <http://www.movable-type.co.uk/scripts/latlong.html>.
pub fn haversine_distance(p1: &GeoPoint, p2: &GeoPoint) -> f64 {
    let d_lon = (p1.longitude - p2.longitude).to_radians();
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let d_lat = lat1 - lat2;

    let a = (d_lat / 2.0).sin().powi(2) + (d_lon / 2.0).sin().powi(2) * lat1.cos() * lat2.cos();
    let c = 2.0 * a.sqrt().asin();

    EARTH_RADIUS * c
}

/// Cumulative great-circle length of a track, in meters.
///
/// Returns 0.0 for tracks with fewer than two points.
pub fn path_length(points: &[GeoPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}

/// Arithmetic mean of latitudes and longitudes as `(lat, lon)`.
///
/// An acceptable centroid approximation at route scale; not geodesically
/// exact. Returns `(0.0, 0.0)` for an empty track.
pub fn compute_center(points: &[GeoPoint]) -> (f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0);
    }
    let n = points.len() as f64;
    let lat_sum: f64 = points.iter().map(|p| p.latitude).sum();
    let lon_sum: f64 = points.iter().map(|p| p.longitude).sum();
    (lat_sum / n, lon_sum / n)
}

/// Population standard deviation of latitudes and longitudes as
/// `(lat_stddev, lon_stddev)`.
pub fn compute_spread(points: &[GeoPoint]) -> (f64, f64) {
    if points.is_empty() {
        return (0.0, 0.0);
    }
    let n = points.len() as f64;
    let (lat_mean, lon_mean) = compute_center(points);
    let lat_var: f64 = points
        .iter()
        .map(|p| (p.latitude - lat_mean).powi(2))
        .sum::<f64>()
        / n;
    let lon_var: f64 = points
        .iter()
        .map(|p| (p.longitude - lon_mean).powi(2))
        .sum::<f64>()
        / n;
    (lat_var.sqrt(), lon_var.sqrt())
}

/// Convert a distance in meters to degree offsets `(d_lat, d_lng)` at the
/// given latitude.
///
/// The longitude offset grows toward the poles; the cosine is clamped so
/// the result stays finite. Used to pad spatial-index envelopes, so the
/// conversion errs on the generous side.
pub fn meters_to_degrees(meters: f64, latitude: f64) -> (f64, f64) {
    let d_lat = meters / ONE_DEGREE;
    let cos_lat = latitude.to_radians().cos().abs().max(0.01);
    let d_lng = meters / (ONE_DEGREE * cos_lat);
    (d_lat, d_lng)
}
