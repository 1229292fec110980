//! Great-circle distance
//!
//! Surface distances between coordinates use the haversine formula on a
//! spherical Earth.

use crate::types::Coordinate;

/// Mean Earth radius in meters (IUGG)
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Haversine distance between two coordinates in meters
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    if a == b {
        return 0.0;
    }

    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h slightly past 1 for antipodal points
    let h = h.clamp(0.0, 1.0);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}
