//! Great-circle geometry and flat-earth helpers.
//!
//! Everything the plan executor and flight model need: haversine distance,
//! initial bearing, signed cross-track error, destination points, and the
//! degree⇄meter conversions used by the integrator.

use crate::telemetry::Position;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per degree of latitude (flat-earth approximation).
pub const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// Wrap an angle into [0, 360).
pub fn wrap_deg_360(deg: f64) -> f64 {
    let w = deg % 360.0;
    if w < 0.0 { w + 360.0 } else { w }
}

/// Wrap an angle into (-180, 180].
pub fn wrap_deg_180(deg: f64) -> f64 {
    let w = wrap_deg_360(deg);
    if w > 180.0 { w - 360.0 } else { w }
}

/// Haversine great-circle distance in meters (horizontal only).
pub fn distance_m(a: &Position, b: &Position) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` to `b`, degrees in [0, 360).
pub fn bearing_deg(a: &Position, b: &Position) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    wrap_deg_360(y.atan2(x).to_degrees())
}

/// Signed cross-track error of `point` relative to the leg `from → to`,
/// meters. Positive means right of track when facing along the leg.
pub fn cross_track_m(from: &Position, to: &Position, point: &Position) -> f64 {
    let d13 = distance_m(from, point) / EARTH_RADIUS_M;
    let b13 = bearing_deg(from, point).to_radians();
    let b12 = bearing_deg(from, to).to_radians();
    (d13.sin() * (b13 - b12).sin()).asin() * EARTH_RADIUS_M
}

/// Destination point from `start` along `bearing_deg` for `distance_m`.
/// Altitude is carried through unchanged.
pub fn destination(start: &Position, bearing: f64, distance: f64) -> Position {
    let lat1 = start.latitude.to_radians();
    let lon1 = start.longitude.to_radians();
    let brg = bearing.to_radians();
    let ad = distance / EARTH_RADIUS_M;

    let lat2 = (lat1.sin() * ad.cos() + lat1.cos() * ad.sin() * brg.cos()).asin();
    let lon2 = lon1
        + (brg.sin() * ad.sin() * lat1.cos()).atan2(ad.cos() - lat1.sin() * lat2.sin());

    Position {
        latitude: lat2.to_degrees(),
        longitude: wrap_deg_180(lon2.to_degrees()),
        altitude: start.altitude,
    }
}

/// Flat-earth offset: meters north/east → degrees of latitude/longitude at
/// the given latitude. This is the integrator's coordinate update.
pub fn offset_deg(lat_deg: f64, north_m: f64, east_m: f64) -> (f64, f64) {
    let dlat = north_m / METERS_PER_DEG_LAT;
    let dlon = east_m / (METERS_PER_DEG_LAT * lat_deg.to_radians().cos().max(1e-9));
    (dlat, dlon)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(lat: f64, lon: f64) -> Position {
        Position { latitude: lat, longitude: lon, altitude: 0.0 }
    }

    #[test]
    fn distance_one_degree_latitude() {
        let d = distance_m(&pos(0.0, 0.0), &pos(1.0, 0.0));
        // One degree of latitude ≈ 111.2 km
        assert!((d - 111_195.0).abs() < 200.0, "got {d}");
    }

    #[test]
    fn bearing_cardinals() {
        let origin = pos(0.0, 0.0);
        assert!((bearing_deg(&origin, &pos(1.0, 0.0)) - 0.0).abs() < 1e-6);
        assert!((bearing_deg(&origin, &pos(0.0, 1.0)) - 90.0).abs() < 1e-6);
        assert!((bearing_deg(&origin, &pos(-1.0, 0.0)) - 180.0).abs() < 1e-6);
        assert!((bearing_deg(&origin, &pos(0.0, -1.0)) - 270.0).abs() < 1e-6);
    }

    #[test]
    fn cross_track_sign_and_magnitude() {
        // Leg runs due north along the meridian; a point east of it is right
        // of track (positive).
        let from = pos(0.0, 0.0);
        let to = pos(1.0, 0.0);
        let east = pos(0.5, 0.01);
        let west = pos(0.5, -0.01);
        let xt_e = cross_track_m(&from, &to, &east);
        let xt_w = cross_track_m(&from, &to, &west);
        assert!(xt_e > 0.0 && xt_w < 0.0);
        // 0.01° of longitude at the equator ≈ 1113 m
        assert!((xt_e - 1113.0).abs() < 20.0, "got {xt_e}");
    }

    #[test]
    fn destination_round_trip() {
        let start = pos(52.0, 4.0);
        let there = destination(&start, 37.0, 5_000.0);
        let back = distance_m(&start, &there);
        assert!((back - 5_000.0).abs() < 1.0);
        assert!((bearing_deg(&start, &there) - 37.0).abs() < 0.1);
    }

    #[test]
    fn wrap_helpers() {
        assert_eq!(wrap_deg_360(-10.0), 350.0);
        assert_eq!(wrap_deg_360(360.0), 0.0);
        assert_eq!(wrap_deg_180(270.0), -90.0);
    }

    #[test]
    fn offset_deg_scales_longitude_by_latitude() {
        let (dlat, dlon_eq) = offset_deg(0.0, 1113.2, 1113.2);
        let (_, dlon_60) = offset_deg(60.0, 1113.2, 1113.2);
        assert!((dlat - 0.01).abs() < 1e-4);
        // At 60°N a degree of longitude is half as long
        assert!((dlon_60 / dlon_eq - 2.0).abs() < 0.01);
    }
}
