//! Great-circle geometry for arrival checks.

use skyloop_types::Position;

/// Mean Earth radius used by [`haversine_m`].
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Horizontal tolerance for "arrived at target".
pub const ARRIVAL_HORIZONTAL_M: f64 = 2.0;

/// Vertical tolerance for "arrived at target".
pub const ARRIVAL_VERTICAL_M: f64 = 1.0;

/// Great-circle distance in metres between two latitude/longitude pairs
/// given in degrees.
///
/// ```
/// use skyloop_kernel::haversine_m;
///
/// assert_eq!(haversine_m(23.0225, 72.5714, 23.0225, 72.5714), 0.0);
/// ```
pub fn haversine_m(lat1_deg: f64, lon1_deg: f64, lat2_deg: f64, lon2_deg: f64) -> f64 {
    let lat1 = lat1_deg.to_radians();
    let lat2 = lat2_deg.to_radians();
    let d_lat = (lat2_deg - lat1_deg).to_radians();
    let d_lon = (lon2_deg - lon1_deg).to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    // Clamp guards against a > 1 from rounding on antipodal points.
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// `true` when `current` is within 2 m horizontally and 1 m vertically of
/// the target.
pub fn arrived(current: &Position, latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> bool {
    let horizontal = haversine_m(
        current.latitude_deg,
        current.longitude_deg,
        latitude_deg,
        longitude_deg,
    );
    let vertical = (current.relative_altitude_m - altitude_m).abs();
    horizontal < ARRIVAL_HORIZONTAL_M && vertical < ARRIVAL_VERTICAL_M
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One degree of latitude is ~111.195 km on a 6371 km sphere.
    const METRES_PER_DEG_LAT: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

    #[test]
    fn zero_distance_for_identical_points() {
        assert_eq!(haversine_m(23.0225, 72.5714, 23.0225, 72.5714), 0.0);
    }

    #[test]
    fn one_degree_of_latitude() {
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - METRES_PER_DEG_LAT).abs() < 1e-6, "got {d}");
    }

    #[test]
    fn longitude_shrinks_with_latitude() {
        let at_equator = haversine_m(0.0, 0.0, 0.0, 1.0);
        let at_60 = haversine_m(60.0, 0.0, 60.0, 1.0);
        assert!((at_60 / at_equator - 0.5).abs() < 1e-3);
    }

    #[test]
    fn symmetric() {
        let a = haversine_m(47.397742, 8.545594, 47.398, 8.546);
        let b = haversine_m(47.398, 8.546, 47.397742, 8.545594);
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn antipodal_points_are_half_circumference() {
        let d = haversine_m(0.0, 0.0, 0.0, 180.0);
        assert!((d - EARTH_RADIUS_M * std::f64::consts::PI).abs() < 1e-3);
    }

    #[test]
    fn arrived_at_zero_offset() {
        let here = Position {
            latitude_deg: 23.0225,
            longitude_deg: 72.5714,
            relative_altitude_m: 30.0,
        };
        assert!(arrived(&here, 23.0225, 72.5714, 30.0));
    }

    #[test]
    fn not_arrived_at_100m_offset() {
        let here = Position {
            latitude_deg: 23.0225,
            longitude_deg: 72.5714,
            relative_altitude_m: 30.0,
        };
        let target_lat = 23.0225 + 100.0 / METRES_PER_DEG_LAT;
        assert!((haversine_m(23.0225, 72.5714, target_lat, 72.5714) - 100.0).abs() < 1e-6);
        assert!(!arrived(&here, target_lat, 72.5714, 30.0));
    }

    #[test]
    fn not_arrived_with_altitude_error() {
        let here = Position {
            latitude_deg: 10.0,
            longitude_deg: 10.0,
            relative_altitude_m: 28.5,
        };
        assert!(!arrived(&here, 10.0, 10.0, 30.0));
        assert!(arrived(&here, 10.0, 10.0, 29.0));
    }
}
