//! Great-circle geometry on WGS84 degrees.

/// Mean Earth radius (IUGG), km.
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Longest possible great-circle distance, km.
pub const MAX_ARC_KM: f64 = std::f64::consts::PI * EARTH_RADIUS_KM;

pub fn haversine_km(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.clamp(0.0, 1.0).sqrt().asin()
}

/// Earth-centred Cartesian position on a sphere of radius
/// [`EARTH_RADIUS_KM`], in km.
pub fn to_ecef_km(lon: f64, lat: f64) -> [f64; 3] {
    let (sin_lat, cos_lat) = lat.to_radians().sin_cos();
    let (sin_lon, cos_lon) = lon.to_radians().sin_cos();
    [
        EARTH_RADIUS_KM * cos_lat * cos_lon,
        EARTH_RADIUS_KM * cos_lat * sin_lon,
        EARTH_RADIUS_KM * sin_lat,
    ]
}

/// Straight-line chord length matching a great-circle arc. Chord length is
/// strictly increasing in arc length on [0, MAX_ARC_KM].
pub fn chord_for_arc_km(arc_km: f64) -> f64 {
    let half_angle = (arc_km.max(0.0) / (2.0 * EARTH_RADIUS_KM)).min(std::f64::consts::FRAC_PI_2);
    2.0 * EARTH_RADIUS_KM * half_angle.sin()
}

pub fn is_valid_coordinate(lon: f64, lat: f64) -> bool {
    lon.is_finite()
        && lat.is_finite()
        && (-180.0..=180.0).contains(&lon)
        && (-90.0..=90.0).contains(&lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn squared_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
        (0..3).map(|i| (a[i] - b[i]).powi(2)).sum()
    }

    #[test]
    fn test_haversine_identical_points_is_zero() {
        assert_eq!(haversine_km(-76.4, 38.9, -76.4, 38.9), 0.0);
    }

    #[test]
    fn test_haversine_known_distance() {
        // The Battery, NY to Boston, MA: roughly 307 km.
        let d = haversine_km(-74.0142, 40.7006, -71.0503, 42.3539);
        assert!((d - 307.0).abs() < 5.0, "got {}", d);
    }

    #[test]
    fn test_haversine_crosses_antimeridian() {
        let d = haversine_km(179.5, 0.0, -179.5, 0.0);
        assert!((d - 111.2).abs() < 0.5, "got {}", d);
    }

    #[test]
    fn test_chord_matches_ecef_distance() {
        let a = to_ecef_km(-157.86, 21.30);
        let b = to_ecef_km(-122.42, 37.77);
        let arc = haversine_km(-157.86, 21.30, -122.42, 37.77);
        let chord = squared_distance(a, b).sqrt();
        assert!((chord - chord_for_arc_km(arc)).abs() < 1e-6);
    }

    #[test]
    fn test_chord_saturates_at_antipode() {
        assert!((chord_for_arc_km(MAX_ARC_KM * 2.0) - 2.0 * EARTH_RADIUS_KM).abs() < 1e-9);
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(is_valid_coordinate(-180.0, 90.0));
        assert!(!is_valid_coordinate(-181.0, 0.0));
        assert!(!is_valid_coordinate(0.0, f64::NAN));
    }
}
