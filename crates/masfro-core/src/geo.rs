//! Geodesy helpers shared across the workspace.
//!
//! Everything here works on WGS84 degrees and returns meters. Distances use
//! the Haversine formula, which is accurate to well under a meter over the
//! few-kilometer spans a city road network covers.

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters between two WGS84 points.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().asin()
}

/// Meters spanned by one degree of latitude (latitude-independent to first order).
pub fn meters_per_degree_lat() -> f64 {
    EARTH_RADIUS_M * std::f64::consts::PI / 180.0
}

/// Meters spanned by one degree of longitude at the given latitude.
///
/// Used to size spatial-index cells and convert raster cell sizes to meters.
pub fn meters_per_degree_lon(lat: f64) -> f64 {
    meters_per_degree_lat() * lat.to_radians().cos()
}

/// Quick plausibility check for WGS84 coordinates.
pub fn valid_coordinates(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_distance() {
        assert_eq!(haversine_m(14.6507, 121.1029, 14.6507, 121.1029), 0.0);
    }

    #[test]
    fn test_haversine_known_distance() {
        // Sto Nino station to Nangka bridge, roughly 3.5 km apart
        let d = haversine_m(14.6330, 121.0960, 14.6640, 121.1090);
        assert!(d > 3000.0 && d < 4000.0, "got {}", d);
    }

    #[test]
    fn test_haversine_symmetry() {
        let d1 = haversine_m(14.6507, 121.1029, 14.6303, 121.1084);
        let d2 = haversine_m(14.6303, 121.1084, 14.6507, 121.1029);
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn test_meters_per_degree_tropics() {
        // Near the equator a degree of longitude is close to 111 km
        let m = meters_per_degree_lon(14.65);
        assert!(m > 105_000.0 && m < 112_000.0, "got {}", m);
    }

    #[test]
    fn test_valid_coordinates() {
        assert!(valid_coordinates(14.65, 121.10));
        assert!(!valid_coordinates(95.0, 121.10));
        assert!(!valid_coordinates(14.65, 200.0));
        assert!(!valid_coordinates(f64::NAN, 121.10));
    }
}
