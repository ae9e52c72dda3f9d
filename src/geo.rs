// =============================================================================
// geo.rs — THE GREAT-CIRCLE CALCULATION DEPARTMENT
// =============================================================================
//
// Pure math. No state, no locks, no I/O, no opinions about bus routes.
// Give it coordinates, it gives you distances; give it distances, it gives
// you arrival estimates. The one module in this engine that will never
// page anyone at 3am.
//
// We use the Haversine formula on a spherical Earth (radius 6371.0 km).
// Yes, the Earth is an oblate spheroid. No, a city bus does not care about
// the 0.3% error that introduces. The bus introduces far larger errors all
// by itself.
// =============================================================================

/// Mean Earth radius in kilometers. Good enough for intercontinental
/// flights, definitely good enough for the number 42 crosstown.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Assumed average bus speed when the caller has nothing better.
/// 30 km/h: fast enough to be optimistic, slow enough to be honest about
/// city traffic.
pub const AVERAGE_SPEED_KMH: f64 = 30.0;

/// Great-circle distance between two coordinates via the Haversine formula.
/// Returns kilometers. Symmetric, deterministic, and identical-point-safe
/// (a bus standing at a stop is 0.0 km from it, as one would hope).
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    // Clamp before the square roots: floating-point drift can push `a` a
    // hair past 1.0 for antipodal points, and sqrt(negative) is NaN.
    let a = a.clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Minutes until arrival, given distance and speed, rounded up — no bus in
/// recorded history has ever arrived early.
///
/// A speed of zero or less falls back to [`AVERAGE_SPEED_KMH`] instead of
/// dividing the universe by zero. Drivers' devices report speed 0 at every
/// red light, and "ETA: infinity" is technically accurate but unhelpful.
pub fn eta_minutes(distance_km: f64, speed_kmh: f64) -> u32 {
    let speed = if speed_kmh > 0.0 {
        speed_kmh
    } else {
        AVERAGE_SPEED_KMH
    };
    let hours = distance_km / speed;
    (hours * 60.0).ceil() as u32
}

/// True iff `point` lies within `radius_km` of `center` (inclusive).
/// The "has the bus basically arrived" predicate.
pub fn within_radius(
    center_lat: f64,
    center_lon: f64,
    point_lat: f64,
    point_lon: f64,
    radius_km: f64,
) -> bool {
    distance_km(center_lat, center_lon, point_lat, point_lon) <= radius_km
}

/// Sanity-check a coordinate pair. Latitude lives in [-90, 90], longitude
/// in [-180, 180], and neither is allowed to be NaN no matter how badly
/// the GPS chip is having a day.
pub fn valid_coordinates(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_points_are_zero_distance() {
        assert_eq!(distance_km(40.7128, -74.0060, 40.7128, -74.0060), 0.0);
    }

    #[test]
    fn test_distance_is_symmetric() {
        let ab = distance_km(40.7128, -74.0060, 34.0522, -118.2437);
        let ba = distance_km(34.0522, -118.2437, 40.7128, -74.0060);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn test_known_distance_nyc_to_la() {
        // NYC to LA is roughly 3936 km great-circle. Allow a generous
        // tolerance for the spherical-Earth assumption.
        let d = distance_km(40.7128, -74.0060, 34.0522, -118.2437);
        assert!((d - 3936.0).abs() < 30.0, "got {}", d);
    }

    #[test]
    fn test_antipodal_points_do_not_blow_up() {
        // Half the Earth's circumference, within a few km.
        let d = distance_km(0.0, 0.0, 0.0, 180.0);
        assert!(d.is_finite());
        assert!((d - std::f64::consts::PI * EARTH_RADIUS_KM).abs() < 5.0);
    }

    #[test]
    fn test_eta_thirty_km_at_default_speed_is_one_hour() {
        assert_eq!(eta_minutes(30.0, AVERAGE_SPEED_KMH), 60);
    }

    #[test]
    fn test_eta_zero_distance_is_zero_minutes() {
        assert_eq!(eta_minutes(0.0, AVERAGE_SPEED_KMH), 0);
    }

    #[test]
    fn test_eta_rounds_up() {
        // 1 km at 30 km/h = 2 minutes flat; 1.1 km should round to 3.
        assert_eq!(eta_minutes(1.0, 30.0), 2);
        assert_eq!(eta_minutes(1.1, 30.0), 3);
    }

    #[test]
    fn test_eta_zero_or_negative_speed_falls_back_to_default() {
        assert_eq!(eta_minutes(30.0, 0.0), 60);
        assert_eq!(eta_minutes(30.0, -12.5), 60);
    }

    #[test]
    fn test_within_radius_matches_distance() {
        // A point ~1.11 km north of the center.
        let (clat, clon) = (40.0, -74.0);
        let (plat, plon) = (40.01, -74.0);
        let d = distance_km(clat, clon, plat, plon);
        assert!(within_radius(clat, clon, plat, plon, d + 0.001));
        assert!(!within_radius(clat, clon, plat, plon, d - 0.001));
        // Inclusive boundary.
        assert!(within_radius(clat, clon, plat, plon, d));
    }

    #[test]
    fn test_coordinate_validation() {
        assert!(valid_coordinates(40.7, -74.0));
        assert!(valid_coordinates(-90.0, 180.0));
        assert!(!valid_coordinates(90.1, 0.0));
        assert!(!valid_coordinates(0.0, -180.5));
        assert!(!valid_coordinates(f64::NAN, 0.0));
    }
}
