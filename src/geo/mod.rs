use crate::models::GeoPoint;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lng = (b.longitude - a.longitude).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * central_angle
}

/// Point `distance_km` due north of `origin`. Used to place fixtures at a
/// known distance.
pub fn offset_north(origin: &GeoPoint, distance_km: f64) -> GeoPoint {
    let delta_lat = (distance_km / EARTH_RADIUS_KM).to_degrees();
    GeoPoint {
        latitude: origin.latitude + delta_lat,
        longitude: origin.longitude,
    }
}

#[cfg(test)]
mod tests {
    use super::{haversine_km, offset_north};
    use crate::models::GeoPoint;

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint::new(53.5511, 9.9937);
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint::new(51.5074, -0.1278);
        let paris = GeoPoint::new(48.8566, 2.3522);
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn offset_north_lands_at_requested_distance() {
        let origin = GeoPoint::new(12.9716, 77.5946);
        let moved = offset_north(&origin, 1.2);
        assert!((haversine_km(&origin, &moved) - 1.2).abs() < 1e-6);
    }
}
