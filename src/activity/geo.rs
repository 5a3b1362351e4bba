use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;
/// Approximate length of one degree of latitude.
pub const METERS_PER_DEGREE: f64 = 111_320.0;
/// The map only re-queries once its centre drifts further than this.
pub const REGION_REFRESH_DEGREES: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Great-circle distance between two points.
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlng = (b.longitude - a.longitude).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().min(1.0).asin()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    /// Box spanning `lat_delta` x `lng_delta` degrees centred on `center`, as a
    /// map viewport reports its region.
    pub fn around(center: GeoPoint, lat_delta: f64, lng_delta: f64) -> Self {
        let half_lat = lat_delta.abs() / 2.0;
        let half_lng = lng_delta.abs() / 2.0;
        Self {
            min_lat: center.latitude - half_lat,
            min_lng: center.longitude - half_lng,
            max_lat: center.latitude + half_lat,
            max_lng: center.longitude + half_lng,
        }
    }

    /// Smallest box containing every point within `radius_m` of `center`.
    /// Used to narrow a radius query before computing exact distances.
    pub fn enclosing_radius(center: GeoPoint, radius_m: f64) -> Self {
        let lat_delta = radius_m / METERS_PER_DEGREE;
        let cos_lat = center.latitude.to_radians().cos().abs();
        let lng_delta = if cos_lat < 1e-6 {
            360.0
        } else {
            (radius_m / (METERS_PER_DEGREE * cos_lat)).min(360.0)
        };
        Self::around(center, lat_delta * 2.0, lng_delta * 2.0)
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        point.latitude >= self.min_lat
            && point.latitude <= self.max_lat
            && point.longitude >= self.min_lng
            && point.longitude <= self.max_lng
    }
}

/// True once the centre moved more than `threshold` degrees on either axis.
pub fn region_moved(previous: GeoPoint, next: GeoPoint, threshold: f64) -> bool {
    (next.latitude - previous.latitude).abs() > threshold
        || (next.longitude - previous.longitude).abs() > threshold
}
