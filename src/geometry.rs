//! Bounding-box prefilter and great-circle distance.

use geo::Point;
use serde::{Deserialize, Serialize};

/// Mean Earth radius used for every reported distance.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Approximate length of one degree of latitude.
const KM_PER_DEGREE: f64 = 111.0;

/// Floor for cos(lat) so the longitude span stays finite at the poles.
const MIN_COS_LAT: f64 = 1e-6;

/// Latitude/longitude extent in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
}

impl BoundingBox {
    pub fn new(lat_min: f64, lat_max: f64, lng_min: f64, lng_max: f64) -> Self {
        Self {
            lat_min,
            lat_max,
            lng_min,
            lng_max,
        }
    }

    /// Inclusive of the edges, matching SQL `BETWEEN`.
    #[cfg(test)]
    pub fn contains(&self, lat: f64, lng: f64) -> bool {
        use geo::{coord, Intersects, Rect};

        let rect = Rect::new(
            coord! { x: self.lng_min, y: self.lat_min },
            coord! { x: self.lng_max, y: self.lat_max },
        );
        rect.intersects(&coord! { x: lng, y: lat })
    }
}

/// Square cap around a point, cheap enough to drive an index range scan.
///
/// Over-covers near the poles and at large radii; callers must re-check
/// candidates with [`haversine_km`].
pub fn bounding_box(lat: f64, lng: f64, radius_km: f64) -> BoundingBox {
    let lat_radius_deg = radius_km / KM_PER_DEGREE;
    let cos_lat = lat.to_radians().cos().max(MIN_COS_LAT);
    let lng_radius_deg = radius_km / (KM_PER_DEGREE * cos_lat);

    BoundingBox::new(
        lat - lat_radius_deg,
        lat + lat_radius_deg,
        lng - lng_radius_deg,
        lng + lng_radius_deg,
    )
}

/// Great-circle distance in kilometers between two (lon, lat) points.
pub fn haversine_km(from: Point<f64>, to: Point<f64>) -> f64 {
    let (lat1, lat2) = (from.y().to_radians(), to.y().to_radians());
    let dlat = (to.y() - from.y()).to_radians();
    let dlng = (to.x() - from.x()).to_radians();

    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_at_equator() {
        let bbox = bounding_box(0.0, 0.0, 111.0);
        assert!((bbox.lat_min + 1.0).abs() < 1e-9);
        assert!((bbox.lat_max - 1.0).abs() < 1e-9);
        assert!((bbox.lng_max - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounding_box_widens_with_latitude() {
        let equator = bounding_box(0.0, 10.0, 50.0);
        let north = bounding_box(60.0, 10.0, 50.0);
        let north_span = north.lng_max - north.lng_min;
        let equator_span = equator.lng_max - equator.lng_min;
        assert!((north_span / equator_span - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_bounding_box_finite_at_pole() {
        let bbox = bounding_box(90.0, 0.0, 10.0);
        assert!(bbox.lng_min.is_finite());
        assert!(bbox.lng_max.is_finite());
    }

    #[test]
    fn test_haversine_seattle() {
        let query = Point::new(-122.33, 47.6);
        let seattle = Point::new(-122.3321, 47.6062);
        let d = haversine_km(query, seattle);
        assert!((d - 0.7).abs() < 0.05, "got {d}");
    }

    #[test]
    fn test_haversine_one_degree_of_latitude() {
        let d = haversine_km(Point::new(0.0, 0.0), Point::new(0.0, 1.0));
        assert!((d - 111.195).abs() < 0.01, "got {d}");
        assert_eq!(haversine_km(Point::new(5.0, 5.0), Point::new(5.0, 5.0)), 0.0);
    }

    #[test]
    fn test_box_corner_is_outside_radius() {
        let bbox = bounding_box(47.6, -122.33, 10.0);
        assert!(bbox.contains(bbox.lat_max, bbox.lng_max));
        let corner = haversine_km(
            Point::new(-122.33, 47.6),
            Point::new(bbox.lng_max, bbox.lat_max),
        );
        assert!(corner > 10.0);
    }
}
