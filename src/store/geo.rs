//! Geometry helpers for the geo filter operators.
//!
//! Points are `[x, y]`; for GeoJSON that is `[lng, lat]` in degrees.

use serde_json::Value;

use crate::filter::filter_where::parse_point;
use crate::filter::{GeoShape, Geometry, NearQuery, Point};

/// Equatorial radius used to turn radians into meters
pub const EARTH_RADIUS_METERS: f64 = 6_378_100.0;

const EPSILON: f64 = 1e-9;

/// Location stored in a document field: a legacy pair or a GeoJSON Point
pub fn extract_point(value: &Value) -> Option<Point> {
    if let Some(Value::String(kind)) = value.get("type") {
        if kind != "Point" {
            return None;
        }
        return value.get("coordinates").and_then(parse_point);
    }
    parse_point(value)
}

pub fn planar_distance(a: Point, b: Point) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Central angle between two lng/lat points, in radians
pub fn spherical_distance(a: Point, b: Point) -> f64 {
    let (lat1, lat2) = (a.y.to_radians(), b.y.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.x - a.x).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// `$near` (planar) and `$nearSphere` (spherical) distance bounds.
///
/// GeoJSON queries measure in meters on the sphere; legacy `$near` uses
/// coordinate units and legacy `$nearSphere` radians.
pub fn near_matches(query: &NearQuery, spherical: bool, location: Point) -> bool {
    let distance = if query.geojson {
        spherical_distance(query.point, location) * EARTH_RADIUS_METERS
    } else if spherical {
        spherical_distance(query.point, location)
    } else {
        planar_distance(query.point, location)
    };

    query.max_distance.map_or(true, |max| distance <= max + EPSILON)
        && query.min_distance.map_or(true, |min| distance + EPSILON >= min)
}

pub fn within(shape: &GeoShape, location: Point) -> bool {
    match shape {
        GeoShape::Box { bottom_left, top_right } => {
            location.x >= bottom_left.x.min(top_right.x)
                && location.x <= bottom_left.x.max(top_right.x)
                && location.y >= bottom_left.y.min(top_right.y)
                && location.y <= bottom_left.y.max(top_right.y)
        }
        GeoShape::Center { center, radius } => planar_distance(*center, location) <= radius + EPSILON,
        GeoShape::CenterSphere { center, radius } => spherical_distance(*center, location) <= radius + EPSILON,
        GeoShape::Polygon(ring) => in_polygon(ring, location),
        GeoShape::Geometry(geometry) => intersects(geometry, location),
    }
}

/// Whether a point field intersects a query geometry
pub fn intersects(geometry: &Geometry, location: Point) -> bool {
    match geometry {
        Geometry::Point(p) => planar_distance(*p, location) <= EPSILON,
        Geometry::Polygon(ring) => in_polygon(ring, location),
    }
}

/// Ray casting; points on an edge count as inside
pub fn in_polygon(ring: &[Point], p: Point) -> bool {
    if ring.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if on_segment(a, b, p) {
            return true;
        }
        if (a.y > p.y) != (b.y > p.y) {
            let cross_x = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < cross_x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    cross.abs() <= EPSILON
        && p.x >= a.x.min(b.x) - EPSILON
        && p.x <= a.x.max(b.x) + EPSILON
        && p.y >= a.y.min(b.y) - EPSILON
        && p.y <= a.y.max(b.y) + EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_legacy_and_geojson_points() {
        assert_eq!(extract_point(&json!([1, 2])), Some(Point::new(1.0, 2.0)));
        assert_eq!(
            extract_point(&json!({ "type": "Point", "coordinates": [3.5, 4] })),
            Some(Point::new(3.5, 4.0))
        );
        assert_eq!(extract_point(&json!({ "type": "LineString", "coordinates": [] })), None);
        assert_eq!(extract_point(&json!("x")), None);
    }

    #[test]
    fn polygon_contains_interior_and_edges() {
        let square = vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 4.0),
            Point::new(0.0, 4.0),
        ];
        assert!(in_polygon(&square, Point::new(2.0, 2.0)));
        assert!(in_polygon(&square, Point::new(4.0, 2.0)));
        assert!(!in_polygon(&square, Point::new(5.0, 2.0)));
    }

    #[test]
    fn spherical_distance_is_roughly_right() {
        // Oslo to Bergen is about 305 km
        let oslo = Point::new(10.75, 59.91);
        let bergen = Point::new(5.32, 60.39);
        let km = spherical_distance(oslo, bergen) * EARTH_RADIUS_METERS / 1000.0;
        assert!((290.0..320.0).contains(&km), "{}", km);
    }

    #[test]
    fn near_respects_bounds() {
        let query = NearQuery {
            point: Point::new(0.0, 0.0),
            max_distance: Some(5.0),
            min_distance: Some(1.0),
            geojson: false,
        };
        assert!(near_matches(&query, false, Point::new(3.0, 4.0)));
        assert!(!near_matches(&query, false, Point::new(0.5, 0.0)));
        assert!(!near_matches(&query, false, Point::new(6.0, 0.0)));
    }
}
