//! Pure geometry: distances, projections, arc lengths.
//!
//! Everything here works in meters; miles appear only at the resolver
//! boundary via [`meters_to_miles`]/[`miles_to_meters`]. Uses the
//! Haversine formula for geodesic distances and a locally-flattened
//! (equirectangular) plane for segment projection, where longitude is
//! compressed by `cos(lat)` so fractional positions stay honest away
//! from the equator.

use geo::{HaversineDistance, Line, Point};

/// International statute mile in meters.
pub const MILE_M: f64 = 1_609.344;

/// Haversine distance between two points in meters.
pub fn haversine_distance(p1: Point, p2: Point) -> f64 {
    p1.haversine_distance(&p2)
}

pub fn meters_to_miles(m: f64) -> f64 {
    m / MILE_M
}

pub fn miles_to_meters(mi: f64) -> f64 {
    mi * MILE_M
}

/// Convert degrees to approximate meters at the equator (for bounding
/// box buffers, not for reported distances).
pub fn degrees_to_meters_approx(degrees: f64) -> f64 {
    degrees * 111_320.0
}

/// Convert meters to approximate degrees at the equator.
pub fn meters_to_degrees_approx(meters: f64) -> f64 {
    meters / 111_320.0
}

/// Result of projecting a point onto a segment.
#[derive(Clone, Copy, Debug)]
pub struct SegmentProjection {
    /// Closest point on the segment (lng/lat degrees).
    pub closest: Point,
    /// Fractional position along the segment, clamped to `[0, 1]`.
    pub fraction: f64,
}

/// Perpendicular projection of `point` onto `line`, clamped to the
/// segment endpoints.
///
/// Longitudes are scaled by `cos(lat)` before the planar projection so
/// the returned fraction tracks real ground distance.
pub fn project_onto_segment(point: Point, line: Line) -> SegmentProjection {
    let k = point.y().to_radians().cos().abs().max(1e-9);

    let (px, py) = (point.x() * k, point.y());
    let (ax, ay) = (line.start.x * k, line.start.y);
    let (bx, by) = (line.end.x * k, line.end.y);

    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;

    if len_sq == 0.0 {
        // Degenerate segment
        return SegmentProjection {
            closest: Point::new(line.start.x, line.start.y),
            fraction: 0.0,
        };
    }

    let t = (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0);

    SegmentProjection {
        closest: Point::new((ax + t * dx) / k, ay + t * dy),
        fraction: t,
    }
}

/// Distance from a point to a line segment in meters.
pub fn haversine_distance_to_line(point: Point, line: Line) -> f64 {
    haversine_distance(point, project_onto_segment(point, line).closest)
}

/// Cumulative arc length along an ordered point sequence, in meters.
///
/// `out[i]` is the distance from the first vertex to vertex `i`;
/// `out[0]` is always `0.0`.
pub fn cumulative_lengths(points: &[Point]) -> Vec<f64> {
    let mut out = Vec::with_capacity(points.len());
    let mut total = 0.0;
    out.push(0.0);
    for pair in points.windows(2) {
        total += haversine_distance(pair[0], pair[1]);
        out.push(total);
    }
    out
}

/// Linear interpolation between two vertices at fraction `t`.
pub fn interpolate_along(a: Point, b: Point, t: f64) -> Point {
    Point::new(a.x() + (b.x() - a.x()) * t, a.y() + (b.y() - a.y()) * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::Coord;

    #[test]
    fn test_haversine_distance() {
        // NYC to LA is approximately 3,936 km
        let nyc = Point::new(-74.0060, 40.7128);
        let la = Point::new(-118.2437, 34.0522);
        let dist = haversine_distance(nyc, la);
        assert!((dist - 3_936_000.0).abs() < 50_000.0);
    }

    #[test]
    fn test_projection_midpoint() {
        let line = Line::new(Coord { x: -75.0, y: 40.0 }, Coord { x: -75.0, y: 40.2 });
        let proj = project_onto_segment(Point::new(-74.9, 40.1), line);
        assert_relative_eq!(proj.fraction, 0.5, epsilon = 1e-6);
        assert_relative_eq!(proj.closest.y(), 40.1, epsilon = 1e-6);
        assert_relative_eq!(proj.closest.x(), -75.0, epsilon = 1e-6);
    }

    #[test]
    fn test_projection_clamps_to_endpoints() {
        let line = Line::new(Coord { x: -75.0, y: 40.0 }, Coord { x: -75.0, y: 40.1 });
        let before = project_onto_segment(Point::new(-75.0, 39.5), line);
        assert_eq!(before.fraction, 0.0);
        let after = project_onto_segment(Point::new(-75.0, 40.5), line);
        assert_eq!(after.fraction, 1.0);
    }

    #[test]
    fn test_point_on_line_has_zero_distance() {
        let line = Line::new(Coord { x: -74.0, y: 40.6 }, Coord { x: -74.0, y: 40.8 });
        let dist = haversine_distance_to_line(Point::new(-74.0, 40.7), line);
        assert!(dist < 1.0);
    }

    #[test]
    fn test_cumulative_lengths() {
        let points = vec![
            Point::new(-75.0, 40.0),
            Point::new(-75.0, 40.1),
            Point::new(-75.0, 40.3),
        ];
        let cum = cumulative_lengths(&points);
        assert_eq!(cum.len(), 3);
        assert_eq!(cum[0], 0.0);
        // 0.1 degrees of latitude is ~11.1 km
        assert_relative_eq!(cum[1], 11_119.5, epsilon = 50.0);
        assert_relative_eq!(cum[2], 3.0 * cum[1], epsilon = 150.0);
    }

    #[test]
    fn test_interpolate_along() {
        let p = interpolate_along(Point::new(-75.0, 40.0), Point::new(-74.0, 41.0), 0.25);
        assert_relative_eq!(p.x(), -74.75, epsilon = 1e-9);
        assert_relative_eq!(p.y(), 40.25, epsilon = 1e-9);
    }

    #[test]
    fn test_mile_conversions() {
        assert_relative_eq!(meters_to_miles(miles_to_meters(2.5)), 2.5, epsilon = 1e-12);
        assert_relative_eq!(miles_to_meters(1.0), 1_609.344, epsilon = 1e-9);
    }
}
