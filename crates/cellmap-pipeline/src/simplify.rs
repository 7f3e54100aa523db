//! Polygon approximation using the Ramer-Douglas-Peucker algorithm.
//!
//! Object outlines are traced at pixel resolution and can carry hundreds
//! of vertices. They are reduced here before being handed to map
//! consumers. The traversal uses an explicit stack so that long
//! contours of large objects cannot exhaust the call stack.

use crate::types::{Point, Polyline};

/// Approximate a polyline to within `tolerance` pixels.
///
/// Endpoints are always kept, so a closed ring (first point repeated at
/// the end) stays closed. A tolerance of `0.0` or less returns the input
/// unchanged, including collinear vertices.
#[must_use = "returns the approximated polyline"]
pub fn approximate_polygon(polyline: &Polyline, tolerance: f64) -> Polyline {
    let points = polyline.points();
    if tolerance <= 0.0 || points.len() < 3 {
        return polyline.clone();
    }

    let last = points.len() - 1;
    let mut kept = vec![false; points.len()];
    kept[0] = true;
    kept[last] = true;

    let mut pending = vec![(0, last)];
    while let Some((start, end)) = pending.pop() {
        if end <= start + 1 {
            continue;
        }
        let (max_idx, max_dist) = ((start + 1)..end)
            .map(|i| (i, perpendicular_distance(points[i], points[start], points[end])))
            .fold((start, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

        if max_dist > tolerance {
            kept[max_idx] = true;
            pending.push((start, max_idx));
            pending.push((max_idx, end));
        }
    }

    Polyline::new(
        points
            .iter()
            .zip(&kept)
            .filter_map(|(&p, &k)| k.then_some(p))
            .collect(),
    )
}

/// Distance from `p` to the line through `a` and `b`.
///
/// Falls back to the point distance when `a` and `b` coincide, which is
/// the case for the two endpoints of a closed ring.
fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx.mul_add(dx, dy * dy);

    if length_sq == 0.0 {
        return p.distance(a);
    }

    let cross = dx.mul_add(a.y - p.y, -(dy * (a.x - p.x)));
    cross.abs() / length_sq.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(coords: &[(f64, f64)]) -> Polyline {
        Polyline::new(coords.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    #[test]
    fn zero_tolerance_keeps_collinear_points() {
        let pl = line(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0)]);
        assert_eq!(approximate_polygon(&pl, 0.0), pl);
    }

    #[test]
    fn collinear_points_collapse_to_endpoints() {
        let pl = line(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]);
        let result = approximate_polygon(&pl, 0.5);
        assert_eq!(result, line(&[(0.0, 0.0), (3.0, 3.0)]));
    }

    #[test]
    fn closed_square_keeps_corners() {
        // A 4x4 square traced pixel by pixel, closed at the start point.
        let mut coords = Vec::new();
        for x in 0..4 {
            coords.push((f64::from(x), 0.0));
        }
        for y in 0..4 {
            coords.push((4.0, f64::from(y)));
        }
        for x in (1..=4).rev() {
            coords.push((f64::from(x), 4.0));
        }
        for y in (1..=4).rev() {
            coords.push((0.0, f64::from(y)));
        }
        coords.push((0.0, 0.0));

        let result = approximate_polygon(&line(&coords), 1.0);
        assert_eq!(
            result,
            line(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)])
        );
    }

    #[test]
    fn peaks_above_tolerance_are_retained() {
        let pl = line(&[(0.0, 0.0), (2.0, 5.0), (4.0, 0.0), (6.0, 5.0), (8.0, 0.0)]);
        assert_eq!(approximate_polygon(&pl, 1.0).len(), 5);
        assert_eq!(approximate_polygon(&pl, 10.0).len(), 2);
    }

    #[test]
    fn perpendicular_distance_coincident_endpoints() {
        let d = perpendicular_distance(
            Point::new(3.0, 4.0),
            Point::new(0.0, 0.0),
            Point::new(0.0, 0.0),
        );
        assert!((d - 5.0).abs() < 1e-10);
    }
}
