//! Shape model and the geometry kernel contract used by the interpreters.
//!
//! Interpreters never do Boolean or affine math themselves; everything goes
//! through a [`GeometryKernel`] handle passed in by the caller.

mod overlay;

use serde::Serialize;

use crate::types::{serialize_points, serialize_rings};

pub use overlay::OverlayKernel;

/// A 2-D point in millimeters.
pub type Point = [f64; 2];

/// One polygon: an exterior ring plus zero or more holes.
///
/// Rings are stored open (the first point is not repeated at the end).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Polygon {
    #[serde(serialize_with = "serialize_points")]
    pub exterior: Vec<Point>,
    #[serde(serialize_with = "serialize_rings")]
    pub interiors: Vec<Vec<Point>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Point>) -> Self {
        Self {
            exterior,
            interiors: Vec::new(),
        }
    }

    pub fn area(&self) -> f64 {
        let holes: f64 = self.interiors.iter().map(|r| ring_area(r).abs()).sum();
        ring_area(&self.exterior).abs() - holes
    }
}

/// A filled area made of disjoint polygons. May be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Shape {
    polygons: Vec<Polygon>,
}

impl Shape {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_polygons(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn polygons(&self) -> &[Polygon] {
        &self.polygons
    }

    pub fn into_polygons(self) -> Vec<Polygon> {
        self.polygons
    }

    pub fn exteriors(&self) -> impl Iterator<Item = &Vec<Point>> {
        self.polygons.iter().map(|p| &p.exterior)
    }

    pub fn interiors(&self) -> impl Iterator<Item = &Vec<Point>> {
        self.polygons.iter().flat_map(|p| p.interiors.iter())
    }

    /// Every vertex of every ring.
    pub fn points(&self) -> impl Iterator<Item = &Point> {
        self.polygons
            .iter()
            .flat_map(|p| p.exterior.iter().chain(p.interiors.iter().flatten()))
    }

    pub fn area(&self) -> f64 {
        self.polygons.iter().map(Polygon::area).sum()
    }

    /// `[min_x, min_y, max_x, max_y]`, or `None` for an empty shape.
    pub fn bounds(&self) -> Option<[f64; 4]> {
        let mut points = self.points();
        let first = points.next()?;
        let init = [first[0], first[1], first[0], first[1]];
        Some(points.fold(init, |b, p| {
            [b[0].min(p[0]), b[1].min(p[1]), b[2].max(p[0]), b[3].max(p[1])]
        }))
    }

    pub(crate) fn map_points(&self, f: impl Fn(Point) -> Point) -> Shape {
        let map_ring = |ring: &Vec<Point>| ring.iter().map(|p| f(*p)).collect::<Vec<_>>();
        self.polygons
            .iter()
            .map(|p| Polygon {
                exterior: map_ring(&p.exterior),
                interiors: p.interiors.iter().map(map_ring).collect(),
            })
            .collect()
    }
}

impl FromIterator<Polygon> for Shape {
    fn from_iter<I: IntoIterator<Item = Polygon>>(iter: I) -> Self {
        Self {
            polygons: iter.into_iter().collect(),
        }
    }
}

/// Signed shoelace area of an open ring (positive when counter-clockwise).
pub fn ring_area(ring: &[Point]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for (k, p) in ring.iter().enumerate() {
        let q = ring[(k + 1) % ring.len()];
        sum += p[0] * q[1] - q[0] * p[1];
    }
    sum / 2.0
}

/// Sample an arc from `start_angle` towards `end_angle` (radians).
///
/// A positive `step` sweeps counter-clockwise and requires `end_angle >=
/// start_angle`; a negative one sweeps clockwise. The exact end point is
/// always the last sample.
pub fn arc_points(
    center: Point,
    radius: f64,
    start_angle: f64,
    end_angle: f64,
    step: f64,
) -> Vec<Point> {
    let at = |angle: f64| {
        [
            center[0] + radius * angle.cos(),
            center[1] + radius * angle.sin(),
        ]
    };

    let mut points = Vec::new();
    let mut angle = start_angle;
    if step > 0.0 {
        while angle < end_angle {
            points.push(at(angle));
            angle += step;
        }
    } else if step < 0.0 {
        while angle > end_angle {
            points.push(at(angle));
            angle += step;
        }
    } else {
        points.push(at(start_angle));
    }
    points.push(at(end_angle));
    points
}

/// Primitive construction and Boolean/affine algebra over [`Shape`]s.
///
/// Angles passed to [`GeometryKernel::arc`] are radians; rotations are
/// degrees counter-clockwise.
pub trait GeometryKernel: Send + Sync {
    /// Stroke a polyline with round joins and caps. Zero width gives an empty shape.
    fn line(&self, points: &[Point], width: f64) -> Shape;

    fn arc(
        &self,
        center: Point,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        step: f64,
        width: f64,
    ) -> Shape {
        self.line(
            &arc_points(center, radius, start_angle, end_angle, step),
            width,
        )
    }

    fn circle(&self, diameter: f64, center: Point) -> Shape;

    fn rect(&self, min: Point, max: Point) -> Shape;

    fn polygon(&self, points: &[Point]) -> Shape;

    fn union(&self, a: &Shape, b: &Shape) -> Shape;

    fn intersection(&self, a: &Shape, b: &Shape) -> Shape;

    fn difference(&self, a: &Shape, b: &Shape) -> Shape;

    fn union_all(&self, shapes: &[Shape]) -> Shape {
        shapes
            .iter()
            .fold(Shape::empty(), |acc, s| self.union(&acc, s))
    }

    fn translate(&self, shape: &Shape, offset: Point) -> Shape;

    fn rotate(&self, shape: &Shape, degrees: f64, origin: Point) -> Shape;

    /// Scale about the origin; negative factors mirror.
    fn scale(&self, shape: &Shape, factor: Point) -> Shape;

    /// Grow (positive) or shrink (negative) a shape by `offset`.
    fn buffer(&self, shape: &Shape, offset: f64) -> Shape;

    fn simplify(&self, shape: &Shape, tolerance: f64) -> Shape;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    fn unit_square() -> Polygon {
        Polygon::new(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]])
    }

    #[test]
    fn test_ring_area_orientation() {
        let ccw = unit_square().exterior;
        let mut cw = ccw.clone();
        cw.reverse();
        assert_abs_diff_eq!(ring_area(&ccw), 1.0);
        assert_abs_diff_eq!(ring_area(&cw), -1.0);
    }

    #[test]
    fn test_polygon_area_with_hole() {
        let mut poly = Polygon::new(vec![[0.0, 0.0], [4.0, 0.0], [4.0, 4.0], [0.0, 4.0]]);
        poly.interiors
            .push(vec![[1.0, 1.0], [1.0, 2.0], [2.0, 2.0], [2.0, 1.0]]);
        assert_abs_diff_eq!(poly.area(), 15.0);
    }

    #[test]
    fn test_shape_bounds() {
        let shape = Shape::from_polygons(vec![unit_square()]);
        assert_eq!(shape.bounds(), Some([0.0, 0.0, 1.0, 1.0]));
        assert_eq!(Shape::empty().bounds(), None);
    }

    #[test]
    fn test_arc_points_ccw_quarter() {
        let pts = arc_points([0.0, 0.0], 1.0, 0.0, PI / 2.0, 0.1);
        // 0.0, 0.1, ... 1.5 plus the exact end
        assert_eq!(pts.len(), 17);
        assert_abs_diff_eq!(pts[0][0], 1.0);
        let last = pts[pts.len() - 1];
        assert_abs_diff_eq!(last[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(last[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_arc_points_cw_offset_center() {
        let pts = arc_points([5.0, 5.0], 2.0, PI, PI / 2.0, -0.1);
        assert_abs_diff_eq!(pts[0][0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pts[0][1], 5.0, epsilon = 1e-12);
        let last = pts[pts.len() - 1];
        assert_abs_diff_eq!(last[0], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(last[1], 7.0, epsilon = 1e-12);
        for p in &pts {
            let r = ((p[0] - 5.0).powi(2) + (p[1] - 5.0).powi(2)).sqrt();
            assert_abs_diff_eq!(r, 2.0, epsilon = 1e-9);
        }
    }
}
