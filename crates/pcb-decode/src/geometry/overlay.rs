use std::f64::consts::PI;

use i_overlay::core::fill_rule::FillRule;
use i_overlay::core::overlay_rule::OverlayRule;
use i_overlay::float::simplify::SimplifyShape;
use i_overlay::float::single::SingleFloatOverlay;
use i_overlay::mesh::outline::offset::OutlineOffset;
use i_overlay::mesh::stroke::offset::StrokeOffset;
use i_overlay::mesh::style::{LineJoin, OutlineStyle, StrokeStyle};

use super::{ring_area, GeometryKernel, Point, Polygon, Shape};

/// i_overlay's shape layout: shapes → contours (outer first, then holes) → points.
type Contours = Vec<Vec<Vec<Point>>>;

/// Geometry kernel that tessellates curves into polygons and hands Boolean
/// operations to `i_overlay`.
#[derive(Debug, Clone)]
pub struct OverlayKernel {
    circle_segments: usize,
}

impl Default for OverlayKernel {
    fn default() -> Self {
        Self::new(64)
    }
}

impl OverlayKernel {
    /// `circle_segments` is the number of edges used for a full circle.
    pub fn new(circle_segments: usize) -> Self {
        Self {
            circle_segments: circle_segments.max(8),
        }
    }

    fn circle_ring(&self, center: Point, radius: f64) -> Vec<Point> {
        let n = self.circle_segments;
        (0..n)
            .map(|k| {
                let a = 2.0 * PI * (k as f64) / (n as f64);
                [center[0] + radius * a.cos(), center[1] + radius * a.sin()]
            })
            .collect()
    }

    fn overlay(&self, subject: &Shape, clip: &Shape, rule: OverlayRule) -> Shape {
        let subject = to_contours(subject);
        let clip = to_contours(clip);
        from_contours(subject.overlay(&clip, rule, FillRule::NonZero))
    }

    /// Resolve overlapping or self-intersecting rings into disjoint polygons.
    fn normalize(&self, rings: Vec<Vec<Point>>) -> Shape {
        let subject: Contours = rings
            .into_iter()
            .filter(|r| r.len() >= 3)
            .map(|r| vec![r])
            .collect();
        merge(subject)
    }

    /// Angle step for round joins, matching the circle tessellation.
    fn join(&self) -> LineJoin<f64> {
        LineJoin::Round(2.0 * PI / self.circle_segments as f64)
    }
}

/// Contours with outer rings counter-clockwise and holes clockwise, so that
/// non-zero winding over any number of polygons is their union.
fn oriented_contours<'s>(shapes: impl IntoIterator<Item = &'s Shape>) -> Contours {
    shapes
        .into_iter()
        .flat_map(|s| s.polygons())
        .filter(|p| p.exterior.len() >= 3)
        .map(|p| {
            let mut contours = Vec::with_capacity(1 + p.interiors.len());
            let mut exterior = p.exterior.clone();
            if ring_area(&exterior) < 0.0 {
                exterior.reverse();
            }
            contours.push(exterior);
            for hole in &p.interiors {
                let mut hole = hole.clone();
                if ring_area(&hole) > 0.0 {
                    hole.reverse();
                }
                contours.push(hole);
            }
            contours
        })
        .collect()
}

/// Non-zero fill of every contour at once, cleaned of degenerate edges.
fn merge(subject: Contours) -> Shape {
    if subject.is_empty() {
        return Shape::empty();
    }
    from_contours(subject.simplify_shape(FillRule::NonZero, 0.0))
}

fn to_contours(shape: &Shape) -> Contours {
    shape
        .polygons()
        .iter()
        .map(|p| {
            let mut contours = Vec::with_capacity(1 + p.interiors.len());
            contours.push(p.exterior.clone());
            contours.extend(p.interiors.iter().cloned());
            contours
        })
        .collect()
}

fn from_contours(shapes: Contours) -> Shape {
    shapes
        .into_iter()
        .filter_map(|mut contours| {
            if contours.is_empty() {
                return None;
            }
            let exterior = contours.remove(0);
            Some(Polygon {
                exterior,
                interiors: contours,
            })
        })
        .collect()
}

/// Counter-clockwise rectangle around segment `a → b` with half-width `hw`.
fn segment_ring(a: Point, b: Point, hw: f64) -> Option<Vec<Point>> {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1e-12 {
        return None;
    }
    let n = [-dy / len * hw, dx / len * hw];
    Some(vec![
        [a[0] - n[0], a[1] - n[1]],
        [b[0] - n[0], b[1] - n[1]],
        [b[0] + n[0], b[1] + n[1]],
        [a[0] + n[0], a[1] + n[1]],
    ])
}

fn strip_closing_point(points: &[Point]) -> &[Point] {
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() > 1 && first == last => {
            &points[..points.len() - 1]
        }
        _ => points,
    }
}

/// Ramer–Douglas–Peucker over an open polyline; keeps both end points.
fn douglas_peucker(points: &[Point], tolerance: f64, out: &mut Vec<Point>) {
    if points.len() < 3 {
        out.extend_from_slice(&points[..points.len().saturating_sub(1)]);
        return;
    }
    let (a, b) = (points[0], points[points.len() - 1]);
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let len = (dx * dx + dy * dy).sqrt();
    let distance = |p: &Point| {
        if len < 1e-12 {
            ((p[0] - a[0]).powi(2) + (p[1] - a[1]).powi(2)).sqrt()
        } else {
            ((p[0] - a[0]) * dy - (p[1] - a[1]) * dx).abs() / len
        }
    };

    let (index, max) = points[1..points.len() - 1]
        .iter()
        .enumerate()
        .map(|(k, p)| (k + 1, distance(p)))
        .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });

    if max > tolerance {
        douglas_peucker(&points[..=index], tolerance, out);
        douglas_peucker(&points[index..], tolerance, out);
    } else {
        out.push(a);
    }
}

impl GeometryKernel for OverlayKernel {
    fn line(&self, points: &[Point], width: f64) -> Shape {
        if width <= 0.0 || points.is_empty() {
            return Shape::empty();
        }
        let hw = width / 2.0;
        let mut rings: Vec<Vec<Point>> = points
            .iter()
            .map(|p| self.circle_ring(*p, hw))
            .collect();
        rings.extend(
            points
                .windows(2)
                .filter_map(|pair| segment_ring(pair[0], pair[1], hw)),
        );
        if rings.len() == 1 {
            return Shape::from_polygons(vec![Polygon::new(rings.remove(0))]);
        }
        self.normalize(rings)
    }

    fn circle(&self, diameter: f64, center: Point) -> Shape {
        if diameter <= 0.0 {
            return Shape::empty();
        }
        Shape::from_polygons(vec![Polygon::new(self.circle_ring(center, diameter / 2.0))])
    }

    fn rect(&self, min: Point, max: Point) -> Shape {
        let (x0, x1) = (min[0].min(max[0]), min[0].max(max[0]));
        let (y0, y1) = (min[1].min(max[1]), min[1].max(max[1]));
        if x1 - x0 <= 0.0 || y1 - y0 <= 0.0 {
            return Shape::empty();
        }
        Shape::from_polygons(vec![Polygon::new(vec![
            [x0, y0],
            [x1, y0],
            [x1, y1],
            [x0, y1],
        ])])
    }

    fn polygon(&self, points: &[Point]) -> Shape {
        let ring = strip_closing_point(points);
        if ring.len() < 3 || ring_area(ring).abs() < 1e-15 {
            return Shape::empty();
        }
        self.normalize(vec![ring.to_vec()])
    }

    fn union(&self, a: &Shape, b: &Shape) -> Shape {
        if a.is_empty() {
            return b.clone();
        }
        if b.is_empty() {
            return a.clone();
        }
        self.overlay(a, b, OverlayRule::Union)
    }

    fn intersection(&self, a: &Shape, b: &Shape) -> Shape {
        if a.is_empty() || b.is_empty() {
            return Shape::empty();
        }
        self.overlay(a, b, OverlayRule::Intersect)
    }

    fn difference(&self, a: &Shape, b: &Shape) -> Shape {
        if a.is_empty() || b.is_empty() {
            return a.clone();
        }
        self.overlay(a, b, OverlayRule::Difference)
    }

    fn translate(&self, shape: &Shape, offset: Point) -> Shape {
        shape.map_points(|p| [p[0] + offset[0], p[1] + offset[1]])
    }

    fn rotate(&self, shape: &Shape, degrees: f64, origin: Point) -> Shape {
        if degrees.abs() < 1e-12 {
            return shape.clone();
        }
        let (sin, cos) = degrees.to_radians().sin_cos();
        shape.map_points(|p| {
            let (x, y) = (p[0] - origin[0], p[1] - origin[1]);
            [origin[0] + x * cos - y * sin, origin[1] + x * sin + y * cos]
        })
    }

    fn scale(&self, shape: &Shape, factor: Point) -> Shape {
        let scaled = shape.map_points(|p| [p[0] * factor[0], p[1] * factor[1]]);
        if factor[0] * factor[1] >= 0.0 {
            return scaled;
        }
        // Mirroring flips ring orientation; restore outer-CCW / hole-CW.
        scaled
            .into_polygons()
            .into_iter()
            .map(|mut p| {
                p.exterior.reverse();
                p.interiors.iter_mut().for_each(|r| r.reverse());
                p
            })
            .collect()
    }

    fn union_all(&self, shapes: &[Shape]) -> Shape {
        let mut non_empty = shapes.iter().filter(|s| !s.is_empty());
        match (non_empty.next(), non_empty.next()) {
            (None, _) => Shape::empty(),
            (Some(only), None) => only.clone(),
            _ => merge(oriented_contours(shapes)),
        }
    }

    fn buffer(&self, shape: &Shape, offset: f64) -> Shape {
        if offset == 0.0 || shape.is_empty() {
            return shape.clone();
        }
        // i_overlay's own orientation, which the offset builders rely on.
        let subject = oriented_contours([shape]);
        if subject.is_empty() {
            return Shape::empty();
        }
        let native: Contours = subject.simplify_shape(FillRule::NonZero, 0.0);
        if offset > 0.0 {
            let style = OutlineStyle::new(offset).line_join(self.join());
            return from_contours(native.outline(style));
        }
        let style = StrokeStyle::new(2.0 * offset.abs()).line_join(self.join());
        let band = from_contours(native.stroke(style, true));
        self.difference(shape, &band)
    }

    fn simplify(&self, shape: &Shape, tolerance: f64) -> Shape {
        if shape.is_empty() {
            return Shape::empty();
        }
        let simplify_ring = |ring: &Vec<Point>| {
            let mut closed = ring.clone();
            if let Some(first) = ring.first() {
                closed.push(*first);
            }
            let mut out = Vec::with_capacity(ring.len());
            douglas_peucker(&closed, tolerance, &mut out);
            out
        };
        let reduced: Shape = shape
            .polygons()
            .iter()
            .map(|p| Polygon {
                exterior: simplify_ring(&p.exterior),
                interiors: p.interiors.iter().map(simplify_ring).filter(|r| r.len() >= 3).collect(),
            })
            .collect();
        // Collapsed rings and new self-intersections are cleaned up here.
        merge(oriented_contours([&reduced]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn kernel() -> OverlayKernel {
        OverlayKernel::new(256)
    }

    #[test]
    fn test_circle_area() {
        let shape = kernel().circle(2.0, [3.0, 4.0]);
        assert_eq!(shape.polygons().len(), 1);
        assert_abs_diff_eq!(shape.area(), PI, epsilon = 1e-3);
        let b = shape.bounds().unwrap();
        assert_abs_diff_eq!(b[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(b[2], 4.0, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_width_line_is_empty() {
        assert!(kernel().line(&[[0.0, 0.0], [1.0, 0.0]], 0.0).is_empty());
    }

    #[test]
    fn test_line_is_capsule() {
        let shape = kernel().line(&[[0.0, 0.0], [10.0, 0.0]], 2.0);
        assert_eq!(shape.polygons().len(), 1);
        // 10 x 2 rectangle plus two half circles of radius 1
        assert_abs_diff_eq!(shape.area(), 20.0 + PI, epsilon = 1e-2);
    }

    #[test]
    fn test_union_of_disjoint_boxes() {
        let k = kernel();
        let a = k.rect([0.0, 0.0], [1.0, 1.0]);
        let b = k.rect([2.0, 0.0], [3.0, 1.0]);
        let u = k.union(&a, &b);
        assert_eq!(u.polygons().len(), 2);
        assert_abs_diff_eq!(u.area(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_difference_makes_hole() {
        let k = kernel();
        let outer = k.rect([0.0, 0.0], [4.0, 4.0]);
        let inner = k.rect([1.0, 1.0], [3.0, 3.0]);
        let d = k.difference(&outer, &inner);
        assert_eq!(d.polygons().len(), 1);
        assert_eq!(d.interiors().count(), 1);
        assert_abs_diff_eq!(d.area(), 12.0, epsilon = 1e-6);
    }

    #[test]
    fn test_intersection() {
        let k = kernel();
        let a = k.rect([0.0, 0.0], [2.0, 2.0]);
        let b = k.rect([1.0, 1.0], [3.0, 3.0]);
        assert_abs_diff_eq!(k.intersection(&a, &b).area(), 1.0, epsilon = 1e-6);
        assert!(k.intersection(&a, &Shape::empty()).is_empty());
    }

    #[test]
    fn test_polygon_accepts_closed_ring() {
        let k = kernel();
        let shape = k.polygon(&[[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]]);
        assert_abs_diff_eq!(shape.area(), 100.0, epsilon = 1e-6);
    }

    #[test]
    fn test_degenerate_polygon_is_empty() {
        let k = kernel();
        assert!(k.polygon(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]).is_empty());
    }

    #[test]
    fn test_rotate_about_origin() {
        let k = kernel();
        let shape = k.rect([1.0, -0.5], [3.0, 0.5]);
        let rotated = k.rotate(&shape, 90.0, [0.0, 0.0]);
        let b = rotated.bounds().unwrap();
        assert_abs_diff_eq!(b[0], -0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(b[1], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(b[2], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(b[3], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_mirror_keeps_orientation() {
        let k = kernel();
        let shape = k.rect([1.0, 0.0], [2.0, 1.0]);
        let mirrored = k.scale(&shape, [-1.0, 1.0]);
        assert!(ring_area(&mirrored.polygons()[0].exterior) > 0.0);
        assert_eq!(mirrored.bounds(), Some([-2.0, 0.0, -1.0, 1.0]));
    }

    #[test]
    fn test_buffer_grows_and_shrinks() {
        let k = kernel();
        let square = k.rect([0.0, 0.0], [4.0, 4.0]);
        let grown = k.buffer(&square, 1.0);
        // 16 + 4 edges * 4 + a full unit circle at the corners
        assert_abs_diff_eq!(grown.area(), 32.0 + PI, epsilon = 1e-2);
        let b = grown.bounds().unwrap();
        assert_abs_diff_eq!(b[0], -1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(b[3], 5.0, epsilon = 1e-6);
        let shrunk = k.buffer(&square, -1.0);
        assert_abs_diff_eq!(shrunk.area(), 4.0, epsilon = 1e-6);
        assert!(k.buffer(&square, -2.5).is_empty());
    }

    #[test]
    fn test_buffer_keeps_holes() {
        let k = kernel();
        let frame = k.difference(&k.rect([0.0, 0.0], [6.0, 6.0]), &k.rect([2.0, 2.0], [4.0, 4.0]));
        // Outer edge rounds out to 7x7 less the corners; the hole closes to [2.5, 3.5]
        let grown = k.buffer(&frame, 0.5);
        assert_eq!(grown.interiors().count(), 1);
        assert_abs_diff_eq!(grown.area(), 36.0 + 12.0 + 0.25 * PI - 1.0, epsilon = 1e-2);
    }

    #[test]
    fn test_union_all_overlapping_and_mixed_orientation() {
        let k = kernel();
        let a = k.rect([0.0, 0.0], [2.0, 2.0]);
        // Boolean results come back in the overlay library's orientation
        let b = k.intersection(&k.rect([1.0, 1.0], [3.0, 3.0]), &k.rect([0.0, 0.0], [10.0, 10.0]));
        let far = k.circle(2.0, [10.0, 10.0]);
        let u = k.union_all(&[a, b, far]);
        assert_eq!(u.polygons().len(), 2);
        assert_abs_diff_eq!(u.area(), 7.0 + PI, epsilon = 1e-3);
        assert!(k.union_all(&[]).is_empty());
    }

    #[test]
    fn test_union_all_fills_holes_covered_by_others() {
        let k = kernel();
        let frame = k.difference(&k.rect([0.0, 0.0], [4.0, 4.0]), &k.rect([1.0, 1.0], [3.0, 3.0]));
        let plug = k.rect([1.0, 1.0], [3.0, 3.0]);
        let u = k.union_all(&[frame, plug]);
        assert_eq!(u.interiors().count(), 0);
        assert_abs_diff_eq!(u.area(), 16.0, epsilon = 1e-6);
    }

    #[test]
    fn test_simplify_drops_collinear_points() {
        let k = kernel();
        let shape = Shape::from_polygons(vec![Polygon::new(vec![
            [0.0, 0.0],
            [1.0, 0.0],
            [2.0, 0.0],
            [2.0, 2.0],
            [0.0, 2.0],
        ])]);
        let simplified = k.simplify(&shape, 0.01);
        assert_eq!(simplified.polygons()[0].exterior.len(), 4);
        assert_abs_diff_eq!(simplified.area(), 4.0, epsilon = 1e-6);
    }
}
