//! Pen strokes.

use super::{ObjectId, ShapeStyle, ShapeTrait, point_to_polyline_dist, point_to_segment_dist};
use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

/// A stroke recorded from pointer samples, stored as a polyline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Freehand {
    #[serde(rename = "objectId")]
    pub(crate) id: ObjectId,
    pub points: Vec<Point>,
    #[serde(flatten)]
    pub style: ShapeStyle,
}

impl Freehand {
    pub fn from_points(points: Vec<Point>) -> Self {
        Self {
            id: ObjectId::generate(),
            points,
            style: ShapeStyle::default(),
        }
    }

    /// Append a pointer sample.
    pub fn add_point(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Drop samples that lie within `tolerance` of the simplified stroke
    /// (Ramer-Douglas-Peucker). End points are always kept.
    pub fn simplify(&mut self, tolerance: f64) {
        let n = self.points.len();
        if n < 3 {
            return;
        }
        let mut keep = vec![false; n];
        keep[0] = true;
        keep[n - 1] = true;

        let mut spans = vec![(0, n - 1)];
        while let Some((start, end)) = spans.pop() {
            let (a, b) = (self.points[start], self.points[end]);
            let farthest = (start + 1..end)
                .map(|i| (i, point_to_segment_dist(self.points[i], a, b)))
                .max_by(|x, y| x.1.total_cmp(&y.1));
            if let Some((i, dist)) = farthest {
                if dist > tolerance {
                    keep[i] = true;
                    spans.push((start, i));
                    spans.push((i, end));
                }
            }
        }

        let mut kept = keep.into_iter();
        self.points.retain(|_| kept.next().unwrap_or(false));
    }
}

impl ShapeTrait for Freehand {
    fn id(&self) -> &ObjectId {
        &self.id
    }

    fn bounds(&self) -> Rect {
        let mut points = self.points.iter();
        let Some(first) = points.next() else {
            return Rect::ZERO;
        };
        points.fold(Rect::from_points(*first, *first), |acc, p| acc.union_pt(*p))
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        point_to_polyline_dist(point, &self.points) <= tolerance + self.style.stroke_width / 2.0
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }

    fn transform(&mut self, affine: Affine) {
        self.points.iter_mut().for_each(|p| *p = affine * *p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stroke(points: &[(f64, f64)]) -> Freehand {
        Freehand::from_points(points.iter().map(|&(x, y)| Point::new(x, y)).collect())
    }

    #[test]
    fn test_samples_accumulate() {
        let mut pen = Freehand::from_points(Vec::new());
        assert!(pen.is_empty());
        pen.add_point(Point::new(3.0, 4.0));
        pen.add_point(Point::new(5.0, 6.0));
        assert_eq!(pen.len(), 2);
    }

    #[test]
    fn test_bounds_cover_all_samples() {
        let pen = stroke(&[(10.0, 40.0), (-5.0, 0.0), (20.0, 15.0)]);
        assert_eq!(pen.bounds(), Rect::new(-5.0, 0.0, 20.0, 40.0));
        assert_eq!(Freehand::from_points(Vec::new()).bounds(), Rect::ZERO);
    }

    #[test]
    fn test_simplify_drops_jitter_keeps_corners() {
        let mut jitter = stroke(&[(0.0, 0.0), (1.0, 0.2), (2.0, -0.1), (3.0, 0.1), (4.0, 0.0)]);
        jitter.simplify(0.5);
        assert_eq!(jitter.points, vec![Point::new(0.0, 0.0), Point::new(4.0, 0.0)]);

        let mut corner = stroke(&[(0.0, 0.0), (5.0, 0.1), (10.0, 0.0), (10.0, 5.0), (10.0, 10.0)]);
        corner.simplify(0.5);
        assert_eq!(
            corner.points,
            vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(10.0, 10.0)]
        );
    }

    #[test]
    fn test_hit_test_uses_stroke_width() {
        let mut pen = stroke(&[(0.0, 0.0), (100.0, 0.0)]);
        pen.style.stroke_width = 10.0;
        assert!(pen.hit_test(Point::new(50.0, 6.0), 2.0));
        assert!(!pen.hit_test(Point::new(50.0, 20.0), 2.0));
    }
}
