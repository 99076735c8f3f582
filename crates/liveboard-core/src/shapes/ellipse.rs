//! Ellipses and circles.

use super::{ObjectId, ShapeStyle, ShapeTrait};
use kurbo::{Affine, Point, Rect, Vec2};
use serde::{Deserialize, Serialize};

/// Axis-aligned ellipse given by its centre and two radii.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ellipse {
    #[serde(rename = "objectId")]
    pub(crate) id: ObjectId,
    pub center: Point,
    pub radius_x: f64,
    pub radius_y: f64,
    /// Degrees, around the centre. Older records omit it.
    #[serde(default)]
    pub angle: f64,
    #[serde(flatten)]
    pub style: ShapeStyle,
}

impl Ellipse {
    pub fn new(center: Point, radius_x: f64, radius_y: f64) -> Self {
        Self {
            id: ObjectId::generate(),
            center,
            radius_x,
            radius_y,
            angle: 0.0,
            style: ShapeStyle::default(),
        }
    }

    pub fn circle(center: Point, radius: f64) -> Self {
        Self::new(center, radius, radius)
    }

    /// The ellipse inscribed in `rect`.
    pub fn from_rect(rect: Rect) -> Self {
        Self::new(rect.center(), rect.width() / 2.0, rect.height() / 2.0)
    }

    /// Whether `offset` from the centre lies inside the ellipse with the
    /// radii grown by `grow` (negative shrinks). Collapsed radii contain
    /// nothing.
    fn contains_offset(&self, offset: Vec2, grow: f64) -> bool {
        let rx = self.radius_x + grow;
        let ry = self.radius_y + grow;
        if rx <= f64::EPSILON || ry <= f64::EPSILON {
            return false;
        }
        (offset.x / rx).powi(2) + (offset.y / ry).powi(2) <= 1.0
    }
}

impl ShapeTrait for Ellipse {
    fn id(&self) -> &ObjectId {
        &self.id
    }

    fn bounds(&self) -> Rect {
        Rect::from_center_size(self.center, (self.radius_x * 2.0, self.radius_y * 2.0))
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        let offset = point - self.center;
        let band = tolerance + self.style.stroke_width / 2.0;
        if !self.contains_offset(offset, band) {
            return false;
        }
        // Unfilled ellipses only react on their outline.
        self.style.fill.is_some() || !self.contains_offset(offset, -band)
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }

    fn transform(&mut self, affine: Affine) {
        let [sx, _, _, sy, _, _] = affine.as_coeffs();
        self.center = affine * self.center;
        self.radius_x *= sx.abs();
        self.radius_y *= sy.abs();
    }
}
