//! Text shape.

use super::{ObjectId, ShapeStyle, ShapeTrait};
use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

/// Default font family for new text.
pub const DEFAULT_FONT_FAMILY: &str = "Helvetica";
/// Default font size in pixels.
pub const DEFAULT_FONT_SIZE: f64 = 36.0;

/// Font weight options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    Light,
    #[default]
    Regular,
    Bold,
}

impl FontWeight {
    /// Get display name for UI.
    pub fn display_name(&self) -> &'static str {
        match self {
            FontWeight::Light => "Light",
            FontWeight::Regular => "Regular",
            FontWeight::Bold => "Bold",
        }
    }

    /// Get all available font weights.
    pub fn all() -> &'static [FontWeight] {
        &[FontWeight::Light, FontWeight::Regular, FontWeight::Bold]
    }

    fn char_width_factor(self) -> f64 {
        match self {
            FontWeight::Light => 0.50,
            FontWeight::Regular => 0.55,
            FontWeight::Bold => 0.60,
        }
    }
}

/// A text shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Text {
    #[serde(rename = "objectId")]
    pub(crate) id: ObjectId,
    /// Position (top-left corner of text bounding box).
    pub position: Point,
    /// The text content.
    pub content: String,
    /// Font size in pixels.
    pub font_size: f64,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default)]
    pub font_weight: FontWeight,
    #[serde(default)]
    pub angle: f64,
    #[serde(flatten)]
    pub style: ShapeStyle,
}

fn default_font_family() -> String {
    DEFAULT_FONT_FAMILY.to_string()
}

impl Text {
    /// Create a new text shape.
    pub fn new(position: Point, content: String) -> Self {
        Self {
            id: ObjectId::generate(),
            position,
            content,
            font_size: DEFAULT_FONT_SIZE,
            font_family: default_font_family(),
            font_weight: FontWeight::default(),
            angle: 0.0,
            style: ShapeStyle::default(),
        }
    }

    /// Approximate rendered width (the renderer is external, so no real layout).
    fn approximate_width(&self) -> f64 {
        let widest = self
            .content
            .lines()
            .map(|line| line.chars().count())
            .max()
            .unwrap_or(0);
        widest as f64 * self.font_size * self.font_weight.char_width_factor()
    }

    fn approximate_height(&self) -> f64 {
        let mut line_count = self.content.lines().count().max(1);
        if self.content.ends_with('\n') {
            line_count += 1;
        }
        line_count as f64 * self.font_size * 1.2
    }
}

impl ShapeTrait for Text {
    fn id(&self) -> &ObjectId {
        &self.id
    }

    fn bounds(&self) -> Rect {
        Rect::new(
            self.position.x,
            self.position.y,
            self.position.x + self.approximate_width().max(20.0),
            self.position.y + self.approximate_height(),
        )
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        self.bounds().inflate(tolerance, tolerance).contains(point)
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }

    fn transform(&mut self, affine: Affine) {
        self.position = affine * self.position;
        // Text scales with the vertical factor only; width follows content.
        let scale = affine.as_coeffs();
        self.font_size *= scale[3].abs();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_defaults() {
        let text = Text::new(Point::new(5.0, 5.0), "Tap to Type".to_string());
        assert_eq!(text.font_family, "Helvetica");
        assert_eq!(text.font_weight, FontWeight::Regular);
        assert!((text.font_size - 36.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bounds_grow_with_lines() {
        let one = Text::new(Point::ZERO, "abc".to_string());
        let two = Text::new(Point::ZERO, "abc\ndef".to_string());
        assert!(two.bounds().height() > one.bounds().height());
        assert!((one.bounds().width() - two.bounds().width()).abs() < f64::EPSILON);
    }

    #[test]
    fn test_scale_font() {
        let mut text = Text::new(Point::ZERO, "x".to_string());
        text.transform(Affine::scale_non_uniform(1.0, 2.0));
        assert!((text.font_size - 72.0).abs() < f64::EPSILON);
    }
}
