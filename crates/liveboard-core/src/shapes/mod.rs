//! Shape definitions for the whiteboard.
//!
//! Every shape serializes to a flat, self-describing record:
//! `{ "type": <tag>, "objectId": <id>, ...fields }`. The serde layout here *is*
//! the wire layout; see [`crate::codec`] for the checked entry points.

mod ellipse;
mod freehand;
mod image;
mod line;
mod rectangle;
mod text;
mod triangle;

pub use ellipse::Ellipse;
pub use freehand::Freehand;
pub use image::{Image, ImageFormat};
pub use line::Line;
pub use rectangle::Rectangle;
pub use text::{FontWeight, Text};
pub use triangle::Triangle;

use kurbo::{Affine, Point, Rect, Vec2};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a shape within a document.
///
/// Generated by the creator as a UUID, but any string written by another
/// client is accepted and round-tripped verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Serializable color representation (RGBA8), stored as `#rrggbb` / `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (the leading `#` is optional).
    pub fn from_hex(input: &str) -> Option<Self> {
        let hex = input.trim().trim_start_matches('#');
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            3 => {
                let mut it = hex.chars().map(|c| c.to_digit(16).map(|d| (d * 17) as u8));
                Some(Self::new(it.next()??, it.next()??, it.next()??, 255))
            }
            6 | 8 if hex.is_ascii() => {
                let a = if hex.len() == 8 { channel(&hex[6..8])? } else { 255 };
                Some(Self::new(
                    channel(&hex[0..2])?,
                    channel(&hex[2..4])?,
                    channel(&hex[4..6])?,
                    a,
                ))
            }
            _ => None,
        }
    }

    /// Format as `#rrggbb`, or `#rrggbbaa` when not fully opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl TryFrom<String> for SerializableColor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value).ok_or_else(|| format!("invalid color: {value}"))
    }
}

impl From<SerializableColor> for String {
    fn from(color: SerializableColor) -> Self {
        color.to_hex()
    }
}

/// Style properties for shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeStyle {
    /// Stroke color.
    #[serde(default = "SerializableColor::black")]
    pub stroke: SerializableColor,
    /// Stroke width.
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f64,
    /// Fill color (None = no fill).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<SerializableColor>,
    /// Overall opacity (0.0 = fully transparent, 1.0 = fully opaque).
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

fn default_stroke_width() -> f64 {
    2.0
}

fn default_opacity() -> f64 {
    1.0
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self {
            stroke: SerializableColor::black(),
            stroke_width: default_stroke_width(),
            fill: None,
            opacity: default_opacity(),
        }
    }
}

/// Distance from a point to a line segment (a→b).
pub fn point_to_segment_dist(point: Point, a: Point, b: Point) -> f64 {
    let seg = Vec2::new(b.x - a.x, b.y - a.y);
    let pv = Vec2::new(point.x - a.x, point.y - a.y);
    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return pv.hypot();
    }
    let t = (pv.dot(seg) / len_sq).clamp(0.0, 1.0);
    let proj = Point::new(a.x + t * seg.x, a.y + t * seg.y);
    ((point.x - proj.x).powi(2) + (point.y - proj.y).powi(2)).sqrt()
}

/// Minimum distance from a point to a polyline (sequence of connected segments).
pub fn point_to_polyline_dist(point: Point, points: &[Point]) -> f64 {
    match points {
        [] => f64::INFINITY,
        [only] => point.distance(*only),
        _ => points
            .windows(2)
            .map(|w| point_to_segment_dist(point, w[0], w[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Common trait for all shapes.
pub trait ShapeTrait {
    /// Get the object identifier.
    fn id(&self) -> &ObjectId;

    /// Get the bounding box in world coordinates.
    fn bounds(&self) -> Rect;

    /// Check if a point (in world coordinates) hits this shape.
    fn hit_test(&self, point: Point, tolerance: f64) -> bool;

    /// Get the style.
    fn style(&self) -> &ShapeStyle;

    /// Get mutable style.
    fn style_mut(&mut self) -> &mut ShapeStyle;

    /// Apply a transform to this shape.
    fn transform(&mut self, affine: Affine);
}

/// Enum wrapper for all shape types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Shape {
    Rectangle(Rectangle),
    Ellipse(Ellipse),
    Triangle(Triangle),
    Line(Line),
    Freehand(Freehand),
    Text(Text),
    Image(Image),
}

/// Type tags understood by the codec, in declaration order.
pub const SHAPE_TYPES: &[&str] = &[
    "rectangle",
    "ellipse",
    "triangle",
    "line",
    "freehand",
    "text",
    "image",
];

macro_rules! each_shape {
    ($self:expr, $s:ident => $body:expr) => {
        match $self {
            Shape::Rectangle($s) => $body,
            Shape::Ellipse($s) => $body,
            Shape::Triangle($s) => $body,
            Shape::Line($s) => $body,
            Shape::Freehand($s) => $body,
            Shape::Text($s) => $body,
            Shape::Image($s) => $body,
        }
    };
}

impl Shape {
    pub fn id(&self) -> &ObjectId {
        each_shape!(self, s => s.id())
    }

    /// The wire type tag for this shape.
    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Rectangle(_) => "rectangle",
            Shape::Ellipse(_) => "ellipse",
            Shape::Triangle(_) => "triangle",
            Shape::Line(_) => "line",
            Shape::Freehand(_) => "freehand",
            Shape::Text(_) => "text",
            Shape::Image(_) => "image",
        }
    }

    pub fn bounds(&self) -> Rect {
        each_shape!(self, s => s.bounds())
    }

    pub fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        each_shape!(self, s => s.hit_test(point, tolerance))
    }

    pub fn style(&self) -> &ShapeStyle {
        each_shape!(self, s => s.style())
    }

    pub fn style_mut(&mut self) -> &mut ShapeStyle {
        each_shape!(self, s => s.style_mut())
    }

    pub fn transform(&mut self, affine: Affine) {
        each_shape!(self, s => s.transform(affine))
    }

    /// Move the shape by a delta.
    pub fn translate(&mut self, delta: Vec2) {
        self.transform(Affine::translate(delta));
    }

    /// Scale the shape about the top-left corner of its bounds.
    pub fn scale(&mut self, sx: f64, sy: f64) {
        let origin = self.bounds().origin().to_vec2();
        let affine = Affine::translate(origin)
            * Affine::scale_non_uniform(sx, sy)
            * Affine::translate(-origin);
        self.transform(affine);
    }

    /// Resize to the given bounding-box dimensions, keeping the top-left corner.
    /// Degenerate axes (zero extent) are left untouched.
    pub fn resize(&mut self, width: Option<f64>, height: Option<f64>) {
        let bounds = self.bounds();
        let factor = |target: Option<f64>, current: f64| match target {
            Some(t) if current > f64::EPSILON && t > 0.0 => t / current,
            _ => 1.0,
        };
        let sx = factor(width, bounds.width());
        let sy = factor(height, bounds.height());
        if (sx - 1.0).abs() > f64::EPSILON || (sy - 1.0).abs() > f64::EPSILON {
            self.scale(sx, sy);
        }
    }

    /// Give the shape a fresh identifier (used when pasting copies).
    pub fn regenerate_id(&mut self) {
        self.set_id(ObjectId::generate());
    }

    pub(crate) fn set_id(&mut self, id: ObjectId) {
        each_shape!(self, s => s.id = id)
    }

    /// Get the text if this shape is a text.
    pub fn as_text(&self) -> Option<&Text> {
        match self {
            Shape::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut Text> {
        match self {
            Shape::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Get the image if this shape is an image.
    pub fn as_image(&self) -> Option<&Image> {
        match self {
            Shape::Image(img) => Some(img),
            _ => None,
        }
    }
}
