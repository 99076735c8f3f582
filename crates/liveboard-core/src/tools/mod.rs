//! Tool system for the whiteboard.

use crate::shapes::{
    Ellipse, Freehand, Line, ObjectId, Rectangle, Shape, ShapeStyle, Text, Triangle,
};
use kurbo::{Point, Rect, Vec2};
use serde::{Deserialize, Serialize};

/// Content given to text created with the text tool.
pub const DEFAULT_TEXT: &str = "Tap to Type";

/// Available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    #[default]
    Select,
    Rectangle,
    Ellipse,
    Triangle,
    Line,
    Freehand,
    Text,
    /// Picks an image file; placement happens on `ImageSelected`.
    Image,
}

impl ToolKind {
    /// Whether a pointer-down with this tool starts a new shape.
    pub fn creates_shape(&self) -> bool {
        matches!(
            self,
            ToolKind::Rectangle
                | ToolKind::Ellipse
                | ToolKind::Triangle
                | ToolKind::Line
                | ToolKind::Freehand
                | ToolKind::Text
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Select => "select",
            ToolKind::Rectangle => "rectangle",
            ToolKind::Ellipse => "ellipse",
            ToolKind::Triangle => "triangle",
            ToolKind::Line => "line",
            ToolKind::Freehand => "freehand",
            ToolKind::Text => "text",
            ToolKind::Image => "image",
        }
    }
}

/// State of a tool interaction.
#[derive(Debug, Clone, Default)]
pub enum ToolState {
    /// Tool is idle, waiting for interaction.
    #[default]
    Idle,
    /// A shape is being drawn.
    Active {
        start: Point,
        current: Point,
        /// The provisional shape; its id is fixed for the whole gesture.
        preview: Shape,
    },
}

/// Manages the current tool and the shape being drawn with it.
#[derive(Debug, Clone)]
pub struct ToolManager {
    /// Currently selected tool.
    pub current_tool: ToolKind,
    pub state: ToolState,
    /// Style applied to new closed shapes, lines and text.
    pub current_style: ShapeStyle,
    /// Style applied to freehand strokes.
    pub freehand_style: ShapeStyle,
    /// Size of a shape created by a click without drag.
    pub default_size: f64,
    /// Simplification tolerance for finished freehand strokes.
    pub freehand_tolerance: f64,
}

impl Default for ToolManager {
    fn default() -> Self {
        Self {
            current_tool: ToolKind::default(),
            state: ToolState::default(),
            current_style: ShapeStyle::default(),
            freehand_style: ShapeStyle::default(),
            default_size: 100.0,
            freehand_tolerance: 1.0,
        }
    }
}

impl ToolManager {
    /// Create a new tool manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current tool, abandoning any gesture in progress.
    pub fn set_tool(&mut self, tool: ToolKind) {
        self.current_tool = tool;
        self.state = ToolState::Idle;
    }

    /// Begin drawing at `point`. Returns the provisional shape, or `None` if
    /// the current tool does not draw.
    pub fn begin(&mut self, point: Point) -> Option<&Shape> {
        let preview = self.initial_shape(point)?;
        self.state = ToolState::Active {
            start: point,
            current: point,
            preview,
        };
        self.preview_shape()
    }

    /// Extend the provisional shape towards `point`.
    pub fn update(&mut self, point: Point) -> Option<&Shape> {
        let tool = self.current_tool;
        if let ToolState::Active {
            start,
            current,
            preview,
        } = &mut self.state
        {
            if *current != point {
                *current = point;
                match (tool, preview) {
                    (ToolKind::Freehand, Shape::Freehand(freehand)) => freehand.add_point(point),
                    // Text stays where it was placed.
                    (ToolKind::Text, _) => {}
                    (_, preview) => {
                        if let Some(mut reshaped) = shape_between(tool, *start, point) {
                            reshaped.set_id(preview.id().clone());
                            *reshaped.style_mut() = preview.style().clone();
                            *preview = reshaped;
                        }
                    }
                }
            }
        }
        self.preview_shape()
    }

    /// Finish the gesture and hand back the finished shape.
    ///
    /// Freehand strokes with fewer than two points are discarded.
    pub fn end(&mut self) -> Option<Shape> {
        let ToolState::Active { preview, .. } = std::mem::take(&mut self.state) else {
            return None;
        };
        match preview {
            Shape::Freehand(mut freehand) => {
                freehand.simplify(self.freehand_tolerance);
                (freehand.len() >= 2).then_some(Shape::Freehand(freehand))
            }
            other => Some(other),
        }
    }

    /// Cancel the current interaction.
    pub fn cancel(&mut self) -> Option<ObjectId> {
        match std::mem::take(&mut self.state) {
            ToolState::Active { preview, .. } => Some(preview.id().clone()),
            ToolState::Idle => None,
        }
    }

    /// Check if a tool interaction is active.
    pub fn is_active(&self) -> bool {
        matches!(self.state, ToolState::Active { .. })
    }

    /// Get the provisional shape for the current interaction.
    pub fn preview_shape(&self) -> Option<&Shape> {
        match &self.state {
            ToolState::Active { preview, .. } => Some(preview),
            ToolState::Idle => None,
        }
    }

    fn initial_shape(&self, point: Point) -> Option<Shape> {
        let size = self.default_size;
        let mut shape = match self.current_tool {
            ToolKind::Rectangle => Shape::Rectangle(Rectangle::new(point, size, size)),
            ToolKind::Triangle => Shape::Triangle(Triangle::new(point, size, size)),
            ToolKind::Ellipse => Shape::Ellipse(Ellipse::circle(
                point + Vec2::new(size / 2.0, size / 2.0),
                size / 2.0,
            )),
            ToolKind::Line => Shape::Line(Line::new(point, point + Vec2::new(size, size))),
            ToolKind::Freehand => Shape::Freehand(Freehand::from_points(vec![point])),
            ToolKind::Text => Shape::Text(Text::new(point, DEFAULT_TEXT.to_string())),
            ToolKind::Select | ToolKind::Image => return None,
        };
        *shape.style_mut() = match self.current_tool {
            ToolKind::Freehand => self.freehand_style.clone(),
            // Lines and text have no interior.
            ToolKind::Line => ShapeStyle {
                fill: None,
                ..self.current_style.clone()
            },
            _ => self.current_style.clone(),
        };
        Some(shape)
    }
}

/// Shape spanning the drag from `start` to `end`.
fn shape_between(tool: ToolKind, start: Point, end: Point) -> Option<Shape> {
    let shape = match tool {
        ToolKind::Rectangle => Shape::Rectangle(Rectangle::from_corners(start, end)),
        ToolKind::Triangle => Shape::Triangle(Triangle::from_corners(start, end)),
        ToolKind::Ellipse => Shape::Ellipse(Ellipse::from_rect(Rect::from_points(start, end))),
        ToolKind::Line => Shape::Line(Line::new(start, end)),
        _ => return None,
    };
    Some(shape)
}
