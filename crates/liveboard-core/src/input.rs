//! Input events delivered to the canvas adapter.
//!
//! The embedding UI translates its native pointer, keyboard and panel events
//! into [`CanvasEvent`]s and feeds them through a single dispatcher.

use crate::shapes::{FontWeight, SerializableColor};
use crate::tools::ToolKind;
use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Modifier keys state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Self = Self {
        shift: false,
        ctrl: false,
        alt: false,
        meta: false,
    };

    /// Ctrl on most platforms, Cmd on macOS.
    pub fn command(&self) -> bool {
        self.ctrl || self.meta
    }

    pub fn ctrl() -> Self {
        Self {
            ctrl: true,
            ..Self::NONE
        }
    }

    pub fn ctrl_shift() -> Self {
        Self {
            ctrl: true,
            shift: true,
            ..Self::NONE
        }
    }
}

/// Keys the adapter reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Key {
    Delete,
    Backspace,
    Escape,
    /// A printable character, lowercased.
    Character(char),
}

/// An edit made in the attribute panel for the selected shape.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeEdit {
    Width(f64),
    Height(f64),
    FontSize(f64),
    FontFamily(String),
    FontWeight(FontWeight),
    Fill(Option<SerializableColor>),
    Stroke(SerializableColor),
    StrokeWidth(f64),
    Opacity(f64),
}

/// An image file chosen by the user. Pixel dimensions come from the UI's
/// decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Top-left corner; `None` places it at the canvas origin.
    pub position: Option<Point>,
}

/// Every input the canvas adapter understands.
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasEvent {
    PointerDown(Point),
    PointerMove(Point),
    /// Pointer released; `inside` is false when released off the canvas.
    PointerUp { position: Point, inside: bool },
    /// Pointer left the canvas area.
    PointerLeft,
    ToolSelected(ToolKind),
    DeleteSelected,
    /// Clear the whole board.
    Reset,
    Key { key: Key, modifiers: Modifiers },
    /// Live scaling through selection handles.
    ScaleSelected { sx: f64, sy: f64 },
    /// The rendering engine finished modifying the selection.
    ModificationEnded,
    AttributeEdited(AttributeEdit),
    /// Replace the content of the selected text shape.
    TextEdited(String),
    ImageSelected(ImageUpload),
    Undo,
    Redo,
    ChatMessage(Option<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_modifier() {
        assert!(Modifiers::ctrl().command());
        assert!(
            Modifiers {
                meta: true,
                ..Modifiers::NONE
            }
            .command()
        );
        assert!(!Modifiers::default().command());
    }
}
