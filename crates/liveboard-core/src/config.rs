//! Session configuration.

use crate::history::DEFAULT_MAX_UNDO_STEPS;
use crate::shapes::{SerializableColor, ShapeStyle};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables of a whiteboard session. Every field has a default, so a
/// configuration file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Undo steps kept per client.
    pub max_undo_steps: usize,
    /// Extra hit-test distance around shapes, in canvas units.
    pub hit_tolerance: f64,
    /// Ramer-Douglas-Peucker tolerance for finished freehand strokes.
    pub freehand_tolerance: f64,
    /// Size of a shape placed by a click without drag.
    pub default_shape_size: f64,
    /// Offset applied to each pasted copy.
    pub paste_offset: f64,
    /// Uploaded images are scaled to fit a square of this size.
    pub image_max_dimension: f64,
    pub default_fill: SerializableColor,
    pub default_stroke: SerializableColor,
    pub default_stroke_width: f64,
    pub freehand_stroke_width: f64,
    /// Colour of this participant's cursor as shown to others.
    pub cursor_color: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let accent = SerializableColor::new(0xaa, 0xbb, 0xcc, 0xff);
        Self {
            max_undo_steps: DEFAULT_MAX_UNDO_STEPS,
            hit_tolerance: 4.0,
            freehand_tolerance: 1.0,
            default_shape_size: 100.0,
            paste_offset: 10.0,
            image_max_dimension: 200.0,
            default_fill: accent,
            default_stroke: accent,
            default_stroke_width: 2.0,
            freehand_stroke_width: 5.0,
            cursor_color: "#dc2626".to_string(),
        }
    }
}

impl SessionConfig {
    /// Parse a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&json)?;
        log::debug!("Loaded session config from {}", path.display());
        Ok(config)
    }

    /// Style given to new rectangles, ellipses, triangles, lines and text.
    pub fn shape_style(&self) -> ShapeStyle {
        ShapeStyle {
            stroke: self.default_stroke,
            stroke_width: self.default_stroke_width,
            fill: Some(self.default_fill),
            opacity: 1.0,
        }
    }

    /// Style given to new freehand strokes.
    pub fn freehand_style(&self) -> ShapeStyle {
        ShapeStyle {
            stroke: self.default_stroke,
            stroke_width: self.freehand_stroke_width,
            fill: None,
            opacity: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_undo_steps, 100);
        assert_eq!(config.default_fill.to_hex(), "#aabbcc");
        assert!((config.image_max_dimension - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SessionConfig::from_json(r##"{ "paste_offset": 25.0, "default_fill": "#ff0000" }"##).unwrap();
        assert!((config.paste_offset - 25.0).abs() < f64::EPSILON);
        assert_eq!(config.default_fill, SerializableColor::new(255, 0, 0, 255));
        assert_eq!(config.max_undo_steps, 100);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            SessionConfig::from_json("{ \"hit_tolerance\": \"wide\" }"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_undo_steps": 5 }}"#).unwrap();

        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.max_undo_steps, 5);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_styles() {
        let config = SessionConfig::default();
        assert!(config.shape_style().fill.is_some());
        assert!(config.freehand_style().fill.is_none());
        assert!((config.freehand_style().stroke_width - 5.0).abs() < f64::EPSILON);
    }
}
