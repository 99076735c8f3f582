//! Uploaded pictures.
//!
//! The pixels travel inside the record as a `data:` URL, so any participant
//! can render an image without a side channel.

use super::{ObjectId, ShapeStyle, ShapeTrait};
use base64::{Engine, engine::general_purpose::STANDARD};
use kurbo::{Affine, Point, Rect, Size};
use serde::{Deserialize, Serialize};

/// Raster encodings accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    #[serde(rename = "webp")]
    WebP,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::WebP => "image/webp",
        }
    }

    /// Recognise an upload by its file signature. `None` for anything else,
    /// whatever the file name claims.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x89, b'P', b'N', b'G', ..] => Some(ImageFormat::Png),
            [0xFF, 0xD8, 0xFF, ..] => Some(ImageFormat::Jpeg),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => {
                Some(ImageFormat::WebP)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(rename = "objectId")]
    pub(crate) id: ObjectId,
    /// Top-left corner.
    pub position: Point,
    pub width: f64,
    pub height: f64,
    /// Pixel size of the upload, kept for aspect-correct resizing.
    pub source_width: u32,
    pub source_height: u32,
    pub format: ImageFormat,
    pub src: String,
    #[serde(flatten)]
    pub style: ShapeStyle,
}

impl Image {
    /// An image at `position` shown at its pixel size.
    pub fn new(
        position: Point,
        bytes: &[u8],
        source_width: u32,
        source_height: u32,
        format: ImageFormat,
    ) -> Self {
        Self {
            id: ObjectId::generate(),
            position,
            width: f64::from(source_width),
            height: f64::from(source_height),
            source_width,
            source_height,
            format,
            src: format!("data:{};base64,{}", format.mime_type(), STANDARD.encode(bytes)),
            style: ShapeStyle::default(),
        }
    }

    /// Shrink or grow to the largest size inside `max_width` x `max_height`
    /// with the upload's aspect ratio. Images of unknown pixel size keep
    /// their current size.
    pub fn fit_within(mut self, max_width: f64, max_height: f64) -> Self {
        if self.source_width == 0 || self.source_height == 0 {
            return self;
        }
        let source = Size::new(f64::from(self.source_width), f64::from(self.source_height));
        let factor = (max_width / source.width).min(max_height / source.height);
        self.width = source.width * factor;
        self.height = source.height * factor;
        self
    }

    fn rect(&self) -> Rect {
        Rect::from_origin_size(self.position, (self.width, self.height))
    }
}

impl ShapeTrait for Image {
    fn id(&self) -> &ObjectId {
        &self.id
    }

    fn bounds(&self) -> Rect {
        self.rect()
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        self.rect().inflate(tolerance, tolerance).contains(point)
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }

    fn transform(&mut self, affine: Affine) {
        let [sx, _, _, sy, _, _] = affine.as_coeffs();
        self.position = affine * self.position;
        self.width *= sx.abs();
        self.height *= sy.abs();
    }
}
