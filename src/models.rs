use std::io::Cursor;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::{DynamicImage, ImageFormat, ImageReader};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{DetectionError, Result};

/// Highest pip count on one half of a double-twelve set.
pub const MAX_PIPS: u32 = 12;

/// Encoded pixel payload as handed over by the capture layer.
#[derive(Debug, Clone)]
pub enum ImagePixels {
    /// Encoded image file bytes (PNG, JPEG, ...)
    Encoded(Vec<u8>),
    /// `data:image/...;base64,...` URI
    DataUri(String),
}

/// Input photograph. Owned by the caller and only borrowed during detection.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub pixels: ImagePixels,
    pub width: u32,
    pub height: u32,
    pub captured_at: OffsetDateTime,
}

impl RawImage {
    pub fn from_bytes(bytes: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            pixels: ImagePixels::Encoded(bytes),
            width,
            height,
            captured_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn from_data_uri(uri: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            pixels: ImagePixels::DataUri(uri.into()),
            width,
            height,
            captured_at: OffsetDateTime::now_utc(),
        }
    }

    /// Read an image file, probing its dimensions without a full decode
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            DetectionError::ImageDecodeFailed(format!("cannot read {}: {}", path.display(), e))
        })?;
        let (width, height) = ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|e| DetectionError::ImageDecodeFailed(e.to_string()))?
            .into_dimensions()?;
        Ok(Self::from_bytes(bytes, width, height))
    }

    /// Wrap an in-memory image by encoding it as PNG
    pub fn from_image(img: &DynamicImage) -> Result<Self> {
        let bytes = encode_png(img).map_err(|e| DetectionError::ImageDecodeFailed(e.to_string()))?;
        Ok(Self::from_bytes(bytes, img.width(), img.height()))
    }

    /// Encoded bytes, decoding the base64 body of a data URI if needed
    pub fn encoded_bytes(&self) -> Result<Vec<u8>> {
        match &self.pixels {
            ImagePixels::Encoded(bytes) => Ok(bytes.clone()),
            ImagePixels::DataUri(uri) => BASE64
                .decode(data_uri_payload(uri)?)
                .map_err(|e| DetectionError::ImageDecodeFailed(format!("invalid base64: {}", e))),
        }
    }

    pub fn decode(&self) -> Result<DynamicImage> {
        let bytes = self.encoded_bytes()?;
        Ok(image::load_from_memory(&bytes)?)
    }

    /// Base64 body suitable for an upload, without any data URI prefix
    pub fn to_base64(&self) -> Result<String> {
        match &self.pixels {
            ImagePixels::Encoded(bytes) => Ok(BASE64.encode(bytes)),
            ImagePixels::DataUri(uri) => Ok(data_uri_payload(uri)?.to_string()),
        }
    }
}

fn data_uri_payload(uri: &str) -> Result<&str> {
    match uri.split_once(',') {
        Some((header, payload)) if header.starts_with("data:") => Ok(payload),
        _ if !uri.starts_with("data:") => Ok(uri),
        _ => Err(DetectionError::ImageDecodeFailed("malformed data URI".to_string())),
    }
}

pub(crate) fn encode_png(img: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Box in source-image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub rotation_degrees: f32,
}

impl BoundingBox {
    /// Returns `None` unless both sides are positive.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Option<Self> {
        if width > 0.0 && height > 0.0 {
            Some(Self {
                x,
                y,
                width,
                height,
                rotation_degrees: 0.0,
            })
        } else {
            None
        }
    }

    /// Build from a center point, as reported by the remote API
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Option<Self> {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    pub fn with_rotation(mut self, degrees: f32) -> Self {
        self.rotation_degrees = degrees;
        self
    }

    /// Multiply position and size by `factor`; rotation is unchanged
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            rotation_degrees: self.rotation_degrees,
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        let long = self.width.max(self.height);
        let short = self.width.min(self.height);
        if short <= 0.0 {
            return 0.0;
        }
        long / short
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectedTile {
    pub id: Uuid,
    pub bounding_box: BoundingBox,
    pub left_pips: u32,
    pub right_pips: u32,
    pub total_pips: u32,
    pub confidence: f32,
}

impl DetectedTile {
    /// New tile with zeroed pips
    pub fn new(bounding_box: BoundingBox, confidence: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            bounding_box,
            left_pips: 0,
            right_pips: 0,
            total_pips: 0,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Set both halves, clamping each to `0..=MAX_PIPS`
    pub fn with_pips(mut self, left: u32, right: u32) -> Self {
        self.left_pips = left.min(MAX_PIPS);
        self.right_pips = right.min(MAX_PIPS);
        self.total_pips = self.left_pips + self.right_pips;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }

    /// Only one half was observed (remote API predictions)
    pub fn is_single_half(&self) -> bool {
        self.right_pips == 0
    }
}

/// Outcome of one `detect` call
#[derive(Clone, Serialize)]
pub struct DetectionResult {
    pub tiles: Vec<DetectedTile>,
    pub total_score: u32,
    pub confidence: f32,
    #[serde(skip)]
    pub annotated_image: DynamicImage,
}

impl DetectionResult {
    /// Aggregate score and mean confidence from the tiles
    pub fn from_tiles(tiles: Vec<DetectedTile>, annotated_image: DynamicImage) -> Self {
        let total_score = total_score(&tiles);
        let confidence = if tiles.is_empty() {
            0.0
        } else {
            tiles.iter().map(|t| t.confidence).sum::<f32>() / tiles.len() as f32
        };
        Self {
            tiles,
            total_score,
            confidence,
            annotated_image,
        }
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn annotated_png(&self) -> Result<Vec<u8>> {
        encode_png(&self.annotated_image)
            .map_err(|e| DetectionError::AnnotationFailed(format!("PNG encoding failed: {}", e)))
    }

    pub fn annotated_data_uri(&self) -> Result<String> {
        Ok(format!("data:image/png;base64,{}", BASE64.encode(self.annotated_png()?)))
    }
}

impl std::fmt::Debug for DetectionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionResult")
            .field("tiles", &self.tiles)
            .field("total_score", &self.total_score)
            .field("confidence", &self.confidence)
            .field(
                "annotated_image",
                &(self.annotated_image.width(), self.annotated_image.height()),
            )
            .finish()
    }
}

pub fn total_score(tiles: &[DetectedTile]) -> u32 {
    tiles.iter().map(|t| t.total_pips).sum()
}
