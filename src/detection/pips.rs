//! Pip estimation for detected tiles.
//!
//! This is a coarse luminance-transition count, not a blob detector. Manual
//! correction downstream is tuned against its output, so keep the behavior
//! stable when touching it.

use image::{DynamicImage, GenericImageView, GrayImage};
use tracing::debug;

use crate::error::{DetectionError, Result};
use crate::models::{DetectedTile, MAX_PIPS};

/// Gray level separating pip from tile surface
pub const BINARY_THRESHOLD: u8 = 128;
/// Confidence given to a tile whose halves could not be processed
pub const FAILED_TILE_CONFIDENCE: f32 = 0.1;
/// Lowest confidence accepted by [`validate_pip_counts`]
pub const MIN_VALID_CONFIDENCE: f32 = 0.4;
/// Expected pip diameter relative to the shorter side of a half
const PIP_DIAMETER_RATIO: f32 = 0.18;

/// Count estimate for one half of a tile
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfEstimate {
    pub pips: u32,
    pub confidence: f32,
}

/// Estimate pips on both halves of `tile` and fill its pip fields.
///
/// The tile's confidence becomes `min(detection, counting)`. Any failure
/// yields a zero-pip tile with [`FAILED_TILE_CONFIDENCE`] instead of an error.
pub fn count_pips(image: &DynamicImage, tile: DetectedTile) -> DetectedTile {
    match estimate_tile(image, &tile) {
        Ok((left, right)) => {
            let counting = (left.confidence + right.confidence) / 2.0;
            let confidence = tile.confidence.min(counting);
            tile.with_pips(left.pips, right.pips)
                .with_confidence(confidence)
        }
        Err(e) => {
            debug!(tile = %tile.id, error = %e, "Pip counting failed, degrading tile");
            tile.with_pips(0, 0).with_confidence(FAILED_TILE_CONFIDENCE)
        }
    }
}

/// Sequentially count pips on every tile
pub fn count_pips_on_tiles(image: &DynamicImage, tiles: Vec<DetectedTile>) -> Vec<DetectedTile> {
    tiles.into_iter().map(|tile| count_pips(image, tile)).collect()
}

/// Invariant check used by review tooling. Not applied automatically.
pub fn validate_pip_counts(tile: &DetectedTile) -> bool {
    tile.left_pips <= MAX_PIPS
        && tile.right_pips <= MAX_PIPS
        && tile.total_pips == tile.left_pips + tile.right_pips
        && tile.confidence >= MIN_VALID_CONFIDENCE
}

fn estimate_tile(image: &DynamicImage, tile: &DetectedTile) -> Result<(HalfEstimate, HalfEstimate)> {
    let (left, right) = extract_halves(image, tile)?;
    Ok((estimate_half(&left)?, estimate_half(&right)?))
}

/// Crop the tile (clamped to the image) and split it at the horizontal midpoint
pub fn extract_halves(image: &DynamicImage, tile: &DetectedTile) -> Result<(GrayImage, GrayImage)> {
    let (img_w, img_h) = image.dimensions();
    let bbox = &tile.bounding_box;

    let x0 = bbox.x.max(0.0).floor() as u32;
    let y0 = bbox.y.max(0.0).floor() as u32;
    let x1 = ((bbox.x + bbox.width).ceil().max(0.0) as u32).min(img_w);
    let y1 = ((bbox.y + bbox.height).ceil().max(0.0) as u32).min(img_h);

    if x0 >= x1 || y0 >= y1 {
        return Err(DetectionError::PreprocessFailed(format!(
            "tile region ({}, {}) {}x{} lies outside the {}x{} image",
            bbox.x, bbox.y, bbox.width, bbox.height, img_w, img_h
        )));
    }

    let width = x1 - x0;
    let height = y1 - y0;
    if width < 2 {
        return Err(DetectionError::PreprocessFailed(
            "tile region too narrow to split".to_string(),
        ));
    }

    let mid = width / 2;
    let left = image.crop_imm(x0, y0, mid, height).to_luma8();
    let right = image.crop_imm(x0 + mid, y0, width - mid, height).to_luma8();
    Ok((left, right))
}

/// Pip count and confidence for one grayscale half
pub fn estimate_half(half: &GrayImage) -> Result<HalfEstimate> {
    let (width, height) = half.dimensions();
    if width == 0 || height == 0 {
        return Err(DetectionError::PreprocessFailed("empty tile half".to_string()));
    }

    let transitions = count_bright_transitions(half, BINARY_THRESHOLD);
    let pip_diameter = (width.min(height) as f32 * PIP_DIAMETER_RATIO).max(1.0);
    let raw = (transitions as f32 / pip_diameter).round() as u32;

    let mut confidence: f32 = if raw <= MAX_PIPS { 0.7 } else { 0.3 };
    let variance = gray_variance(half);
    if variance > 0.1 {
        confidence += 0.2;
    } else if variance < 0.05 {
        confidence -= 0.2;
    }

    Ok(HalfEstimate {
        pips: raw.min(MAX_PIPS),
        confidence: confidence.clamp(0.0, 1.0),
    })
}

/// Dark-to-bright edges along each row of the binarized image
pub fn count_bright_transitions(gray: &GrayImage, threshold: u8) -> u32 {
    let (width, height) = gray.dimensions();
    let mut transitions = 0;
    for y in 0..height {
        let mut was_bright = gray.get_pixel(0, y)[0] > threshold;
        for x in 1..width {
            let bright = gray.get_pixel(x, y)[0] > threshold;
            if bright && !was_bright {
                transitions += 1;
            }
            was_bright = bright;
        }
    }
    transitions
}

/// Variance of gray levels scaled to `0..=1`
pub fn gray_variance(gray: &GrayImage) -> f32 {
    let count = gray.width() as usize * gray.height() as usize;
    if count == 0 {
        return 0.0;
    }
    let mean = gray.pixels().map(|p| p[0] as f64 / 255.0).sum::<f64>() / count as f64;
    let variance = gray
        .pixels()
        .map(|p| {
            let d = p[0] as f64 / 255.0 - mean;
            d * d
        })
        .sum::<f64>()
        / count as f64;
    variance as f32
}
