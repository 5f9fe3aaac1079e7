use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};
use rten_tensor::NdTensor;
use tracing::debug;

use crate::error::{DetectionError, Result};
use crate::model::{ScopedTensor, TensorTracker};
use crate::models::RawImage;

/// Mean luminance the normalization step aims for
pub const TARGET_BRIGHTNESS: f32 = 128.0;
/// Correction factors inside this band leave the image untouched
pub const BRIGHTNESS_TOLERANCE: (f32, f32) = (0.7, 1.3);

/// Model-ready image. Dropping it releases the tensor.
#[derive(Debug)]
pub struct PreprocessedImage {
    pub tensor: ScopedTensor,
    pub original_width: u32,
    pub original_height: u32,
    /// Size of the image held by `tensor`
    pub width: u32,
    pub height: u32,
    /// `width / original_width`; divide model-space coordinates by it
    pub scale_factor: f32,
}

/// Decodes, bounds, normalizes and tensorizes images for the general detector
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    max_dimension: u32,
    tensors: TensorTracker,
}

impl ImagePreprocessor {
    pub fn new(max_dimension: u32, tensors: TensorTracker) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
            tensors,
        }
    }

    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    pub fn preprocess(&self, image: &RawImage) -> Result<PreprocessedImage> {
        let decoded = image.decode()?;
        self.preprocess_decoded(&decoded)
    }

    /// Same as [`Self::preprocess`] for an already decoded image
    pub fn preprocess_decoded(&self, decoded: &DynamicImage) -> Result<PreprocessedImage> {
        let (original_width, original_height) = decoded.dimensions();
        if original_width == 0 || original_height == 0 {
            return Err(DetectionError::PreprocessFailed(format!(
                "image has no pixels ({}x{})",
                original_width, original_height
            )));
        }

        let (width, height, scale_factor) =
            target_dimensions(original_width, original_height, self.max_dimension);

        let mut rgb = decoded.to_rgb8();
        if scale_factor != 1.0 {
            rgb = image::imageops::resize(&rgb, width, height, FilterType::CatmullRom);
        }

        let mean = mean_luminance(&rgb);
        let applied = normalize_lighting(&mut rgb);
        debug!(
            original_width,
            original_height,
            width,
            height,
            scale_factor,
            mean_luminance = mean,
            lighting_factor = applied,
            "Preprocessed image"
        );

        let tensor = self.tensors.track(to_nchw(&rgb));
        Ok(PreprocessedImage {
            tensor,
            original_width,
            original_height,
            width,
            height,
            scale_factor,
        })
    }
}

/// Bounded output size and the scale factor that produced it.
///
/// Images already within `max_dimension` keep their size and a factor of 1.
pub fn target_dimensions(width: u32, height: u32, max_dimension: u32) -> (u32, u32, f32) {
    let longest = width.max(height);
    if longest <= max_dimension {
        return (width, height, 1.0);
    }
    let scale = max_dimension as f32 / longest as f32;
    let scaled = |side: u32| ((side as f32 * scale).round() as u32).max(1);
    (scaled(width), scaled(height), scale)
}

/// Rec.601 luma of an RGB triple
pub fn luminance(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

pub fn mean_luminance(img: &RgbImage) -> f32 {
    let count = img.width() as u64 * img.height() as u64;
    if count == 0 {
        return 0.0;
    }
    let sum: f64 = img
        .pixels()
        .map(|p| luminance(p[0], p[1], p[2]) as f64)
        .sum();
    (sum / count as f64) as f32
}

/// Scale all channels towards [`TARGET_BRIGHTNESS`] when the image is
/// clearly too dark or too bright. Returns the factor applied, if any.
pub fn normalize_lighting(img: &mut RgbImage) -> Option<f32> {
    let mean = mean_luminance(img);
    if mean <= f32::EPSILON {
        return None;
    }
    let factor = TARGET_BRIGHTNESS / mean;
    let (low, high) = BRIGHTNESS_TOLERANCE;
    if (low..=high).contains(&factor) {
        return None;
    }

    for pixel in img.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel = (*channel as f32 * factor).round().clamp(0.0, 255.0) as u8;
        }
    }
    Some(factor)
}

/// `[1, 3, H, W]` tensor with channel values in `0..=1`
pub fn to_nchw(img: &RgbImage) -> NdTensor<f32, 4> {
    let (width, height) = img.dimensions();
    let plane = width as usize * height as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, pixel) in img.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = pixel[c] as f32 / 255.0;
        }
    }
    NdTensor::from_data([1, 3, height as usize, width as usize], data)
}
