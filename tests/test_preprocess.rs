mod common;
use common::*;

use domino_vision::detection::preprocessing::{
    mean_luminance, normalize_lighting, target_dimensions, to_nchw, ImagePreprocessor,
};
use domino_vision::model::TensorTracker;
use image::{Rgb, RgbImage};
use rten_tensor::prelude::*;

#[test]
fn test_target_dimensions_bounds_longest_side() {
    let (w, h, scale) = target_dimensions(2000, 1000, 640);
    assert_eq!((w, h), (640, 320));
    assert!((scale - 0.32).abs() < 1e-6);

    let (w, h, scale) = target_dimensions(300, 1280, 640);
    assert_eq!((w, h), (150, 640));
    assert!((scale - 0.5).abs() < 1e-6);
}

#[test]
fn test_small_images_keep_their_size() {
    assert_eq!(target_dimensions(400, 300, 640), (400, 300, 1.0));
    assert_eq!(target_dimensions(640, 640, 640), (640, 640, 1.0));
}

#[test]
fn test_preprocess_produces_bounded_nchw_tensor() -> anyhow::Result<()> {
    let tracker = TensorTracker::new();
    let preprocessor = ImagePreprocessor::new(640, tracker.clone());
    let raw = raw_image(&plain_image(1280, 960, Rgb([120, 120, 120])));

    let pre = preprocessor.preprocess(&raw)?;
    assert_eq!((pre.original_width, pre.original_height), (1280, 960));
    assert_eq!((pre.width, pre.height), (640, 480));
    assert!((pre.scale_factor - 0.5).abs() < 1e-6);
    assert_eq!(pre.tensor.shape(), [1, 3, 480, 640]);
    assert_eq!(pre.tensor.image_size(), (480, 640));
    assert!(pre.tensor.iter().all(|v| (0.0..=1.0).contains(v)));

    assert_eq!(tracker.live(), 1);
    drop(pre);
    assert_eq!(tracker.live(), 0);
    Ok(())
}

#[test]
fn test_preprocess_rejects_garbage() {
    let tracker = TensorTracker::new();
    let preprocessor = ImagePreprocessor::new(640, tracker.clone());
    let raw = RawImage::from_bytes(b"not an image".to_vec(), 10, 10);

    assert!(matches!(
        preprocessor.preprocess(&raw),
        Err(DetectionError::ImageDecodeFailed(_))
    ));
    assert_eq!(tracker.live(), 0);
}

#[test]
fn test_dark_image_is_brightened() {
    let mut img = RgbImage::from_pixel(20, 20, Rgb([40, 40, 40]));
    let factor = normalize_lighting(&mut img).expect("dark image should be corrected");

    assert!((factor - 3.2).abs() < 0.01);
    assert!((mean_luminance(&img) - 128.0).abs() < 1.5);
}

#[test]
fn test_bright_image_is_darkened() {
    let mut img = RgbImage::from_pixel(20, 20, Rgb([250, 250, 250]));
    assert!(normalize_lighting(&mut img).is_some());
    assert!(mean_luminance(&img) < 140.0);
}

#[test]
fn test_well_lit_image_is_untouched() {
    let mut img = RgbImage::from_pixel(20, 20, Rgb([130, 120, 110]));
    let before = img.clone();
    assert!(normalize_lighting(&mut img).is_none());
    assert_eq!(img, before);
}

#[test]
fn test_black_image_skips_normalization() {
    let mut img = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
    assert!(normalize_lighting(&mut img).is_none());
}

#[test]
fn test_to_nchw_splits_channels() {
    let mut img = RgbImage::from_pixel(2, 1, Rgb([255, 0, 0]));
    img.put_pixel(1, 0, Rgb([0, 0, 255]));
    let tensor = to_nchw(&img);

    assert_eq!(tensor.shape(), [1, 3, 1, 2]);
    assert_eq!(tensor[[0, 0, 0, 0]], 1.0);
    assert_eq!(tensor[[0, 2, 0, 0]], 0.0);
    assert_eq!(tensor[[0, 2, 0, 1]], 1.0);
    assert_eq!(tensor[[0, 1, 0, 1]], 0.0);
}
