mod common;
use common::*;

use domino_vision::detection::pips::{
    count_bright_transitions, count_pips, count_pips_on_tiles, estimate_half, extract_halves,
    gray_variance, validate_pip_counts, BINARY_THRESHOLD, FAILED_TILE_CONFIDENCE,
};
use domino_vision::models::MAX_PIPS;
use image::{GrayImage, Luma};

fn photo_tile(confidence: f32) -> DetectedTile {
    let (x, y, w, h) = TILE_RECT;
    DetectedTile::new(
        BoundingBox::new(x as f32, y as f32, w as f32, h as f32).unwrap(),
        confidence,
    )
}

fn checkerboard(size: u32) -> GrayImage {
    GrayImage::from_fn(size, size, |x, y| {
        if (x + y) % 2 == 0 { Luma([0]) } else { Luma([255]) }
    })
}

#[test]
fn test_transitions_count_dark_to_bright_edges() {
    let row = GrayImage::from_fn(10, 1, |x, _| if x % 2 == 0 { Luma([0]) } else { Luma([255]) });
    assert_eq!(count_bright_transitions(&row, BINARY_THRESHOLD), 5);

    let uniform = GrayImage::from_pixel(10, 10, Luma([255]));
    assert_eq!(count_bright_transitions(&uniform, BINARY_THRESHOLD), 0);
}

#[test]
fn test_gray_variance() {
    assert!(gray_variance(&GrayImage::from_pixel(4, 4, Luma([200]))) < 1e-9);
    assert!(gray_variance(&GrayImage::from_pixel(64, 64, Luma([237]))) < 1e-9);
    assert!((gray_variance(&checkerboard(4)) - 0.25).abs() < 1e-6);
}

#[test]
fn test_uniform_half_has_no_pips_and_low_confidence() -> anyhow::Result<()> {
    let estimate = estimate_half(&GrayImage::from_pixel(40, 40, Luma([240])))?;
    assert_eq!(estimate.pips, 0);
    assert!((estimate.confidence - 0.5).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_implausible_count_is_clamped() -> anyhow::Result<()> {
    let estimate = estimate_half(&checkerboard(20))?;
    assert_eq!(estimate.pips, MAX_PIPS);
    assert!((estimate.confidence - 0.5).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_halves_split_at_midpoint() -> anyhow::Result<()> {
    let (left, right) = extract_halves(&domino_photo(), &photo_tile(0.9))?;
    assert_eq!(left.dimensions(), (80, 80));
    assert_eq!(right.dimensions(), (80, 80));
    Ok(())
}

#[test]
fn test_counted_tile_keeps_invariants() {
    let tile = count_pips(&domino_photo(), photo_tile(0.9));

    assert!(tile.left_pips <= MAX_PIPS && tile.right_pips <= MAX_PIPS);
    assert_eq!(tile.total_pips, tile.left_pips + tile.right_pips);
    assert!(tile.total_pips > 0);
    assert!(tile.confidence <= 0.9);
    assert!(tile.confidence > FAILED_TILE_CONFIDENCE);
}

#[test]
fn test_confidence_is_min_of_detection_and_counting() {
    let blank = plain_image(200, 200, TILE_FACE);
    let tile = DetectedTile::new(BoundingBox::new(10.0, 10.0, 100.0, 50.0).unwrap(), 0.3);
    let counted = count_pips(&blank, tile);

    // Counting confidence on a blank face is 0.5, detection was lower
    assert_eq!(counted.total_pips, 0);
    assert!((counted.confidence - 0.3).abs() < 1e-6);
}

#[test]
fn test_tile_outside_image_degrades_instead_of_failing() {
    let tile = DetectedTile::new(BoundingBox::new(1000.0, 1000.0, 100.0, 50.0).unwrap(), 0.95);
    let counted = count_pips(&domino_photo(), tile.clone());

    assert_eq!(counted.id, tile.id);
    assert_eq!(counted.total_pips, 0);
    assert_eq!(counted.confidence, FAILED_TILE_CONFIDENCE);
}

#[test]
fn test_tiles_are_counted_in_order() {
    let photo = domino_photo();
    let tiles = vec![
        photo_tile(0.9),
        DetectedTile::new(BoundingBox::new(900.0, 0.0, 60.0, 30.0).unwrap(), 0.8),
    ];
    let ids: Vec<_> = tiles.iter().map(|t| t.id).collect();

    let counted = count_pips_on_tiles(&photo, tiles);
    assert_eq!(counted.iter().map(|t| t.id).collect::<Vec<_>>(), ids);
    assert_eq!(counted[1].confidence, FAILED_TILE_CONFIDENCE);
}

#[test]
fn test_validate_pip_counts() {
    let good = photo_tile(0.9).with_pips(3, 4);
    assert!(validate_pip_counts(&good));

    let unsure = photo_tile(0.9).with_pips(3, 4).with_confidence(0.3);
    assert!(!validate_pip_counts(&unsure));

    let mut tampered = photo_tile(0.9).with_pips(3, 4);
    tampered.total_pips = 9;
    assert!(!validate_pip_counts(&tampered));
}
