use ab_glyph::{FontRef, PxScale};
use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::error::{DetectionError, Result};
use crate::models::DetectedTile;

static LABEL_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans-Bold.ttf");

/// Height of the summary band placed above the annotated image
pub const HEADER_HEIGHT: u32 = 60;
const BOX_THICKNESS: u32 = 3;
const LABEL_PADDING: u32 = 4;

const TILE_COLOR: Rgba<u8> = Rgba([0, 200, 83, 255]);
const HALF_COLOR: Rgba<u8> = Rgba([255, 145, 0, 255]);
const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const HEADER_COLOR: Rgba<u8> = Rgba([33, 33, 33, 255]);

/// Tile label: the numeral alone for single halves, `left|right (total)` otherwise
pub fn tile_label(tile: &DetectedTile) -> String {
    if tile.right_pips == 0 {
        tile.left_pips.to_string()
    } else {
        format!("{}|{} ({})", tile.left_pips, tile.right_pips, tile.total_pips)
    }
}

pub fn summary_label(total_score: u32, tile_count: usize) -> String {
    format!("Total Score: {} ({} tiles)", total_score, tile_count)
}

/// Draws boxes, labels and the score header onto copies of the source image
pub struct ImageAnnotator {
    font: FontRef<'static>,
}

impl ImageAnnotator {
    pub fn new() -> Result<Self> {
        let font = FontRef::try_from_slice(LABEL_FONT)
            .map_err(|e| DetectionError::AnnotationFailed(format!("invalid label font: {}", e)))?;
        Ok(Self { font })
    }

    /// Copy of `image` with one box and label per tile
    pub fn annotate_image(&self, image: &DynamicImage, tiles: &[DetectedTile]) -> Result<DynamicImage> {
        let mut canvas = image.to_rgba8();
        if canvas.width() == 0 || canvas.height() == 0 {
            return Err(DetectionError::AnnotationFailed("source image is empty".to_string()));
        }
        let scale = label_scale(canvas.width(), canvas.height());

        for tile in tiles {
            let color = if tile.is_single_half() { HALF_COLOR } else { TILE_COLOR };
            let Some(rect) = clamp_rect(&canvas, tile) else {
                continue;
            };
            draw_outline(&mut canvas, rect, color);
            self.draw_label(&mut canvas, rect, &tile_label(tile), scale, color);
        }

        Ok(DynamicImage::ImageRgba8(canvas))
    }

    /// Per-tile annotation beneath a header band showing the total score
    pub fn annotate_image_with_summary(
        &self,
        image: &DynamicImage,
        tiles: &[DetectedTile],
        total_score: u32,
    ) -> Result<DynamicImage> {
        let annotated = self.annotate_image(image, tiles)?.to_rgba8();
        let (width, height) = annotated.dimensions();

        let mut canvas = RgbaImage::from_pixel(width, height + HEADER_HEIGHT, HEADER_COLOR);
        image::imageops::overlay(&mut canvas, &annotated, 0, HEADER_HEIGHT as i64);

        let text = summary_label(total_score, tiles.len());
        let mut scale = PxScale::from(28.0);
        let (mut text_w, mut text_h) = text_size(scale, &self.font, &text);
        // Narrow images get a smaller header font rather than clipped text
        if text_w + 2 * LABEL_PADDING > width && text_w > 0 {
            let shrink = (width.saturating_sub(2 * LABEL_PADDING)) as f32 / text_w as f32;
            scale = PxScale::from((28.0 * shrink).max(8.0));
            (text_w, text_h) = text_size(scale, &self.font, &text);
        }
        let x = (width as i32 - text_w as i32) / 2;
        let y = (HEADER_HEIGHT as i32 - text_h as i32) / 2;
        draw_text_mut(&mut canvas, TEXT_COLOR, x.max(0), y.max(0), scale, &self.font, &text);

        Ok(DynamicImage::ImageRgba8(canvas))
    }

    fn draw_label(&self, canvas: &mut RgbaImage, rect: Rect, text: &str, scale: PxScale, color: Rgba<u8>) {
        let (text_w, text_h) = text_size(scale, &self.font, text);
        let bg_w = text_w + 2 * LABEL_PADDING;
        let bg_h = text_h + 2 * LABEL_PADDING;

        let center_x = rect.left() + rect.width() as i32 / 2;
        let max_x = (canvas.width() as i32 - bg_w as i32).max(0);
        let bg_x = (center_x - bg_w as i32 / 2).clamp(0, max_x);
        let bg_y = (rect.top() - bg_h as i32).max(0);

        draw_filled_rect_mut(canvas, Rect::at(bg_x, bg_y).of_size(bg_w, bg_h), color);
        draw_text_mut(
            canvas,
            TEXT_COLOR,
            bg_x + LABEL_PADDING as i32,
            bg_y + LABEL_PADDING as i32,
            scale,
            &self.font,
            text,
        );
    }
}

impl std::fmt::Debug for ImageAnnotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageAnnotator").finish_non_exhaustive()
    }
}

fn label_scale(width: u32, height: u32) -> PxScale {
    PxScale::from((width.max(height) as f32 / 40.0).clamp(14.0, 48.0))
}

/// Tile box in canvas pixels, or `None` when it falls entirely outside
fn clamp_rect(canvas: &RgbaImage, tile: &DetectedTile) -> Option<Rect> {
    let bbox = &tile.bounding_box;
    let x0 = bbox.x.round().max(0.0) as i64;
    let y0 = bbox.y.round().max(0.0) as i64;
    let x1 = ((bbox.x + bbox.width).round() as i64).min(canvas.width() as i64);
    let y1 = ((bbox.y + bbox.height).round() as i64).min(canvas.height() as i64);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some(Rect::at(x0 as i32, y0 as i32).of_size((x1 - x0) as u32, (y1 - y0) as u32))
}

fn draw_outline(canvas: &mut RgbaImage, rect: Rect, color: Rgba<u8>) {
    for inset in 0..BOX_THICKNESS {
        let w = rect.width().saturating_sub(2 * inset);
        let h = rect.height().saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        let inner = Rect::at(rect.left() + inset as i32, rect.top() + inset as i32).of_size(w, h);
        draw_hollow_rect_mut(canvas, inner, color);
    }
}
