use std::sync::Arc;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use tracing::debug;

use super::annotate::ImageAnnotator;
use super::preprocessing::to_nchw;
use super::{pips, DetectionStrategy};
use crate::error::Result;
use crate::model::{CustomModel, DetectionContext, RawDetection};
use crate::models::{BoundingBox, DetectedTile, DetectionResult, RawImage, MAX_PIPS};

/// Parse a `"<left>-<right>"` class label into pip counts
pub fn parse_pip_label(label: &str) -> Option<(u32, u32)> {
    let (left, right) = label.trim().split_once('-')?;
    let left: u32 = left.trim().parse().ok()?;
    let right: u32 = right.trim().parse().ok()?;
    if left > MAX_PIPS || right > MAX_PIPS {
        return None;
    }
    Some((left, right))
}

/// Box from fractional `[ymin, xmin, ymax, xmax]` scaled to the image size
pub fn fraction_to_bbox(raw: &RawDetection, image_width: u32, image_height: u32) -> Option<BoundingBox> {
    let x = raw.xmin.clamp(0.0, 1.0) * image_width as f32;
    let y = raw.ymin.clamp(0.0, 1.0) * image_height as f32;
    let w = (raw.xmax.clamp(0.0, 1.0) - raw.xmin.clamp(0.0, 1.0)) * image_width as f32;
    let h = (raw.ymax.clamp(0.0, 1.0) - raw.ymin.clamp(0.0, 1.0)) * image_height as f32;
    let bbox = BoundingBox::new(x, y, w, h)?;
    let rotation = if bbox.is_portrait() { 90.0 } else { 0.0 };
    Some(bbox.with_rotation(rotation))
}

/// Runs the domain-trained model
pub struct CustomModelStrategy {
    context: Arc<DetectionContext>,
    input_size: u32,
    min_score: f32,
    annotator: ImageAnnotator,
}

impl CustomModelStrategy {
    pub fn new(context: Arc<DetectionContext>, input_size: u32, min_score: f32) -> Result<Self> {
        Ok(Self {
            context,
            input_size: input_size.max(1),
            min_score,
            annotator: ImageAnnotator::new()?,
        })
    }

    /// Convert scored model outputs into tiles on the `decoded` image
    pub fn tiles_from_detections(
        &self,
        model: &CustomModel,
        decoded: &DynamicImage,
        detections: &[RawDetection],
    ) -> Vec<DetectedTile> {
        let (width, height) = decoded.dimensions();
        let mut tiles = Vec::new();

        for raw in detections.iter().filter(|r| r.score >= self.min_score) {
            let Some(bbox) = fraction_to_bbox(raw, width, height) else {
                continue;
            };
            let tile = DetectedTile::new(bbox, raw.score);
            let label = model.label(raw.class_id);

            let tile = match label.and_then(parse_pip_label) {
                Some((left, right)) => tile.with_pips(left, right),
                None => {
                    debug!(class_id = raw.class_id, ?label, "Label carries no pips, counting");
                    pips::count_pips(decoded, tile)
                }
            };
            tiles.push(tile);
        }
        tiles
    }
}

impl DetectionStrategy for CustomModelStrategy {
    fn detect_and_annotate(&self, image: &RawImage) -> Result<DetectionResult> {
        let model = self.context.custom_loader().load_model()?;
        let decoded = image.decode()?;

        let resized = image::imageops::resize(
            &decoded.to_rgb8(),
            self.input_size,
            self.input_size,
            FilterType::CatmullRom,
        );
        let tensor = self.context.tensors().track(to_nchw(&resized));
        let detections = model.detector.infer(&tensor);
        drop(tensor);
        let detections = detections?;

        let tiles = self.tiles_from_detections(&model, &decoded, &detections);
        debug!(raw = detections.len(), tiles = tiles.len(), "Custom model detections");

        let total = crate::models::total_score(&tiles);
        let annotated = self
            .annotator
            .annotate_image_with_summary(&decoded, &tiles, total)?;
        Ok(DetectionResult::from_tiles(tiles, annotated))
    }

    fn preload(&self) -> Result<()> {
        self.context.custom_loader().load_model().map(|_| ())
    }

    fn name(&self) -> &str {
        "Custom Model"
    }
}
