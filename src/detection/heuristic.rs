use std::sync::Arc;

use tracing::debug;

use super::annotate::ImageAnnotator;
use super::pips;
use super::preprocessing::ImagePreprocessor;
use super::DetectionStrategy;
use crate::error::Result;
use crate::model::{DetectionContext, RawDetection};
use crate::models::{BoundingBox, DetectedTile, DetectionResult, RawImage};

/// Candidates scoring below this are ignored
pub const MIN_DETECTOR_SCORE: f32 = 0.3;
/// Smallest accepted box side, in detector pixels
pub const MIN_TILE_SIDE: f32 = 20.0;
/// Accepted long/short side ratio; dominoes are roughly 2:1
pub const ASPECT_RANGE: (f32, f32) = (1.5, 2.5);

/// Candidate box in preprocessed-image pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub score: f32,
}

impl Candidate {
    /// Convert a fractional network box to pixels of a `width` x `height` tensor
    pub fn from_raw(raw: &RawDetection, width: u32, height: u32) -> Option<Self> {
        let x = raw.xmin * width as f32;
        let y = raw.ymin * height as f32;
        let w = (raw.xmax - raw.xmin) * width as f32;
        let h = (raw.ymax - raw.ymin) * height as f32;
        BoundingBox::new(x, y, w, h).map(|bbox| Self {
            bbox,
            score: raw.score,
        })
    }
}

/// Whether a candidate has the score, size and shape of a domino
pub fn is_domino_shaped(candidate: &Candidate) -> bool {
    let bbox = &candidate.bbox;
    let aspect = bbox.aspect_ratio();
    candidate.score >= MIN_DETECTOR_SCORE
        && bbox.width >= MIN_TILE_SIDE
        && bbox.height >= MIN_TILE_SIDE
        && aspect >= ASPECT_RANGE.0
        && aspect <= ASPECT_RANGE.1
}

/// Filter candidates and turn survivors into tiles in source-image coordinates
pub fn candidates_to_tiles(candidates: &[Candidate], scale_factor: f32) -> Vec<DetectedTile> {
    candidates
        .iter()
        .filter(|c| is_domino_shaped(c))
        .map(|c| {
            let rotation = if c.bbox.is_portrait() { 90.0 } else { 0.0 };
            let bbox = c.bbox.scaled(1.0 / scale_factor).with_rotation(rotation);
            DetectedTile::new(bbox, c.score)
        })
        .collect()
}

/// Generic object detector plus shape filtering and pip counting
pub struct HeuristicStrategy {
    context: Arc<DetectionContext>,
    preprocessor: ImagePreprocessor,
    annotator: ImageAnnotator,
}

impl HeuristicStrategy {
    pub fn new(context: Arc<DetectionContext>) -> Result<Self> {
        let preprocessor =
            ImagePreprocessor::new(context.max_dimension(), context.tensors().clone());
        Ok(Self {
            context,
            preprocessor,
            annotator: ImageAnnotator::new()?,
        })
    }
}

impl DetectionStrategy for HeuristicStrategy {
    fn detect_and_annotate(&self, image: &RawImage) -> Result<DetectionResult> {
        let detector = self.context.general_loader().load_model()?;

        let decoded = image.decode()?;
        let preprocessed = self.preprocessor.preprocess_decoded(&decoded)?;
        let (width, height, scale_factor) =
            (preprocessed.width, preprocessed.height, preprocessed.scale_factor);

        let raw = detector.infer(&preprocessed.tensor);
        // Release the tensor before anything else, whatever inference returned
        drop(preprocessed);
        let raw = raw?;

        let candidates: Vec<Candidate> = raw
            .iter()
            .filter_map(|r| Candidate::from_raw(r, width, height))
            .collect();
        let tiles = candidates_to_tiles(&candidates, scale_factor);
        debug!(
            raw = raw.len(),
            candidates = candidates.len(),
            tiles = tiles.len(),
            "Filtered detector candidates"
        );

        let tiles = pips::count_pips_on_tiles(&decoded, tiles);
        let total = crate::models::total_score(&tiles);
        let annotated = self
            .annotator
            .annotate_image_with_summary(&decoded, &tiles, total)?;

        Ok(DetectionResult::from_tiles(tiles, annotated))
    }

    fn preload(&self) -> Result<()> {
        self.context.general_loader().load_model().map(|_| ())
    }

    fn name(&self) -> &str {
        "Heuristic Detector"
    }
}
