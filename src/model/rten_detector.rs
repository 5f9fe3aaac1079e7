use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rten::{Model, RunOptions, ThreadPool};
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;
use tracing::debug;

use super::{Backend, DetectorModel, RawDetection, ScopedTensor};
use crate::error::{DetectionError, Result};

/// Detector backed by an `.rten` model exported from a TF object detection graph.
///
/// The graph takes one `[1, 3, H, W]` input and produces, in order,
/// `detection_boxes` `[1, N, 4]` (`ymin, xmin, ymax, xmax` fractions),
/// `detection_classes` `[1, N]` and `detection_scores` `[1, N]`.
pub struct RtenDetector {
    model: Model,
    /// Sized from the backend: one thread on CPU, all probed threads when accelerated
    pool: Arc<ThreadPool>,
}

impl RtenDetector {
    pub fn load<P: AsRef<Path>>(path: P, backend: Backend) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("model file not found: {}", path.display());
        }
        let model = Model::load_file(path)
            .with_context(|| format!("Failed to load model {:?}", path))?;
        if model.input_ids().is_empty() || model.output_ids().len() < 3 {
            anyhow::bail!(
                "unexpected model signature in {:?}: {} inputs, {} outputs (expected 1 and 3)",
                path,
                model.input_ids().len(),
                model.output_ids().len()
            );
        }
        let threads = backend.inference_threads();
        debug!(backend = backend.name(), threads, "Created inference thread pool");
        Ok(Self {
            model,
            pool: Arc::new(ThreadPool::with_num_threads(threads)),
        })
    }
}

impl DetectorModel for RtenDetector {
    fn infer(&self, input: &ScopedTensor) -> Result<Vec<RawDetection>> {
        let input_id = self.model.input_ids()[0];
        let output_ids = &self.model.output_ids()[..3];

        let mut outputs = self
            .model
            .run(
                vec![(input_id, input.view().into())],
                output_ids,
                Some(RunOptions::default().with_thread_pool(Some(self.pool.clone()))),
            )
            .map_err(|e| DetectionError::InferenceFailed(e.to_string()))?;

        let scores: NdTensor<f32, 2> = take_output(&mut outputs, "detection_scores")?;
        let classes: NdTensor<f32, 2> = take_output(&mut outputs, "detection_classes")?;
        let boxes: NdTensor<f32, 3> = take_output(&mut outputs, "detection_boxes")?;

        parse_detections(&boxes, &classes, &scores)
    }
}

// Outputs are popped from the back: scores, classes, boxes
fn take_output<const N: usize>(
    outputs: &mut Vec<rten::Value>,
    name: &str,
) -> Result<NdTensor<f32, N>> {
    let value = outputs
        .pop()
        .ok_or_else(|| DetectionError::InferenceFailed(format!("missing output {}", name)))?;
    value
        .try_into()
        .map_err(|e| DetectionError::InferenceFailed(format!("unexpected {} tensor: {:?}", name, e)))
}

/// Flatten `[1, N, 4]` boxes and `[1, N]` classes/scores into detections
pub fn parse_detections(
    boxes: &NdTensor<f32, 3>,
    classes: &NdTensor<f32, 2>,
    scores: &NdTensor<f32, 2>,
) -> Result<Vec<RawDetection>> {
    let [batch, count, coords] = boxes.shape();
    if batch == 0
        || classes.shape()[0] == 0
        || scores.shape()[0] == 0
        || coords != 4
        || classes.shape()[1] != count
        || scores.shape()[1] != count
    {
        return Err(DetectionError::InferenceFailed(format!(
            "inconsistent output shapes: boxes {:?}, classes {:?}, scores {:?}",
            boxes.shape(),
            classes.shape(),
            scores.shape()
        )));
    }

    Ok((0..count)
        .map(|i| RawDetection {
            ymin: boxes[[0, i, 0]],
            xmin: boxes[[0, i, 1]],
            ymax: boxes[[0, i, 2]],
            xmax: boxes[[0, i, 3]],
            class_id: classes[[0, i]].max(0.0).round() as usize,
            score: scores[[0, i]],
        })
        .collect())
}
