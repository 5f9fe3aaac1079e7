//! Model loading, backend selection and tensor lifetime tracking.
//!
//! Everything that is process-wide lives in [`DetectionContext`], which is
//! created once and shared by all strategies.

pub mod backend;
pub mod loader;
pub mod rten_detector;
pub mod tensor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;

pub use backend::Backend;
pub use loader::{LoadStatus, ModelLoader};
pub use tensor::{InputTensor, ScopedTensor, TensorTracker};

use crate::config::DetectionConfig;
use crate::error::Result;

/// File name of the network inside a custom model directory
pub const CUSTOM_MODEL_FILE: &str = "model.rten";
/// File name of the class label list inside a custom model directory
pub const CUSTOM_LABELS_FILE: &str = "labels.txt";

/// One raw box as produced by a detection network, before any filtering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    /// Box edges as fractions of the input tensor size
    pub ymin: f32,
    pub xmin: f32,
    pub ymax: f32,
    pub xmax: f32,
    pub class_id: usize,
    pub score: f32,
}

/// A loaded detection network
pub trait DetectorModel: Send + Sync {
    fn infer(&self, input: &ScopedTensor) -> Result<Vec<RawDetection>>;
}

/// Domain-trained detector plus its label map
pub struct CustomModel {
    pub detector: Box<dyn DetectorModel>,
    /// Label for class id `i + 1` is at index `i`
    pub labels: Vec<String>,
}

impl CustomModel {
    /// Load `model.rten` and `labels.txt` from an asset directory
    pub fn load_dir<P: AsRef<Path>>(dir: P, backend: Backend) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let detector = rten_detector::RtenDetector::load(dir.join(CUSTOM_MODEL_FILE), backend)?;
        let labels_path = dir.join(CUSTOM_LABELS_FILE);
        let labels = std::fs::read_to_string(&labels_path)
            .with_context(|| format!("Failed to read label map {:?}", labels_path))?;
        Ok(Self {
            detector: Box::new(detector),
            labels: parse_labels(&labels),
        })
    }

    pub fn label(&self, class_id: usize) -> Option<&str> {
        class_id
            .checked_sub(1)
            .and_then(|i| self.labels.get(i))
            .map(String::as_str)
    }
}

fn parse_labels(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Process-wide detection state: backend, model handles and tensor tracking
pub struct DetectionContext {
    backend: Backend,
    max_dimension: u32,
    general: ModelLoader<dyn DetectorModel>,
    custom: ModelLoader<CustomModel>,
    tensors: TensorTracker,
}

impl DetectionContext {
    /// Initialize the backend and register the model files from `config`.
    /// Models are not loaded until first use.
    pub fn from_config(config: &DetectionConfig) -> Self {
        let backend = Backend::initialize(config.prefer_accelerated);

        let general_path: PathBuf = config.general_model_path.clone();
        let general = ModelLoader::new("general-detector", move || {
            let detector = rten_detector::RtenDetector::load(&general_path, backend)?;
            Ok(Arc::new(detector) as Arc<dyn DetectorModel>)
        });

        let custom_dir: PathBuf = config.custom_model_dir.clone();
        let custom = ModelLoader::new("custom-detector", move || {
            Ok(Arc::new(CustomModel::load_dir(&custom_dir, backend)?))
        });

        Self::new(backend, config.max_dimension, general, custom)
    }

    /// Build a context from explicit loaders
    pub fn new(
        backend: Backend,
        max_dimension: Option<u32>,
        general: ModelLoader<dyn DetectorModel>,
        custom: ModelLoader<CustomModel>,
    ) -> Self {
        Self {
            backend,
            max_dimension: max_dimension.unwrap_or_else(|| backend.max_dimension()),
            general,
            custom,
            tensors: TensorTracker::new(),
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Longest side after preprocessing, fixed for the lifetime of the context
    pub fn max_dimension(&self) -> u32 {
        self.max_dimension
    }

    pub fn general_loader(&self) -> &ModelLoader<dyn DetectorModel> {
        &self.general
    }

    pub fn custom_loader(&self) -> &ModelLoader<CustomModel> {
        &self.custom
    }

    pub fn tensors(&self) -> &TensorTracker {
        &self.tensors
    }
}

impl std::fmt::Debug for DetectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionContext")
            .field("backend", &self.backend)
            .field("max_dimension", &self.max_dimension)
            .field("general", &self.general)
            .field("custom", &self.custom)
            .field("live_tensors", &self.tensors.live())
            .finish()
    }
}
