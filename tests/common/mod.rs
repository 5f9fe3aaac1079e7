#![allow(dead_code, unused_imports)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from domino_vision for tests
pub use domino_vision::model::{
    Backend, CustomModel, DetectionContext, DetectorModel, ModelLoader, RawDetection,
    ScopedTensor,
};
pub use domino_vision::{
    BoundingBox, DetectedTile, DetectionConfig, DetectionError, DetectionResult,
    DetectionStrategy, RawImage,
};
