pub mod config;
pub mod detection;
pub mod error;
pub mod model;
pub mod models;
pub mod pipeline;
pub mod worker;

pub use config::{DetectionConfig, RemoteApiConfig, StrategyKind, WorkerConfig};
pub use detection::DetectionStrategy;
pub use error::{DetectionError, Result};
pub use models::{BoundingBox, DetectedTile, DetectionResult, RawImage};
pub use pipeline::DetectionPipeline;
pub use worker::DetectionWorkerService;
