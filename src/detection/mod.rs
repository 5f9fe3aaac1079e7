pub mod annotate;
pub mod custom;
pub mod heuristic;
pub mod pips;
pub mod preprocessing;
pub mod remote;

use std::sync::Arc;

use crate::config::{DetectionConfig, StrategyKind};
use crate::error::Result;
use crate::model::DetectionContext;
use crate::models::{DetectionResult, RawImage};

pub use annotate::ImageAnnotator;
pub use custom::CustomModelStrategy;
pub use heuristic::HeuristicStrategy;
pub use preprocessing::{ImagePreprocessor, PreprocessedImage};
pub use remote::RemoteApiStrategy;

/// Trait implemented by every detection backend
pub trait DetectionStrategy: Send + Sync {
    /// Find tiles, count pips and render the annotated image
    fn detect_and_annotate(&self, image: &RawImage) -> Result<DetectionResult>;

    /// Load whatever the strategy needs ahead of the first detection
    fn preload(&self) -> Result<()>;

    /// Human-readable name (used in logs)
    fn name(&self) -> &str;
}

/// Build the strategy selected by `config`
pub fn build_strategy(
    config: &DetectionConfig,
    context: Arc<DetectionContext>,
) -> Result<Arc<dyn DetectionStrategy>> {
    let strategy: Arc<dyn DetectionStrategy> = match config.strategy_kind() {
        StrategyKind::Heuristic => Arc::new(HeuristicStrategy::new(context)?),
        StrategyKind::CustomModel => Arc::new(CustomModelStrategy::new(
            context,
            config.custom_input_size,
            config.custom_min_score,
        )?),
        StrategyKind::RemoteApi => Arc::new(RemoteApiStrategy::new(config.remote.clone())?),
    };
    Ok(strategy)
}
