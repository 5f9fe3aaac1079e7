use std::sync::Arc;

use tracing::{info, warn};

use crate::config::DetectionConfig;
use crate::detection::{build_strategy, DetectionStrategy};
use crate::error::{DetectionError, Result};
use crate::model::DetectionContext;
use crate::models::{DetectionResult, RawImage};
use crate::worker::DetectionWorkerService;

/// Entry point for detections.
///
/// The strategy is chosen once, at construction, from [`DetectionConfig`].
/// Async detections go through the background worker when it is enabled and
/// running, and through the blocking pool otherwise.
pub struct DetectionPipeline {
    strategy: Arc<dyn DetectionStrategy>,
    worker: DetectionWorkerService,
}

impl DetectionPipeline {
    /// Build the configured strategy and start the worker if enabled.
    ///
    /// Models are not loaded here; call [`preload`](Self::preload) or let the
    /// first detection load them.
    pub fn new(config: DetectionConfig) -> Result<Self> {
        let context = Arc::new(DetectionContext::from_config(&config));
        info!(
            backend = context.backend().name(),
            max_dimension = context.max_dimension(),
            strategy = ?config.strategy_kind(),
            "Initializing detection pipeline"
        );
        let strategy = build_strategy(&config, context)?;
        Ok(Self::with_strategy(strategy, &config))
    }

    /// Wrap an already built strategy
    pub fn with_strategy(strategy: Arc<dyn DetectionStrategy>, config: &DetectionConfig) -> Self {
        let worker = DetectionWorkerService::new(strategy.clone(), config.worker.timeout);
        if config.worker.enabled {
            if let Err(e) = worker.init() {
                warn!(error = %e, "Background worker unavailable, detections run directly");
            }
        }
        Self { strategy, worker }
    }

    pub async fn detect(&self, image: RawImage) -> Result<DetectionResult> {
        self.worker.detect(image).await
    }

    /// Load the strategy's models ahead of the first detection
    pub async fn preload(&self) -> Result<()> {
        let strategy = self.strategy.clone();
        tokio::task::spawn_blocking(move || strategy.preload())
            .await
            .map_err(|e| DetectionError::WorkerFatal(format!("preload task failed: {}", e)))?
    }

    /// Run the strategy on the calling thread
    pub fn detect_sync(&self, image: &RawImage) -> Result<DetectionResult> {
        self.strategy.detect_and_annotate(image)
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn worker(&self) -> &DetectionWorkerService {
        &self.worker
    }

    pub fn shutdown(&self) {
        self.worker.shutdown();
    }
}

impl std::fmt::Debug for DetectionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionPipeline")
            .field("strategy", &self.strategy.name())
            .field("worker", &self.worker)
            .finish()
    }
}
