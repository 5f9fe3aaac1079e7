use std::path::PathBuf;
use std::time::Duration;

/// Default hosted inference endpoint
pub const DEFAULT_REMOTE_ENDPOINT: &str = "https://detect.roboflow.com";
/// Default general detector location
pub const DEFAULT_GENERAL_MODEL: &str = "assets/models/ssd_mobilenet.rten";
/// Default custom model directory
pub const DEFAULT_CUSTOM_MODEL_DIR: &str = "assets/models/domino";
/// How long a worker request may stay unanswered
pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(30);

/// Which detection strategy a pipeline runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Heuristic,
    CustomModel,
    RemoteApi,
}

#[derive(Debug, Clone)]
pub struct RemoteApiConfig {
    pub api_key: Option<String>,
    pub model_name: String,
    pub model_version: String,
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for RemoteApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model_name: "domino-pips".to_string(),
            model_version: "1".to_string(),
            endpoint: DEFAULT_REMOTE_ENDPOINT.to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

impl RemoteApiConfig {
    /// `{endpoint}/{model}/{version}` without the key
    pub fn url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.model_name,
            self.model_version
        )
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Run detections on the background worker thread
    pub enabled: bool,
    pub timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub use_custom_model: bool,
    pub use_remote_api: bool,
    pub remote: RemoteApiConfig,
    pub general_model_path: PathBuf,
    pub custom_model_dir: PathBuf,
    /// Overrides the backend-dependent preprocessing bound
    pub max_dimension: Option<u32>,
    pub prefer_accelerated: bool,
    /// Square input side of the custom model
    pub custom_input_size: u32,
    pub custom_min_score: f32,
    pub worker: WorkerConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            use_custom_model: false,
            use_remote_api: false,
            remote: RemoteApiConfig::default(),
            general_model_path: PathBuf::from(DEFAULT_GENERAL_MODEL),
            custom_model_dir: PathBuf::from(DEFAULT_CUSTOM_MODEL_DIR),
            max_dimension: None,
            prefer_accelerated: true,
            custom_input_size: 320,
            custom_min_score: 0.5,
            worker: WorkerConfig::default(),
        }
    }
}

impl DetectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// The custom model wins when both flags are set
    pub fn strategy_kind(&self) -> StrategyKind {
        if self.use_custom_model {
            StrategyKind::CustomModel
        } else if self.use_remote_api {
            StrategyKind::RemoteApi
        } else {
            StrategyKind::Heuristic
        }
    }

    pub fn with_custom_model(mut self, enabled: bool) -> Self {
        self.use_custom_model = enabled;
        self
    }

    pub fn with_remote_api(mut self, enabled: bool) -> Self {
        self.use_remote_api = enabled;
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.remote.api_key = Some(key.into());
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = Some(max_dimension);
        self
    }

    pub fn with_worker(mut self, enabled: bool) -> Self {
        self.worker.enabled = enabled;
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker.timeout = timeout;
        self
    }
}
