use std::num::NonZeroUsize;

use tracing::{info, warn};

/// Longest image side fed to the general detector on capable hosts
pub const ACCELERATED_MAX_DIMENSION: u32 = 1024;
/// Longest image side on constrained hosts
pub const CPU_MAX_DIMENSION: u32 = 640;

/// Numeric backend the models run on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Multi-threaded inference
    Accelerated { threads: usize },
    /// Single-threaded fallback
    Cpu,
}

impl Backend {
    /// Try the accelerated backend first and fall back to CPU.
    ///
    /// Never fails: a failed probe only logs a warning.
    pub fn initialize(prefer_accelerated: bool) -> Self {
        if !prefer_accelerated {
            info!("Accelerated backend disabled by configuration, using CPU");
            return Backend::Cpu;
        }

        match probe_accelerated() {
            Ok(threads) => {
                info!(threads, "Initialized accelerated backend");
                Backend::Accelerated { threads }
            }
            Err(reason) => {
                warn!(%reason, "Accelerated backend unavailable, falling back to CPU");
                Backend::Cpu
            }
        }
    }

    /// Device-dependent bound on the preprocessed image size
    pub fn max_dimension(&self) -> u32 {
        match self {
            Backend::Accelerated { .. } => ACCELERATED_MAX_DIMENSION,
            Backend::Cpu => CPU_MAX_DIMENSION,
        }
    }

    /// Worker threads in the inference pool
    pub fn inference_threads(&self) -> usize {
        match self {
            Backend::Accelerated { threads } => (*threads).max(1),
            Backend::Cpu => 1,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Accelerated { .. } => "accelerated",
            Backend::Cpu => "cpu",
        }
    }
}

fn probe_accelerated() -> Result<usize, String> {
    let threads = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .map_err(|e| format!("cannot query hardware parallelism: {}", e))?;
    if threads < 2 {
        return Err("host exposes a single hardware thread".to_string());
    }
    Ok(threads)
}
