use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rten_tensor::NdTensor;
use rten_tensor::prelude::*;

/// Input tensor layout used throughout the crate: `[batch, channel, height, width]`
pub type InputTensor = NdTensor<f32, 4>;

/// Counts tensors that are currently alive.
///
/// Every preprocessing buffer is handed out as a [`ScopedTensor`], so a
/// non-zero count after a detection returns means something leaked.
#[derive(Debug, Clone, Default)]
pub struct TensorTracker {
    live: Arc<AtomicUsize>,
}

impl TensorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, tensor: InputTensor) -> ScopedTensor {
        self.live.fetch_add(1, Ordering::SeqCst);
        ScopedTensor {
            tensor,
            live: self.live.clone(),
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Tensor guard; the buffer is released when the guard is dropped.
pub struct ScopedTensor {
    tensor: InputTensor,
    live: Arc<AtomicUsize>,
}

impl ScopedTensor {
    /// `(height, width)` of the image held by the tensor
    pub fn image_size(&self) -> (usize, usize) {
        let [_, _, h, w] = self.tensor.shape();
        (h, w)
    }
}

impl Deref for ScopedTensor {
    type Target = InputTensor;
    fn deref(&self) -> &Self::Target {
        &self.tensor
    }
}

impl Drop for ScopedTensor {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ScopedTensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedTensor")
            .field("shape", &self.tensor.shape())
            .finish()
    }
}
