use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, error, info};

use crate::error::{DetectionError, Result};

type LoadFn<M> = dyn Fn() -> anyhow::Result<Arc<M>> + Send + Sync;

/// Observable load state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Idle,
    Loading,
    Loaded,
    Error,
}

enum Slot<M: ?Sized> {
    Idle,
    Loading,
    Loaded(Arc<M>),
    Failed(String),
}

/// Lazily loads a model once and hands out shared references to it.
///
/// Concurrent callers that arrive while a load is in flight wait for that
/// load and get its result; they never start a second one. A failed load is
/// retried by the next caller that did not observe the failure in flight.
pub struct ModelLoader<M: ?Sized + Send + Sync> {
    name: String,
    load_fn: Box<LoadFn<M>>,
    slot: Mutex<Slot<M>>,
    done: Condvar,
}

impl<M: ?Sized + Send + Sync> ModelLoader<M> {
    pub fn new<F>(name: impl Into<String>, load_fn: F) -> Self
    where
        F: Fn() -> anyhow::Result<Arc<M>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            load_fn: Box::new(load_fn),
            slot: Mutex::new(Slot::Idle),
            done: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Slot<M>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load the model, or return the already loaded one
    pub fn load_model(&self) -> Result<Arc<M>> {
        let mut slot = self.lock();
        let mut waited = false;

        loop {
            if let Slot::Loaded(model) = &*slot {
                return Ok(model.clone());
            }
            if matches!(*slot, Slot::Loading) {
                debug!(model = %self.name, "Waiting for in-flight model load");
                waited = true;
                slot = self
                    .done
                    .wait(slot)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }
            // The load we waited on failed: share its error instead of retrying
            if let (true, Slot::Failed(message)) = (waited, &*slot) {
                return Err(DetectionError::ModelLoadFailed(message.clone()));
            }
            break;
        }

        *slot = Slot::Loading;
        drop(slot);

        info!(model = %self.name, "Loading model");
        let started = Instant::now();
        // A panicking loader would leave waiters blocked on `Loading` forever
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.load_fn)()))
            .unwrap_or_else(|_| Err(anyhow::anyhow!("model loader panicked")));

        let mut slot = self.lock();
        let result = match outcome {
            Ok(model) => {
                info!(
                    model = %self.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Model loaded"
                );
                *slot = Slot::Loaded(model.clone());
                Ok(model)
            }
            Err(e) => {
                let message = format!("{}: {:#}", self.name, e);
                error!(model = %self.name, error = %message, "Model load failed");
                *slot = Slot::Failed(message.clone());
                Err(DetectionError::ModelLoadFailed(message))
            }
        };
        self.done.notify_all();
        result
    }

    pub fn status(&self) -> LoadStatus {
        match &*self.lock() {
            Slot::Idle => LoadStatus::Idle,
            Slot::Loading => LoadStatus::Loading,
            Slot::Loaded(_) => LoadStatus::Loaded,
            Slot::Failed(_) => LoadStatus::Error,
        }
    }

    /// Drop the loaded model. An in-flight load is left alone.
    pub fn unload(&self) {
        let mut slot = self.lock();
        if !matches!(*slot, Slot::Loading) {
            *slot = Slot::Idle;
            debug!(model = %self.name, "Model unloaded");
        }
    }
}

impl<M: ?Sized + Send + Sync> std::fmt::Debug for ModelLoader<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLoader")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}
