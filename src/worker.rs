//! Background execution of detections.
//!
//! The worker is a dedicated OS thread that owns nothing but a handle to the
//! strategy and talks to callers only through channels:
//!
//! ```text
//! detect() --std mpsc--> worker thread --tokio mpsc--> router task --oneshot--> detect()
//! ```
//!
//! Requests are correlated by id. A pending entry is removed when its response
//! is routed, when it times out, when the caller gives up, or when the worker
//! dies (which rejects every pending request of that worker).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc as async_mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::detection::DetectionStrategy;
use crate::error::{DetectionError, Result};
use crate::models::{DetectionResult, RawImage};

const WORKER_THREAD_NAME: &str = "detection-worker";

struct WorkerRequest {
    request_id: u64,
    image: RawImage,
}

struct WorkerResponse {
    request_id: u64,
    result: Result<DetectionResult>,
}

struct PendingRequest {
    generation: u64,
    reply: oneshot::Sender<Result<DetectionResult>>,
}

/// Handle to a running worker thread
struct WorkerHandle {
    generation: u64,
    requests: Sender<WorkerRequest>,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<u64, PendingRequest>>,
    worker: Mutex<Option<WorkerHandle>>,
    next_request_id: AtomicU64,
    next_generation: AtomicU64,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn worker(&self) -> MutexGuard<'_, Option<WorkerHandle>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Option<(u64, Sender<WorkerRequest>)> {
        self.worker()
            .as_ref()
            .map(|handle| (handle.generation, handle.requests.clone()))
    }

    /// Reject every request of a worker generation and forget the worker.
    /// Returns whether the worker was still registered (i.e. it died unexpectedly).
    fn fail_generation(&self, generation: u64, message: &str) -> bool {
        let was_registered = {
            let mut worker = self.worker();
            let registered = worker
                .as_ref()
                .is_some_and(|handle| handle.generation == generation);
            if registered {
                *worker = None;
            }
            registered
        };

        let orphaned: Vec<PendingRequest> = {
            let mut pending = self.pending();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| p.generation == generation)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };

        if !orphaned.is_empty() {
            warn!(count = orphaned.len(), "Rejecting pending detection requests");
        }
        for request in orphaned {
            let _ = request
                .reply
                .send(Err(DetectionError::WorkerFatal(message.to_string())));
        }
        was_registered
    }
}

/// Removes a pending entry on every exit path of `detect`
struct PendingGuard<'a> {
    shared: &'a Shared,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.request_id);
    }
}

/// Offloads detections to a background thread, with timeout and direct fallback
pub struct DetectionWorkerService {
    strategy: Arc<dyn DetectionStrategy>,
    shared: Arc<Shared>,
    timeout: Duration,
}

impl DetectionWorkerService {
    pub fn new(strategy: Arc<dyn DetectionStrategy>, timeout: Duration) -> Self {
        Self {
            strategy,
            shared: Arc::new(Shared::default()),
            timeout,
        }
    }

    /// Start the worker thread and its response router.
    ///
    /// Must be called from within a Tokio runtime. Calling it on a running
    /// worker does nothing; calling it after a fatal error starts a new one.
    pub fn init(&self) -> Result<()> {
        let mut worker = self.shared.worker();
        if worker.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            DetectionError::WorkerFatal(format!("background execution unsupported: {}", e))
        })?;

        let generation = self.shared.next_generation.fetch_add(1, Ordering::SeqCst);
        let (request_tx, request_rx) = mpsc::channel::<WorkerRequest>();
        let (response_tx, response_rx) = async_mpsc::unbounded_channel::<WorkerResponse>();

        let strategy = self.strategy.clone();
        std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(strategy, request_rx, response_tx))
            .map_err(|e| DetectionError::WorkerFatal(format!("failed to spawn worker thread: {}", e)))?;

        runtime.spawn(route_responses(self.shared.clone(), generation, response_rx));

        *worker = Some(WorkerHandle {
            generation,
            requests: request_tx,
        });
        info!(generation, strategy = self.strategy.name(), "Detection worker started");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.worker().is_some()
    }

    /// Number of requests waiting for a worker response
    pub fn pending_requests(&self) -> usize {
        self.shared.pending().len()
    }

    /// Stop accepting work. Queued requests are still answered.
    pub fn shutdown(&self) {
        if self.shared.worker().take().is_some() {
            info!("Detection worker shutting down");
        }
    }

    /// Run a detection on the worker, or directly if no worker is running
    pub async fn detect(&self, image: RawImage) -> Result<DetectionResult> {
        let Some((generation, requests)) = self.shared.current() else {
            debug!("Worker not running, detecting directly");
            return self.detect_direct(image).await;
        };

        let request_id = self.shared.next_request_id.fetch_add(1, Ordering::SeqCst);
        let (reply, response) = oneshot::channel();
        self.shared.pending().insert(
            request_id,
            PendingRequest { generation, reply },
        );
        let guard = PendingGuard {
            shared: &self.shared,
            request_id,
        };

        if let Err(mpsc::SendError(request)) = requests.send(WorkerRequest { request_id, image }) {
            drop(guard);
            warn!(request_id, "Worker channel closed, detecting directly");
            return self.detect_direct(request.image).await;
        }
        debug!(request_id, "Dispatched detection to worker");

        let outcome = tokio::time::timeout(self.timeout, response).await;
        drop(guard);

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(DetectionError::WorkerFatal(
                "worker dropped the request".to_string(),
            )),
            Err(_) => {
                warn!(request_id, timeout = ?self.timeout, "Detection request timed out");
                Err(DetectionError::DetectionTimeout(self.timeout))
            }
        }
    }

    /// Synchronous-path execution on the blocking pool
    pub async fn detect_direct(&self, image: RawImage) -> Result<DetectionResult> {
        let strategy = self.strategy.clone();
        tokio::task::spawn_blocking(move || strategy.detect_and_annotate(&image))
            .await
            .map_err(|e| DetectionError::WorkerFatal(format!("detection task failed: {}", e)))?
    }
}

impl Drop for DetectionWorkerService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DetectionWorkerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionWorkerService")
            .field("strategy", &self.strategy.name())
            .field("initialized", &self.is_initialized())
            .field("pending", &self.pending_requests())
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn run_worker(
    strategy: Arc<dyn DetectionStrategy>,
    requests: Receiver<WorkerRequest>,
    responses: async_mpsc::UnboundedSender<WorkerResponse>,
) {
    let served = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        while let Ok(request) = requests.recv() {
            let result = strategy.detect_and_annotate(&request.image);
            let response = WorkerResponse {
                request_id: request.request_id,
                result,
            };
            if responses.send(response).is_err() {
                break;
            }
        }
    }));

    // Close the request side first: once the router sees `responses` close and
    // sweeps the pending table, no new request can still reach this thread.
    drop(requests);
    drop(responses);

    if served.is_err() {
        error!("Detection worker panicked");
    }
}

async fn route_responses(
    shared: Arc<Shared>,
    generation: u64,
    mut responses: async_mpsc::UnboundedReceiver<WorkerResponse>,
) {
    while let Some(response) = responses.recv().await {
        let waiting = shared.pending().remove(&response.request_id);
        match waiting {
            Some(request) => {
                let _ = request.reply.send(response.result);
            }
            None => warn!(
                request_id = response.request_id,
                "Discarding response for a request nobody waits on"
            ),
        }
    }

    // The worker thread is gone: either shut down or crashed
    if shared.fail_generation(generation, "detection worker terminated unexpectedly") {
        error!(generation, "Detection worker died; falling back to direct execution");
    } else {
        debug!(generation, "Detection worker stopped");
    }
}
