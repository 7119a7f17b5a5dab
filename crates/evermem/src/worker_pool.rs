//! Extraction worker pool infrastructure (spec §5), grounded on the
//! teacher's `thread_pool.rs` `WorkerThread`/bounded-queue pattern —
//! generalized from OS threads pulling `SystemCommand`s off a crossbeam
//! channel into async tasks pulling extraction jobs off a bounded tokio
//! channel, with per-conversation serialization via a striped keyed lock
//! (spec §9: "a keyed lock ... not a global lock").

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{error, warn};

use crate::extraction::{ClosedEpisode, ExtractionOutcome, ExtractionPipeline};
use crate::store::MemoryStore;
use crate::tenant::TenantConfig;

/// One unit of work: a closed episode plus everything the pipeline needs to
/// run without reaching back into shared state other than the store.
pub struct ExtractionJob {
    pub episode: ClosedEpisode,
    pub config: Arc<TenantConfig>,
    pub on_complete: mpsc::Sender<Result<ExtractionOutcome, crate::errors::MemoryError>>,
}

/// Fixed-width striped lock keyed by `conversation_id`'s hash, so
/// extractions on one conversation never run concurrently while unrelated
/// conversations are never serialized against each other (spec §5).
struct ConversationLocks {
    stripes: Vec<Arc<Semaphore>>,
}

impl ConversationLocks {
    fn new(stripe_count: usize) -> Self {
        Self {
            stripes: (0..stripe_count.max(1))
                .map(|_| Arc::new(Semaphore::new(1)))
                .collect(),
        }
    }

    fn stripe_for(&self, conversation_id: &str) -> Arc<Semaphore> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        conversation_id.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.stripes.len();
        self.stripes[idx].clone()
    }
}

/// Bounded work queue plus a fixed set of async workers draining it. When the
/// queue exceeds `high_watermark`, `submit` still accepts but reports
/// `queued: true, depth` (spec §5 backpressure); past `hard_cap` it rejects.
pub struct WorkerPool {
    sender: mpsc::Sender<ExtractionJob>,
    depth: Arc<std::sync::atomic::AtomicUsize>,
    high_watermark: usize,
    hard_cap: usize,
}

pub struct SubmitOutcome {
    pub accepted: bool,
    pub queued: bool,
    pub depth: usize,
    /// Handed back on rejection so the caller can requeue the episode's
    /// messages instead of losing them (spec §4.C2 failure contract).
    pub rejected_job: Option<ExtractionJob>,
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<ExtractionJob>>>,
    pipeline: Arc<ExtractionPipeline>,
    store: Arc<MemoryStore>,
    depth: Arc<std::sync::atomic::AtomicUsize>,
    locks: Arc<ConversationLocks>,
) {
    loop {
        let job = {
            let mut guard = receiver.lock().await;
            guard.recv().await
        };
        let job = match job {
            Some(job) => job,
            None => break, // channel closed, pool shutting down
        };
        depth.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        let conversation_id = job.episode.conversation_id.clone();
        let stripe = locks.stripe_for(&conversation_id);
        let _guard = stripe
            .acquire_owned()
            .await
            .expect("stripe semaphore is never closed");

        let result: Result<ExtractionOutcome, crate::errors::MemoryError> = {
            let pipeline = pipeline.clone();
            let config = job.config.clone();
            let store = store.clone();
            let episode = job.episode;
            let fut: std::pin::Pin<Box<dyn std::future::Future<Output = Result<ExtractionOutcome, crate::errors::MemoryError>> + Send>> =
                Box::pin(async move { pipeline.run(episode, &config, &store).await });
            fut.await
        };
        if let Err(e) = &result {
            warn!(worker_id, conversation_id, error = %e, "extraction failed");
        }
        if job.on_complete.send(result).await.is_err() {
            error!(worker_id, "extraction completion receiver dropped");
        }
    }
}

impl WorkerPool {
    pub fn new(
        worker_count: usize,
        queue_capacity: usize,
        high_watermark: usize,
        hard_cap: usize,
        pipeline: Arc<ExtractionPipeline>,
        store: Arc<MemoryStore>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<ExtractionJob>(queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));
        let depth = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let locks = Arc::new(ConversationLocks::new(worker_count.max(1) * 4));

        for worker_id in 0..worker_count.max(1) {
            let receiver = receiver.clone();
            let pipeline = pipeline.clone();
            let store = store.clone();
            let depth = depth.clone();
            let locks = locks.clone();
            tokio::spawn(Box::pin(run_worker(
                worker_id, receiver, pipeline, store, depth, locks,
            )));
        }

        Self {
            sender,
            depth,
            high_watermark,
            hard_cap,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Non-blocking submit with backpressure semantics (spec §5): always
    /// accepts below `hard_cap`, flags `queued=true` above `high_watermark`.
    pub async fn submit(&self, job: ExtractionJob) -> SubmitOutcome {
        let depth = self.depth();
        if depth >= self.hard_cap {
            return SubmitOutcome {
                accepted: false,
                queued: false,
                depth,
                rejected_job: Some(job),
            };
        }
        let queued = depth >= self.high_watermark;
        match self.sender.try_send(job) {
            Ok(()) => {
                self.depth.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                SubmitOutcome {
                    accepted: true,
                    queued,
                    depth: depth + 1,
                    rejected_job: None,
                }
            }
            Err(e) => {
                let job = match e {
                    mpsc::error::TrySendError::Full(job) => Some(job),
                    mpsc::error::TrySendError::Closed(job) => Some(job),
                };
                SubmitOutcome {
                    accepted: false,
                    queued: false,
                    depth,
                    rejected_job: job,
                }
            }
        }
    }
}
