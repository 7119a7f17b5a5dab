//! Process-wide wiring (spec §9: "construct at startup, dispose on
//! shutdown"). Grounded on the teacher's `SharedSystemState` — one struct
//! holding every long-lived subsystem handle, constructed once and cloned
//! (via `Arc`) into every request path — generalized from LLM-serving state
//! (model runtime, backend pool) into the memory core's own subsystems.

use std::sync::Arc;
use std::time::Duration;

use crate::buffer::MessageBuffer;
use crate::config::Config;
use crate::extraction::{EmbeddingCollaborator, ExtractionPipeline, HttpEmbeddingCollaborator, HttpLlmCollaborator, LlmCollaborator};
use crate::keyword_index::KeywordIndex;
use crate::metrics;
use crate::retrieval::RetrievalEngine;
use crate::store::MemoryStore;
use crate::sync::SyncService;
use crate::tenant::TenantRegistry;
use crate::vector_index::VectorIndex;
use crate::worker_pool::WorkerPool;

/// Every long-lived subsystem handle the façade (`api.rs`) operates against.
pub struct Engine {
    pub config: Config,
    pub tenants: TenantRegistry,
    pub buffer: Arc<MessageBuffer>,
    pub store: Arc<MemoryStore>,
    pub keyword_index: Arc<KeywordIndex>,
    pub vector_index: Arc<VectorIndex>,
    pub sync_service: Arc<SyncService>,
    pub retrieval: Arc<RetrievalEngine>,
    pub worker_pool: Arc<WorkerPool>,
    _reconciler: tokio::task::JoinHandle<()>,
}

impl Engine {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        metrics::init_metrics();

        let store = Arc::new(MemoryStore::new(&config.store_path)?);
        let buffer = Arc::new(MessageBuffer::new(store.pool()));
        let keyword_index = Arc::new(KeywordIndex::new());
        let vector_index = Arc::new(VectorIndex::new(config.default_embedding_dim));
        let sync_service = Arc::new(SyncService::new(store.clone(), keyword_index.clone(), vector_index.clone()));

        let llm: Arc<dyn LlmCollaborator> = Arc::new(HttpLlmCollaborator::new(config.llm_backend_url.clone()));
        let embedder: Arc<dyn EmbeddingCollaborator> = Arc::new(HttpEmbeddingCollaborator::new(
            config.embedding_backend_url.clone(),
            config.default_embedding_dim,
        ));

        let pipeline = Arc::new(ExtractionPipeline::new(llm, embedder.clone()));
        let worker_pool = Arc::new(WorkerPool::new(
            config.extraction_threads,
            config.extraction_queue_size,
            config.extraction_queue_high_watermark,
            config.extraction_queue_size,
            pipeline,
            store.clone(),
        ));

        let retrieval = Arc::new(RetrievalEngine::new(
            store.clone(),
            keyword_index.clone(),
            vector_index.clone(),
            buffer.clone(),
            embedder,
        ));

        let reconciler = sync_service.clone().spawn_reconciler(Duration::from_secs(30), 100);

        Ok(Self {
            config,
            tenants: TenantRegistry::new(),
            buffer,
            store,
            keyword_index,
            vector_index,
            sync_service,
            retrieval,
            worker_pool,
            _reconciler: reconciler,
        })
    }
}
