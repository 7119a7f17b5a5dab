//! Memory API façade (C10): the five operations every outer transport (HTTP,
//! RPC, in-process embedding) wraps. Grounded on the teacher's
//! `api::memory_api` — thin validating wrappers around the core that return a
//! typed result rather than touching a transport directly — generalized from
//! session/cleanup endpoints into ingest/fetch/search/delete/meta.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::boundary::BoundaryDetector;
use crate::engine::Engine;
use crate::errors::{MemoryError, MemoryResult};
use crate::extraction::ClosedEpisode;
use crate::memory::{ConversationMeta, Message, Scope, UserProfile};
use crate::retrieval::{SearchRequest, SearchResponse};
use crate::store::{EventLogFilter, ForesightFilter, MemCellFilter};
use crate::tenant::TenantEnvelope;
use crate::worker_pool::ExtractionJob;

/// Field-level checks for an inbound [`Message`], expressed declaratively
/// rather than as a chain of `if`s so a new required field is one attribute
/// away instead of another hand-rolled branch.
#[derive(Debug, Validate)]
struct IngestPayload<'a> {
    #[validate(length(min = 1, message = "message_id must not be empty"))]
    message_id: &'a str,
    #[validate(length(min = 1, message = "conversation_id must not be empty"))]
    conversation_id: &'a str,
    #[validate(length(min = 1, message = "content must not be empty"))]
    content: &'a str,
}

fn validate_message(message: &Message) -> MemoryResult<()> {
    let payload = IngestPayload {
        message_id: message.message_id.trim(),
        conversation_id: message.conversation_id.trim(),
        content: message.content.trim(),
    };
    payload
        .validate()
        .map_err(|e| MemoryError::ValidationError(e.to_string()))
}

/// What `ingest` hands back: either the message landed in the accumulation
/// buffer, or it closed an episode and extraction is underway/finished.
#[derive(Debug)]
pub enum IngestOutcome {
    Accumulated { depth: usize },
    Processing { request_id: String },
    Processed(Box<crate::extraction::ExtractionOutcome>),
}

pub struct MemoryApi {
    engine: Arc<Engine>,
}

impl MemoryApi {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Append one message to its conversation's buffer; if it closes an
    /// episode, drain and submit extraction. `sync_mode` awaits the
    /// extraction result instead of returning `Processing` immediately
    /// (spec §4.C10 "ingest").
    pub async fn ingest(
        &self,
        tenant: &TenantEnvelope,
        message: Message,
        conversation_meta: &ConversationMeta,
        scope: Scope,
        sync_mode: bool,
    ) -> MemoryResult<IngestOutcome> {
        validate_message(&message)?;
        let config = self.engine.tenants.resolve(tenant)?;
        let tenant_ns = tenant.namespace();

        let existing = self.engine.buffer.peek(&tenant_ns, &message.conversation_id)?;
        let decision = BoundaryDetector::evaluate(&existing, &message, &config, &conversation_meta.default_timezone);

        self.engine.buffer.append(&tenant_ns, &message.conversation_id, &message)?;

        if !decision.fire {
            let depth = self.engine.buffer.len(&tenant_ns, &message.conversation_id)?;
            return Ok(IngestOutcome::Accumulated { depth });
        }

        let messages = self.engine.buffer.drain(&tenant_ns, &message.conversation_id)?;
        let episode = ClosedEpisode {
            tenant_ns: tenant_ns.clone(),
            conversation_id: message.conversation_id.clone(),
            messages,
            conversation_meta: conversation_meta.clone(),
            scope,
        };

        let (tx, mut rx) = mpsc::channel(1);
        let job = ExtractionJob {
            episode,
            config: config.clone(),
            on_complete: tx,
        };
        let request_id = Uuid::new_v4().to_string();

        let submission = self.engine.worker_pool.submit(job).await;
        if !submission.accepted {
            // Backpressure rejection: put the drained messages back (spec §4.C2
            // failure contract) so nothing is lost.
            let messages = submission.rejected_job.map(|j| j.episode.messages).unwrap_or_default();
            if let Err(e) = self.engine.buffer.requeue(&tenant_ns, &message.conversation_id, messages) {
                warn!(conversation_id = %message.conversation_id, error = %e, "failed to requeue after pool rejection");
            }
            return Err(MemoryError::ExtractionFailed(
                "extraction worker pool is at capacity".to_string(),
            ));
        }

        if !sync_mode {
            info!(request_id = %request_id, depth = submission.depth, "extraction submitted");
            return Ok(IngestOutcome::Processing { request_id });
        }

        match rx.recv().await {
            Some(Ok(outcome)) => {
                self.engine.sync_service.project(&outcome);
                Ok(IngestOutcome::Processed(Box::new(outcome)))
            }
            Some(Err(e)) => Err(e),
            None => Err(MemoryError::ExtractionFailed("extraction worker dropped without a result".to_string())),
        }
    }

    /// `request.tenant_ns` must already be set by the caller to the resolved
    /// `TenantEnvelope::namespace()` (spec.md:28, C1) — every backing search
    /// and hydration is scoped to it.
    pub async fn search(&self, tenant: &TenantEnvelope, request: SearchRequest) -> MemoryResult<SearchResponse> {
        let config = self.engine.tenants.resolve(tenant)?;
        self.engine.retrieval.search(request, &config).await
    }

    pub fn fetch_memcells(&self, tenant: &TenantEnvelope, filter: &MemCellFilter) -> MemoryResult<Vec<crate::memory::MemCell>> {
        self.engine.retrieval.fetch_memcells(&tenant.namespace(), filter)
    }

    pub fn fetch_event_log(
        &self,
        tenant: &TenantEnvelope,
        filter: &EventLogFilter,
    ) -> MemoryResult<Vec<crate::memory::EventLogRecord>> {
        self.engine.retrieval.fetch_event_log(&tenant.namespace(), filter)
    }

    pub fn fetch_foresight(
        &self,
        tenant: &TenantEnvelope,
        filter: &ForesightFilter,
    ) -> MemoryResult<Vec<crate::memory::ForesightRecord>> {
        self.engine.retrieval.fetch_foresight(&tenant.namespace(), filter)
    }

    pub fn fetch_profile(
        &self,
        tenant: &TenantEnvelope,
        user_id: &str,
        group_id: Option<&str>,
    ) -> MemoryResult<Option<UserProfile>> {
        self.engine.store.profiles.find(&tenant.namespace(), user_id, group_id)
    }

    /// Soft-deletes one entity from whichever C5 table owns it, then drops it
    /// from C6/C7 (spec §4.C10 "delete" fans out to every index), all scoped
    /// to `tenant`'s namespace.
    pub fn delete_memcell(&self, tenant: &TenantEnvelope, entity_id: &str, deleted_by: &str) -> MemoryResult<bool> {
        let tenant_ns = tenant.namespace();
        let deleted = self.engine.store.memcells.soft_delete(&tenant_ns, entity_id, deleted_by)?;
        if deleted {
            self.engine.keyword_index.remove(&tenant_ns, entity_id);
            self.engine
                .vector_index
                .remove(&tenant_ns, crate::memory::MemoryType::EpisodicMemory, entity_id);
        }
        Ok(deleted)
    }

    pub fn delete_event_log(&self, tenant: &TenantEnvelope, entity_id: &str, deleted_by: &str) -> MemoryResult<bool> {
        let tenant_ns = tenant.namespace();
        let deleted = self.engine.store.event_log.soft_delete(&tenant_ns, entity_id, deleted_by)?;
        if deleted {
            self.engine.keyword_index.remove(&tenant_ns, entity_id);
            self.engine
                .vector_index
                .remove(&tenant_ns, crate::memory::MemoryType::EventLog, entity_id);
        }
        Ok(deleted)
    }

    pub fn delete_foresight(&self, tenant: &TenantEnvelope, entity_id: &str, deleted_by: &str) -> MemoryResult<bool> {
        let tenant_ns = tenant.namespace();
        let deleted = self.engine.store.foresight.soft_delete(&tenant_ns, entity_id, deleted_by)?;
        if deleted {
            self.engine.keyword_index.remove(&tenant_ns, entity_id);
            self.engine
                .vector_index
                .remove(&tenant_ns, crate::memory::MemoryType::Foresight, entity_id);
        }
        Ok(deleted)
    }

    pub fn upsert_conversation_meta(&self, tenant: &TenantEnvelope, meta: &ConversationMeta) -> MemoryResult<()> {
        self.engine.store.conversation_meta.upsert(&tenant.namespace(), meta)
    }

    pub fn extraction_deadline(&self) -> Duration {
        Duration::from_secs(self.engine.config.extraction_timeout_seconds)
    }
}
