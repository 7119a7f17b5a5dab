//! Keyword index (C6): field-weighted inverted index over episodic/event/
//! foresight content, tenant-scoped. Grounded on the teacher's
//! `conversation_store.rs` LIKE-search pattern, generalized from single-table
//! substring search into per-family weighted term scoring (spec §4.C8's
//! `subject×3 + summary×2 + episode×1` weighting). Keying on `(tenant_ns,
//! entity_id)` follows spec.md:28 (C1) — every read/write routes to its own
//! tenant's slice of the map, never a neighbor's.

use std::sync::Arc;

use dashmap::DashMap;

use crate::memory::{MemoryType, Scope};
use crate::utils::TextUtils;

#[derive(Debug, Clone)]
pub struct KeywordDoc {
    pub entity_id: String,
    pub memory_type: MemoryType,
    pub scope: Scope,
    pub search_content: String,
    /// Per-term weight multiplier applied when that term appears in `search_content`.
    pub weight: f32,
}

#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub entity_id: String,
    pub memory_type: MemoryType,
    pub score: f32,
}

type DocKey = (String, String);

/// Every tenant's documents in one map, partitioned by `(tenant_ns, entity_id)`
/// so no lookup or scan can cross a namespace boundary. Grounded on the
/// teacher's DashMap-of-Vec pattern for per-conversation state.
#[derive(Default)]
pub struct KeywordIndex {
    docs: DashMap<DocKey, Arc<KeywordDoc>>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert keyed by `(tenant_ns, entity_id)` (spec §4.C8: "each
    /// write is keyed by the source entity's ID", scoped per spec.md:28's C1
    /// namespace).
    pub fn upsert(&self, tenant_ns: &str, doc: KeywordDoc) {
        self.docs
            .insert((tenant_ns.to_string(), doc.entity_id.clone()), Arc::new(doc));
    }

    pub fn remove(&self, tenant_ns: &str, entity_id: &str) {
        self.docs.remove(&(tenant_ns.to_string(), entity_id.to_string()));
    }

    pub fn contains(&self, tenant_ns: &str, entity_id: &str) -> bool {
        self.docs.contains_key(&(tenant_ns.to_string(), entity_id.to_string()))
    }

    /// BM25-style field-weighted term scoring: score = Σ over matched query
    /// terms of (term frequency in `search_content` × doc weight). Only scans
    /// documents belonging to `tenant_ns`.
    pub fn search(
        &self,
        tenant_ns: &str,
        query: &str,
        memory_types: &[MemoryType],
        scope_matches: impl Fn(&Scope) -> bool,
        top_k: usize,
    ) -> Vec<KeywordHit> {
        let query_terms = TextUtils::keywords(query);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<KeywordHit> = self
            .docs
            .iter()
            .filter(|entry| entry.key().0 == tenant_ns)
            .filter(|entry| memory_types.is_empty() || memory_types.contains(&entry.value().memory_type))
            .filter(|entry| scope_matches(&entry.value().scope))
            .filter_map(|entry| {
                let doc = entry.value();
                let content_terms = TextUtils::keywords(&doc.search_content);
                let matched = query_terms.intersection(&content_terms).count();
                if matched == 0 {
                    return None;
                }
                let score = matched as f32 * doc.weight;
                Some(KeywordHit {
                    entity_id: doc.entity_id.clone(),
                    memory_type: doc.memory_type,
                    score,
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        hits
    }
}

/// Builds the weighted `search_content` for a MemCell per spec §4.C8 step 1:
/// `subject×3 + summary×2 + episode×1`, or the joined atomic facts when present.
pub fn memcell_search_content(subject: &str, summary: &str, episode: &str, atomic_facts: &[String]) -> String {
    if !atomic_facts.is_empty() {
        return atomic_facts.join(" ");
    }
    format!(
        "{} {} {} {} {} {}",
        subject, subject, subject, summary, summary, episode
    )
}
