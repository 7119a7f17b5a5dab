//! Vector index (C7): ANN index over embeddings of the three artifact
//! families. Grounded on the teacher's `embedding_store.rs` — a `hora`
//! `HNSWIndex<f32, i64>` per collection with a linear-scan cosine-similarity
//! fallback — generalized from one fixed collection into one index per
//! `(tenant_ns, MemoryType)` pair, all sharing the single embedding dimension
//! fixed at process start. Collection lookup by `tenant_ns` follows spec.md:28
//! (C1): a tenant's vectors only ever live in, and are only ever searched
//! from, that tenant's own collections.

use std::sync::RwLock;

use dashmap::DashMap;
use hora::core::ann_index::ANNIndex;
use hora::index::hnsw_idx::HNSWIndex;
use hora::index::hnsw_params::HNSWParams;
use rayon::prelude::*;

use crate::memory::{MemoryType, Scope};

#[derive(Debug, Clone)]
struct VectorEntry {
    entity_id: String,
    scope: Scope,
    vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub entity_id: String,
    pub memory_type: MemoryType,
    pub score: f32,
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// One HNSW collection per `(tenant_ns, artifact family)`, plus the id/scope
/// side table the ANN library doesn't carry (hora's index type is
/// `i64 -> vector` only).
struct Collection {
    dim: usize,
    index: RwLock<HNSWIndex<f32, i64>>,
    /// `i64` handle hora assigns, mapped back to `(entity_id, scope)`.
    entries: RwLock<std::collections::HashMap<i64, VectorEntry>>,
    next_handle: RwLock<i64>,
    /// Set once the HNSW graph has at least one vector; hora requires
    /// `build()` before `search()` and errors on an empty index.
    built: RwLock<bool>,
}

impl Collection {
    fn new(dim: usize) -> Self {
        let params = HNSWParams::<f32> {
            n_neighbor: 16,
            ef_build: 100,
            ef_search: 50,
            ..Default::default()
        };
        Self {
            dim,
            index: RwLock::new(HNSWIndex::new(dim, &params)),
            entries: RwLock::new(std::collections::HashMap::new()),
            next_handle: RwLock::new(0),
            built: RwLock::new(false),
        }
    }

    fn upsert(&self, entity_id: &str, scope: Scope, vector: Vec<f32>) {
        debug_assert_eq!(vector.len(), self.dim, "embedding dimension mismatch");
        // hora has no in-place update; remove any prior handle for this id.
        self.remove(entity_id);
        let handle = {
            let mut next = self.next_handle.write().unwrap();
            let h = *next;
            *next += 1;
            h
        };
        {
            let mut index = self.index.write().unwrap();
            let _ = index.add(&vector, handle);
        }
        self.entries.write().unwrap().insert(
            handle,
            VectorEntry {
                entity_id: entity_id.to_string(),
                scope,
                vector,
            },
        );
        *self.built.write().unwrap() = false;
    }

    fn remove(&self, entity_id: &str) {
        let stale: Vec<i64> = self
            .entries
            .read()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.entity_id == entity_id)
            .map(|(h, _)| *h)
            .collect();
        let mut entries = self.entries.write().unwrap();
        for handle in stale {
            entries.remove(&handle);
        }
    }

    fn contains(&self, entity_id: &str) -> bool {
        self.entries.read().unwrap().values().any(|e| e.entity_id == entity_id)
    }

    fn ensure_built(&self) {
        let already = *self.built.read().unwrap();
        if already {
            return;
        }
        let mut index = self.index.write().unwrap();
        if index.build(hora::core::metrics::Metric::CosineSimilarity).is_ok() {
            *self.built.write().unwrap() = true;
        }
    }

    /// ANN search when the graph is built; otherwise a deterministic
    /// linear scan (teacher's `embedding_store.rs` fallback path).
    fn search(
        &self,
        query: &[f32],
        scope_matches: &(dyn Fn(&Scope) -> bool + Sync),
        top_k: usize,
    ) -> Vec<(String, f32)> {
        self.ensure_built();
        let entries = self.entries.read().unwrap();
        if entries.is_empty() {
            return Vec::new();
        }

        let built = *self.built.read().unwrap();
        if built {
            let index = self.index.read().unwrap();
            let neighbors = index.search(query, top_k.max(1) * 4);
            let mut out: Vec<(String, f32)> = neighbors
                .into_iter()
                .filter_map(|handle| entries.get(&handle))
                .filter(|entry| scope_matches(&entry.scope))
                .map(|entry| (entry.entity_id.clone(), cosine_similarity(query, &entry.vector)))
                .collect();
            out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            out.truncate(top_k);
            return out;
        }

        // Unbuilt graph: fall back to a brute-force cosine scan, parallelized
        // across entries since a cold tenant can have thousands of pending
        // vectors before the HNSW graph is (re)built.
        let mut out: Vec<(String, f32)> = entries
            .par_iter()
            .filter(|(_, entry)| scope_matches(&entry.scope))
            .map(|(_, entry)| (entry.entity_id.clone(), cosine_similarity(query, &entry.vector)))
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(top_k);
        out
    }
}

type CollectionKey = (String, MemoryType);

/// One [`Collection`] per `(tenant_ns, artifact family)`, lazily created on
/// first write since tenants aren't known at construction time. All
/// collections share the process-fixed embedding dimension (spec §3:
/// "`embedding` dimension is tenant-fixed" — fixed per deployment here, since
/// `hora` can't resize a live graph).
pub struct VectorIndex {
    dim: usize,
    collections: DashMap<CollectionKey, Collection>,
}

impl VectorIndex {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            collections: DashMap::new(),
        }
    }

    fn collection(&self, tenant_ns: &str, memory_type: MemoryType) -> dashmap::mapref::one::Ref<'_, CollectionKey, Collection> {
        let key = (tenant_ns.to_string(), memory_type);
        if !self.collections.contains_key(&key) {
            self.collections.entry(key.clone()).or_insert_with(|| Collection::new(self.dim));
        }
        self.collections.get(&key).expect("just inserted")
    }

    pub fn upsert(&self, tenant_ns: &str, memory_type: MemoryType, entity_id: &str, scope: Scope, vector: Vec<f32>) {
        self.collection(tenant_ns, memory_type).upsert(entity_id, scope, vector);
    }

    pub fn remove(&self, tenant_ns: &str, memory_type: MemoryType, entity_id: &str) {
        if let Some(collection) = self.collections.get(&(tenant_ns.to_string(), memory_type)) {
            collection.remove(entity_id);
        }
    }

    pub fn contains(&self, tenant_ns: &str, memory_type: MemoryType, entity_id: &str) -> bool {
        self.collections
            .get(&(tenant_ns.to_string(), memory_type))
            .map(|c| c.contains(entity_id))
            .unwrap_or(false)
    }

    pub fn search(
        &self,
        tenant_ns: &str,
        query: &[f32],
        memory_types: &[MemoryType],
        scope_matches: impl Fn(&Scope) -> bool + Sync,
        top_k: usize,
    ) -> Vec<VectorHit> {
        let families: Vec<MemoryType> = if memory_types.is_empty() {
            vec![MemoryType::EpisodicMemory, MemoryType::EventLog, MemoryType::Foresight]
        } else {
            memory_types.to_vec()
        };

        let mut hits: Vec<VectorHit> = families
            .into_iter()
            .filter_map(|family| {
                self.collections
                    .get(&(tenant_ns.to_string(), family))
                    .map(|c| (family, c))
            })
            .flat_map(|(family, collection)| {
                collection
                    .search(query, &scope_matches, top_k)
                    .into_iter()
                    .map(move |(entity_id, score)| VectorHit {
                        entity_id,
                        memory_type: family,
                        score,
                    })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        hits
    }
}
