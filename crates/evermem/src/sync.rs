//! Sync service (C8): propagates a committed extraction batch from C5 to C6
//! and C7, recording per-entity sync status so a background reconciler can
//! converge. Grounded on the teacher's `MigrationManager`-adjacent
//! maintenance-sweep style (periodic scan, bounded batch, structured
//! logging) generalized from schema upkeep into cross-store projection.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::extraction::ExtractionOutcome;
use crate::keyword_index::{memcell_search_content, KeywordDoc, KeywordIndex};
use crate::memory::MemoryType;
use crate::store::sync_status::SyncTarget;
use crate::store::MemoryStore;
use crate::vector_index::VectorIndex;

pub struct SyncService {
    store: Arc<MemoryStore>,
    keyword_index: Arc<KeywordIndex>,
    vector_index: Arc<VectorIndex>,
}

impl SyncService {
    pub fn new(store: Arc<MemoryStore>, keyword_index: Arc<KeywordIndex>, vector_index: Arc<VectorIndex>) -> Self {
        Self {
            store,
            keyword_index,
            vector_index,
        }
    }

    /// Projects one committed extraction batch (spec §4.C8 steps 1-3).
    /// Best-effort: a failure on one entity is recorded and left for the
    /// reconciler, never blocks or rolls back the others.
    pub fn project(&self, outcome: &ExtractionOutcome) {
        let tenant_ns = &outcome.tenant_ns;
        let cell = &outcome.memcell;
        let search_content = memcell_search_content(&cell.subject, &cell.summary, &cell.episode, &cell.event_log.atomic_fact);
        self.project_one(
            tenant_ns,
            &cell.event_id,
            MemoryType::EpisodicMemory,
            cell.scope.clone(),
            search_content,
            3.0,
            cell.embedding.clone(),
        );

        for record in &outcome.event_log_records {
            self.project_one(
                tenant_ns,
                &record.id,
                MemoryType::EventLog,
                record.scope.clone(),
                record.atomic_fact.clone(),
                1.0,
                record.vector.clone(),
            );
        }

        for record in &outcome.foresight_records {
            self.project_one(
                tenant_ns,
                &record.id,
                MemoryType::Foresight,
                record.scope.clone(),
                record.content.clone(),
                1.0,
                record.vector.clone(),
            );
        }
    }

    fn project_one(
        &self,
        tenant_ns: &str,
        entity_id: &str,
        memory_type: MemoryType,
        scope: crate::memory::Scope,
        search_content: String,
        weight: f32,
        vector: Vec<f32>,
    ) {
        self.store
            .sync_status
            .mark_pending(tenant_ns, entity_id, SyncTarget::KeywordIndex)
            .ok();
        self.store
            .sync_status
            .mark_pending(tenant_ns, entity_id, SyncTarget::VectorIndex)
            .ok();

        self.keyword_index.upsert(
            tenant_ns,
            KeywordDoc {
                entity_id: entity_id.to_string(),
                memory_type,
                scope: scope.clone(),
                search_content,
                weight,
            },
        );
        if let Err(e) = self.store.sync_status.mark_synced(tenant_ns, entity_id, SyncTarget::KeywordIndex) {
            warn!(tenant_ns, entity_id, error = %e, "failed to record keyword sync status");
        }

        self.vector_index.upsert(tenant_ns, memory_type, entity_id, scope, vector);
        if let Err(e) = self.store.sync_status.mark_synced(tenant_ns, entity_id, SyncTarget::VectorIndex) {
            warn!(tenant_ns, entity_id, error = %e, "failed to record vector sync status");
        }
    }

    /// One reconciler sweep: re-projects anything still marked unsynced.
    /// Intended to be driven by a periodic `tokio::time::interval` in the
    /// engine's background task (spec §4.C8: "a background reconciler
    /// periodically scans C5 for entities missing a sync acknowledgement").
    pub fn reconcile_once(&self, batch_size: usize) -> usize {
        let pending = match self.store.sync_status.pending_all(batch_size) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "reconciler failed to list pending sync rows");
                return 0;
            }
        };
        let mut reprojected = 0;
        for (tenant_ns, row) in pending {
            if self.reproject_entity(&tenant_ns, &row.entity_id) {
                reprojected += 1;
            }
        }
        if reprojected > 0 {
            info!(reprojected, "reconciler re-projected pending entities");
        }
        reprojected
    }

    fn reproject_entity(&self, tenant_ns: &str, entity_id: &str) -> bool {
        if let Ok(Some(cell)) = self.store.memcells.find(tenant_ns, entity_id) {
            if cell.deletion.is_deleted() {
                return false;
            }
            let search_content = memcell_search_content(&cell.subject, &cell.summary, &cell.episode, &cell.event_log.atomic_fact);
            self.project_one(
                tenant_ns,
                entity_id,
                MemoryType::EpisodicMemory,
                cell.scope,
                search_content,
                3.0,
                cell.embedding,
            );
            return true;
        }
        if let Ok(Some(record)) = self.store.event_log.find(tenant_ns, entity_id) {
            self.project_one(
                tenant_ns,
                entity_id,
                MemoryType::EventLog,
                record.scope,
                record.atomic_fact,
                1.0,
                record.vector,
            );
            return true;
        }
        if let Ok(Some(record)) = self.store.foresight.find(tenant_ns, entity_id) {
            self.project_one(
                tenant_ns,
                entity_id,
                MemoryType::Foresight,
                record.scope,
                record.content,
                1.0,
                record.vector,
            );
            return true;
        }
        false
    }

    /// Spawns the periodic reconciler loop; returns its join handle so the
    /// engine can await it on shutdown.
    pub fn spawn_reconciler(self: Arc<Self>, interval: Duration, batch_size: usize) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.reconcile_once(batch_size);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::ExtractionOutcome;
    use crate::memory::{DeletionAudit, EventLog, MemCell, MemCellType, Scope};
    use chrono::Utc;

    fn test_outcome() -> ExtractionOutcome {
        ExtractionOutcome {
            tenant_ns: "tenant-a".to_string(),
            memcell: MemCell {
                event_id: "e1".to_string(),
                scope: Scope {
                    user_id: None,
                    group_id: Some("g1".to_string()),
                },
                timestamp: Utc::now(),
                subject: "Trip".to_string(),
                summary: "Planned a trip to Chengdu".to_string(),
                episode: "They discussed Sichuan food".to_string(),
                participants: vec!["u1".to_string()],
                keywords: vec![],
                r#type: MemCellType::Conversation,
                original_data: vec![],
                semantic_memories: vec![],
                event_log: EventLog::default(),
                embedding: vec![0.1, 0.2],
                deletion: DeletionAudit::default(),
            },
            event_log_records: vec![],
            foresight_records: vec![],
        }
    }

    #[test]
    fn project_writes_keyword_and_vector_docs_and_marks_synced() {
        let store = Arc::new(MemoryStore::new_in_memory().unwrap());
        store.commit_episode("tenant-a", &test_outcome().memcell, &[], &[]).unwrap();
        let keyword_index = Arc::new(KeywordIndex::new());
        let vector_index = Arc::new(VectorIndex::new(2));
        let sync = SyncService::new(store.clone(), keyword_index.clone(), vector_index.clone());

        sync.project(&test_outcome());

        assert!(keyword_index.contains("tenant-a", "e1"));
        assert!(vector_index.contains("tenant-a", MemoryType::EpisodicMemory, "e1"));
        assert!(store.sync_status.is_fully_synced("tenant-a", "e1").unwrap());
    }

    #[test]
    fn reconcile_once_reprojects_missing_entities() {
        let store = Arc::new(MemoryStore::new_in_memory().unwrap());
        let outcome = test_outcome();
        store.commit_episode("tenant-a", &outcome.memcell, &[], &[]).unwrap();
        store.sync_status.mark_pending("tenant-a", "e1", SyncTarget::KeywordIndex).unwrap();
        store.sync_status.mark_pending("tenant-a", "e1", SyncTarget::VectorIndex).unwrap();

        let keyword_index = Arc::new(KeywordIndex::new());
        let vector_index = Arc::new(VectorIndex::new(2));
        let sync = SyncService::new(store.clone(), keyword_index.clone(), vector_index.clone());

        let count = sync.reconcile_once(10);
        assert_eq!(count, 1);
        assert!(keyword_index.contains("tenant-a", "e1"));
    }
}
