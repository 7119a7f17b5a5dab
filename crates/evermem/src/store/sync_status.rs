//! Per-entity sync bookkeeping (C8): one row per `(tenant_ns, entity_id, store)`
//! triple, driving the background reconciler's retry loop. Grounded on the
//! `sync_status` table added to [`super::schema`] for this purpose — the
//! teacher has no direct equivalent since its document store was always
//! single-target. `tenant_ns` threading follows spec.md:28 (C1).

use std::sync::Arc;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::errors::{MemoryError, MemoryResult};

/// One of the fan-out targets a C5 write also needs to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    KeywordIndex,
    VectorIndex,
}

impl SyncTarget {
    fn as_str(self) -> &'static str {
        match self {
            SyncTarget::KeywordIndex => "keyword_index",
            SyncTarget::VectorIndex => "vector_index",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingSync {
    pub entity_id: String,
    pub store: String,
    pub attempts: i64,
    pub last_error: Option<String>,
}

pub struct SyncStatusStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl SyncStatusStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn conn(&self) -> MemoryResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!("pool exhausted: {e}")))
    }

    /// Marks an entity as needing propagation to `target`; called right
    /// after the C5 write commits, before C8 attempts the fan-out.
    pub fn mark_pending(&self, tenant_ns: &str, entity_id: &str, target: SyncTarget) -> MemoryResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_status (tenant_ns, entity_id, store, synced, attempts) VALUES (?1, ?2, ?3, 0, 0)
             ON CONFLICT(tenant_ns, entity_id, store) DO UPDATE SET synced = 0",
            params![tenant_ns, entity_id, target.as_str()],
        )
        .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    pub fn mark_synced(&self, tenant_ns: &str, entity_id: &str, target: SyncTarget) -> MemoryResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sync_status SET synced = 1, last_error = NULL
             WHERE tenant_ns = ?1 AND entity_id = ?2 AND store = ?3",
            params![tenant_ns, entity_id, target.as_str()],
        )
        .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    pub fn mark_failed(
        &self,
        tenant_ns: &str,
        entity_id: &str,
        target: SyncTarget,
        error: &str,
    ) -> MemoryResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sync_status SET attempts = attempts + 1, last_error = ?1, last_attempt_at = ?2
             WHERE tenant_ns = ?3 AND entity_id = ?4 AND store = ?5",
            params![error, Utc::now().to_rfc3339(), tenant_ns, entity_id, target.as_str()],
        )
        .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Rows the reconciler should retry, oldest first, per spec §4.C8's
    /// "eventual consistency" sweep.
    pub fn pending(&self, tenant_ns: &str, limit: usize) -> MemoryResult<Vec<PendingSync>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT entity_id, store, attempts, last_error FROM sync_status
                 WHERE tenant_ns = ?1 AND synced = 0 ORDER BY last_attempt_at ASC NULLS FIRST LIMIT ?2",
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![tenant_ns, limit as i64], |row| {
                Ok(PendingSync {
                    entity_id: row.get(0)?,
                    store: row.get(1)?,
                    attempts: row.get(2)?,
                    last_error: row.get(3)?,
                })
            })
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))
    }

    /// Cross-tenant sweep for the background reconciler (spec §4.C8): unlike
    /// [`Self::pending`], which a caller uses once it already knows its own
    /// namespace, the reconciler is an ops-level maintenance loop with no
    /// caller-supplied tenant, so it scans every tenant's backlog at once —
    /// same global-sweep shape as [`super::MemoryStore::cleanup_old_data`].
    pub fn pending_all(&self, limit: usize) -> MemoryResult<Vec<(String, PendingSync)>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT tenant_ns, entity_id, store, attempts, last_error FROM sync_status
                 WHERE synced = 0 ORDER BY last_attempt_at ASC NULLS FIRST LIMIT ?1",
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    PendingSync {
                        entity_id: row.get(1)?,
                        store: row.get(2)?,
                        attempts: row.get(3)?,
                        last_error: row.get(4)?,
                    },
                ))
            })
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))
    }

    pub fn is_fully_synced(&self, tenant_ns: &str, entity_id: &str) -> MemoryResult<bool> {
        let conn = self.conn()?;
        let unsynced: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sync_status WHERE tenant_ns = ?1 AND entity_id = ?2 AND synced = 0",
                params![tenant_ns, entity_id],
                |row| row.get(0),
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(unsynced == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use r2d2::Pool;

    fn test_pool() -> Arc<Pool<SqliteConnectionManager>> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(4).build(manager).unwrap();
        {
            let conn = pool.get().unwrap();
            conn.execute_batch(crate::store::schema::SCHEMA_SQL).unwrap();
        }
        Arc::new(pool)
    }

    #[test]
    fn mark_pending_then_synced_clears_backlog() {
        let store = SyncStatusStore::new(test_pool());
        store.mark_pending("tenant-a", "e1", SyncTarget::KeywordIndex).unwrap();
        store.mark_pending("tenant-a", "e1", SyncTarget::VectorIndex).unwrap();
        assert!(!store.is_fully_synced("tenant-a", "e1").unwrap());

        store.mark_synced("tenant-a", "e1", SyncTarget::KeywordIndex).unwrap();
        assert!(!store.is_fully_synced("tenant-a", "e1").unwrap());

        store.mark_synced("tenant-a", "e1", SyncTarget::VectorIndex).unwrap();
        assert!(store.is_fully_synced("tenant-a", "e1").unwrap());
    }

    #[test]
    fn failed_sync_increments_attempts_and_stays_pending() {
        let store = SyncStatusStore::new(test_pool());
        store.mark_pending("tenant-a", "e1", SyncTarget::VectorIndex).unwrap();
        store
            .mark_failed("tenant-a", "e1", SyncTarget::VectorIndex, "index unavailable")
            .unwrap();
        let pending = store.pending("tenant-a", 10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("index unavailable"));
    }

    #[test]
    fn pending_is_isolated_across_tenants() {
        let store = SyncStatusStore::new(test_pool());
        store.mark_pending("tenant-a", "e1", SyncTarget::KeywordIndex).unwrap();
        assert!(store.pending("tenant-b", 10).unwrap().is_empty());
        assert!(store.is_fully_synced("tenant-b", "e1").unwrap());
    }

    #[test]
    fn pending_all_spans_every_tenant() {
        let store = SyncStatusStore::new(test_pool());
        store.mark_pending("tenant-a", "e1", SyncTarget::KeywordIndex).unwrap();
        store.mark_pending("tenant-b", "e2", SyncTarget::VectorIndex).unwrap();
        let pending = store.pending_all(10).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().any(|(ns, row)| ns == "tenant-a" && row.entity_id == "e1"));
        assert!(pending.iter().any(|(ns, row)| ns == "tenant-b" && row.entity_id == "e2"));
    }
}
