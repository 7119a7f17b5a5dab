//! MemCell half of the memory store (C5), grounded on the teacher's
//! `ConversationStore` (pool-backed CRUD over one rusqlite table, row<->struct
//! mapping, `UNIQUE` + `INSERT OR REPLACE` upsert semantics), generalized to
//! carry the soft-delete + three-valued scope contract spec §4.C5 requires.
//!
//! Every method takes the caller's `tenant_ns` (spec.md:28, C1) and folds it
//! into the `WHERE`/`PRIMARY KEY` so one tenant can never read, overwrite, or
//! soft-delete another tenant's row by guessing its `event_id`.

use std::sync::Arc;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::errors::{MemoryError, MemoryResult};
use crate::memory::MemCell;
use crate::scope::resolve_pair;

#[derive(Debug, Clone, Default)]
pub struct MemCellFilter {
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub time_range: Option<(chrono::DateTime<Utc>, chrono::DateTime<Utc>)>,
    pub limit: usize,
    pub offset: usize,
    pub sort_desc: bool,
}

pub struct MemCellStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl MemCellStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn conn(&self) -> MemoryResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!("pool exhausted: {e}")))
    }

    pub fn upsert(&self, tenant_ns: &str, cell: &MemCell) -> MemoryResult<()> {
        if !cell.has_single_primary_scope() {
            return Err(MemoryError::ValidationError(
                "exactly one of user_id/group_id must be set on a MemCell".to_string(),
            ));
        }
        if !cell.event_log.is_aligned() {
            return Err(MemoryError::ValidationError(
                "event_log.atomic_fact and fact_embeddings must be the same length".to_string(),
            ));
        }
        let conn = self.conn()?;
        let payload = bincode::serialize(cell).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        conn.execute(
            "INSERT INTO memcells (tenant_ns, event_id, user_id, group_id, timestamp, payload, deleted_at, deleted_by, deleted_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(tenant_ns, event_id) DO UPDATE SET
                user_id = excluded.user_id,
                group_id = excluded.group_id,
                timestamp = excluded.timestamp,
                payload = excluded.payload",
            params![
                tenant_ns,
                cell.event_id,
                cell.scope.user_id,
                cell.scope.group_id,
                cell.timestamp.to_rfc3339(),
                payload,
                cell.deletion.deleted_at.map(|t| t.to_rfc3339()),
                cell.deletion.deleted_by,
                cell.deletion.deleted_id as i64,
            ],
        )
        .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    pub fn find(&self, tenant_ns: &str, event_id: &str) -> MemoryResult<Option<MemCell>> {
        let conn = self.conn()?;
        let row: Option<(Vec<u8>, Option<String>)> = conn
            .query_row(
                "SELECT payload, deleted_at FROM memcells WHERE tenant_ns = ?1 AND event_id = ?2",
                params![tenant_ns, event_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        match row {
            None => Ok(None),
            Some((_, Some(_))) => Ok(None), // soft-deleted, invisible to standard find
            Some((payload, None)) => {
                let cell: MemCell =
                    bincode::deserialize(&payload).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
                Ok(Some(cell))
            }
        }
    }

    /// Bypasses the soft-delete filter; escape hatch for ops/tests. Still
    /// tenant-scoped: an ops tool operates within one tenant at a time.
    pub fn hard_find(&self, tenant_ns: &str, event_id: &str) -> MemoryResult<Option<MemCell>> {
        let conn = self.conn()?;
        let payload: Option<Vec<u8>> = conn
            .query_row(
                "SELECT payload FROM memcells WHERE tenant_ns = ?1 AND event_id = ?2",
                params![tenant_ns, event_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        payload
            .map(|p| bincode::deserialize(&p).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e))))
            .transpose()
    }

    pub fn find_by_filter(&self, tenant_ns: &str, filter: &MemCellFilter) -> MemoryResult<Vec<MemCell>> {
        let (user_filter, group_filter) =
            resolve_pair(filter.user_id.as_deref(), filter.group_id.as_deref())?;
        let conn = self.conn()?;
        let order = if filter.sort_desc { "DESC" } else { "ASC" };
        let query = format!(
            "SELECT payload, user_id, group_id, timestamp FROM memcells
             WHERE tenant_ns = ?1 AND deleted_at IS NULL
             ORDER BY timestamp {order}"
        );
        let mut stmt = conn.prepare(&query).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![tenant_ns], |row| {
                let payload: Vec<u8> = row.get(0)?;
                let user_id: Option<String> = row.get(1)?;
                let group_id: Option<String> = row.get(2)?;
                let timestamp: String = row.get(3)?;
                Ok((payload, user_id, group_id, timestamp))
            })
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;

        let mut out = Vec::new();
        for row in rows {
            let (payload, user_id, group_id, timestamp_str) =
                row.map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
            if !user_filter.matches(user_id.as_deref()) || !group_filter.matches(group_id.as_deref()) {
                continue;
            }
            if let Some((start, end)) = filter.time_range {
                let ts = chrono::DateTime::parse_from_rfc3339(&timestamp_str)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
                if ts < start || ts > end {
                    continue;
                }
            }
            let cell: MemCell =
                bincode::deserialize(&payload).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
            out.push(cell);
        }
        if filter.limit > 0 {
            let offset = filter.offset.min(out.len());
            out = out.into_iter().skip(offset).take(filter.limit).collect();
        }
        Ok(out)
    }

    /// Sets `deleted_at`/`deleted_by`/`deleted_id`; never overwrites a
    /// non-zero `deleted_id` (spec §4.C5, audit immutability — S8.8).
    pub fn soft_delete(&self, tenant_ns: &str, event_id: &str, deleted_by: &str) -> MemoryResult<bool> {
        let conn = self.conn()?;
        let already_deleted: Option<i64> = conn
            .query_row(
                "SELECT deleted_id FROM memcells WHERE tenant_ns = ?1 AND event_id = ?2",
                params![tenant_ns, event_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        match already_deleted {
            None => return Ok(false), // no such entity
            Some(id) if id != 0 => return Ok(false), // idempotent no-op
            Some(_) => {}
        }
        let next_id: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(deleted_id), 0) + 1 FROM memcells WHERE tenant_ns = ?1",
                params![tenant_ns],
                |row| row.get(0),
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        let updated = conn
            .execute(
                "UPDATE memcells SET deleted_at = ?1, deleted_by = ?2, deleted_id = ?3
                 WHERE tenant_ns = ?4 AND event_id = ?5 AND deleted_id = 0",
                params![Utc::now().to_rfc3339(), deleted_by, next_id, tenant_ns, event_id],
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(updated > 0)
    }

    pub fn hard_delete(&self, tenant_ns: &str, event_id: &str) -> MemoryResult<bool> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM memcells WHERE tenant_ns = ?1 AND event_id = ?2",
                params![tenant_ns, event_id],
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{DeletionAudit, EventLog, MemCellType, Scope};

    fn test_pool() -> Arc<Pool<SqliteConnectionManager>> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(4).build(manager).unwrap();
        {
            let conn = pool.get().unwrap();
            conn.execute_batch(crate::store::schema::SCHEMA_SQL).unwrap();
        }
        Arc::new(pool)
    }

    fn test_cell(event_id: &str, group_id: &str) -> MemCell {
        MemCell {
            event_id: event_id.to_string(),
            scope: Scope {
                user_id: None,
                group_id: Some(group_id.to_string()),
            },
            timestamp: Utc::now(),
            subject: "subject".to_string(),
            summary: "summary".to_string(),
            episode: "episode".to_string(),
            participants: vec!["u1".to_string()],
            keywords: vec![],
            r#type: MemCellType::Conversation,
            original_data: vec![],
            semantic_memories: vec![],
            event_log: EventLog::default(),
            embedding: vec![0.1, 0.2],
            deletion: DeletionAudit::default(),
        }
    }

    #[test]
    fn upsert_then_find_round_trips() {
        let store = MemCellStore::new(test_pool());
        let cell = test_cell("e1", "g1");
        store.upsert("tenant-a", &cell).unwrap();
        let found = store.find("tenant-a", "e1").unwrap().unwrap();
        assert_eq!(found.subject, "subject");
    }

    #[test]
    fn same_event_id_is_isolated_across_tenants() {
        let store = MemCellStore::new(test_pool());
        store.upsert("tenant-a", &test_cell("e1", "g1")).unwrap();
        // tenant-b never wrote "e1"; it must not see tenant-a's row.
        assert!(store.find("tenant-b", "e1").unwrap().is_none());

        let mut other = test_cell("e1", "g1");
        other.subject = "tenant-b's own e1".to_string();
        store.upsert("tenant-b", &other).unwrap();
        assert_eq!(store.find("tenant-a", "e1").unwrap().unwrap().subject, "subject");
        assert_eq!(
            store.find("tenant-b", "e1").unwrap().unwrap().subject,
            "tenant-b's own e1"
        );
    }

    #[test]
    fn soft_delete_hides_from_find_but_not_hard_find() {
        let store = MemCellStore::new(test_pool());
        store.upsert("tenant-a", &test_cell("e1", "g1")).unwrap();
        assert!(store.soft_delete("tenant-a", "e1", "admin").unwrap());
        assert!(store.find("tenant-a", "e1").unwrap().is_none());
        assert!(store.hard_find("tenant-a", "e1").unwrap().is_some());
    }

    #[test]
    fn soft_delete_does_not_cross_tenant_boundaries() {
        let store = MemCellStore::new(test_pool());
        store.upsert("tenant-a", &test_cell("e1", "g1")).unwrap();
        // tenant-b deleting "e1" must be a no-op; it never owned it.
        assert!(!store.soft_delete("tenant-b", "e1", "attacker").unwrap());
        assert!(store.find("tenant-a", "e1").unwrap().is_some());
    }

    #[test]
    fn soft_delete_audit_is_immutable_on_repeat() {
        let store = MemCellStore::new(test_pool());
        store.upsert("tenant-a", &test_cell("e1", "g1")).unwrap();
        assert!(store.soft_delete("tenant-a", "e1", "admin").unwrap());
        // second delete is a no-op: returns false, deleted_by unchanged
        assert!(!store.soft_delete("tenant-a", "e1", "someone_else").unwrap());
        let conn = store.pool.get().unwrap();
        let deleted_by: String = conn
            .query_row(
                "SELECT deleted_by FROM memcells WHERE tenant_ns = 'tenant-a' AND event_id = 'e1'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(deleted_by, "admin");
    }

    #[test]
    fn find_by_filter_respects_scope_contract() {
        let store = MemCellStore::new(test_pool());
        store.upsert("tenant-a", &test_cell("e1", "g1")).unwrap();
        store.upsert("tenant-a", &test_cell("e2", "g2")).unwrap();

        let filter = MemCellFilter {
            group_id: Some("g1".to_string()),
            limit: 10,
            ..Default::default()
        };
        let results = store.find_by_filter("tenant-a", &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_id, "e1");
    }

    #[test]
    fn find_by_filter_excludes_other_tenants() {
        let store = MemCellStore::new(test_pool());
        store.upsert("tenant-a", &test_cell("e1", "g1")).unwrap();
        store.upsert("tenant-b", &test_cell("e2", "g1")).unwrap();

        let filter = MemCellFilter {
            group_id: Some("g1".to_string()),
            limit: 10,
            ..Default::default()
        };
        let results = store.find_by_filter("tenant-a", &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].event_id, "e1");
    }

    #[test]
    fn find_by_filter_rejects_both_all() {
        let store = MemCellStore::new(test_pool());
        let filter = MemCellFilter {
            user_id: Some("__all__".to_string()),
            group_id: Some("__all__".to_string()),
            limit: 10,
            ..Default::default()
        };
        assert!(matches!(
            store.find_by_filter("tenant-a", &filter),
            Err(MemoryError::ScopeTooBroad)
        ));
    }

    #[test]
    fn soft_delete_on_missing_entity_is_a_no_op() {
        let store = MemCellStore::new(test_pool());
        assert!(!store.soft_delete("tenant-a", "missing", "admin").unwrap());
    }

    #[test]
    fn find_by_filter_hides_soft_deleted() {
        let store = MemCellStore::new(test_pool());
        store.upsert("tenant-a", &test_cell("e1", "g1")).unwrap();
        store.soft_delete("tenant-a", "e1", "admin").unwrap();
        let filter = MemCellFilter {
            group_id: Some("g1".to_string()),
            limit: 10,
            ..Default::default()
        };
        assert!(store.find_by_filter("tenant-a", &filter).unwrap().is_empty());
    }
}
