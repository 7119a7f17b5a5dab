//! EventLogRecord store (C5): one row per atomic fact, joined off a MemCell
//! via `parent_id`. Same pool/filter/soft-delete conventions as
//! [`super::memcell_store`], including the `tenant_ns` threading spec.md:28
//! (C1) requires for every read/write.

use std::sync::Arc;

use chrono::Utc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::errors::{MemoryError, MemoryResult};
use crate::memory::EventLogRecord;
use crate::scope::resolve_pair;

#[derive(Debug, Clone, Default)]
pub struct EventLogFilter {
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub parent_id: Option<String>,
    pub limit: usize,
}

pub struct EventLogStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl EventLogStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn conn(&self) -> MemoryResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!("pool exhausted: {e}")))
    }

    pub fn upsert(&self, tenant_ns: &str, record: &EventLogRecord) -> MemoryResult<()> {
        let conn = self.conn()?;
        let payload = bincode::serialize(record).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        conn.execute(
            "INSERT INTO event_log_records (tenant_ns, id, parent_id, user_id, group_id, timestamp, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(tenant_ns, id) DO UPDATE SET payload = excluded.payload, timestamp = excluded.timestamp",
            params![
                tenant_ns,
                record.id,
                record.parent_id,
                record.scope.user_id,
                record.scope.group_id,
                record.timestamp.to_rfc3339(),
                payload,
            ],
        )
        .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    pub fn find(&self, tenant_ns: &str, id: &str) -> MemoryResult<Option<EventLogRecord>> {
        let conn = self.conn()?;
        let row: Option<(Vec<u8>, Option<String>)> = conn
            .query_row(
                "SELECT payload, deleted_at FROM event_log_records WHERE tenant_ns = ?1 AND id = ?2",
                params![tenant_ns, id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        match row {
            None | Some((_, Some(_))) => Ok(None),
            Some((payload, None)) => Ok(Some(
                bincode::deserialize(&payload).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?,
            )),
        }
    }

    pub fn find_by_filter(&self, tenant_ns: &str, filter: &EventLogFilter) -> MemoryResult<Vec<EventLogRecord>> {
        let (user_filter, group_filter) =
            resolve_pair(filter.user_id.as_deref(), filter.group_id.as_deref())?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT payload, user_id, group_id, parent_id FROM event_log_records
                 WHERE tenant_ns = ?1 AND deleted_at IS NULL ORDER BY timestamp ASC",
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![tenant_ns], |row| {
                let payload: Vec<u8> = row.get(0)?;
                let user_id: Option<String> = row.get(1)?;
                let group_id: Option<String> = row.get(2)?;
                let parent_id: String = row.get(3)?;
                Ok((payload, user_id, group_id, parent_id))
            })
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;

        let mut out = Vec::new();
        for row in rows {
            let (payload, user_id, group_id, parent_id) =
                row.map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
            if !user_filter.matches(user_id.as_deref()) || !group_filter.matches(group_id.as_deref()) {
                continue;
            }
            if let Some(want) = &filter.parent_id {
                if &parent_id != want {
                    continue;
                }
            }
            out.push(bincode::deserialize(&payload).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?);
        }
        if filter.limit > 0 {
            out.truncate(filter.limit);
        }
        Ok(out)
    }

    pub fn soft_delete(&self, tenant_ns: &str, id: &str, deleted_by: &str) -> MemoryResult<bool> {
        let conn = self.conn()?;
        let already_deleted: Option<i64> = conn
            .query_row(
                "SELECT deleted_id FROM event_log_records WHERE tenant_ns = ?1 AND id = ?2",
                params![tenant_ns, id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        match already_deleted {
            None => return Ok(false),
            Some(id) if id != 0 => return Ok(false),
            Some(_) => {}
        }
        let next_id: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(deleted_id), 0) + 1 FROM event_log_records WHERE tenant_ns = ?1",
                params![tenant_ns],
                |row| row.get(0),
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        let updated = conn
            .execute(
                "UPDATE event_log_records SET deleted_at = ?1, deleted_by = ?2, deleted_id = ?3
                 WHERE tenant_ns = ?4 AND id = ?5 AND deleted_id = 0",
                params![Utc::now().to_rfc3339(), deleted_by, next_id, tenant_ns, id],
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(updated > 0)
    }

    /// Soft-deletes every fact hanging off a MemCell, invoked when the parent
    /// episode is deleted (cascading audit, spec §4.C5).
    pub fn soft_delete_by_parent(&self, tenant_ns: &str, parent_id: &str, deleted_by: &str) -> MemoryResult<usize> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id FROM event_log_records WHERE tenant_ns = ?1 AND parent_id = ?2 AND deleted_id = 0")
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        let ids: Vec<String> = stmt
            .query_map(params![tenant_ns, parent_id], |row| row.get(0))
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?
            .collect::<Result<_, _>>()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        drop(stmt);
        let mut count = 0;
        for id in ids {
            if self.soft_delete(tenant_ns, &id, deleted_by)? {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn hard_delete(&self, tenant_ns: &str, id: &str) -> MemoryResult<bool> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM event_log_records WHERE tenant_ns = ?1 AND id = ?2",
                params![tenant_ns, id],
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{ParentType, Scope};

    fn test_pool() -> Arc<Pool<SqliteConnectionManager>> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(4).build(manager).unwrap();
        {
            let conn = pool.get().unwrap();
            conn.execute_batch(crate::store::schema::SCHEMA_SQL).unwrap();
        }
        Arc::new(pool)
    }

    fn test_record(id: &str, parent_id: &str, group_id: &str) -> EventLogRecord {
        EventLogRecord {
            id: id.to_string(),
            parent_type: ParentType::Memcell,
            parent_id: parent_id.to_string(),
            scope: Scope {
                user_id: None,
                group_id: Some(group_id.to_string()),
            },
            atomic_fact: "fact".to_string(),
            timestamp: Utc::now(),
            vector: vec![0.1],
            vector_model: "test-embed".to_string(),
            participants: None,
            event_type: None,
            extend: Default::default(),
        }
    }

    #[test]
    fn upsert_then_find_round_trips() {
        let store = EventLogStore::new(test_pool());
        store.upsert("tenant-a", &test_record("f1", "m1", "g1")).unwrap();
        assert_eq!(store.find("tenant-a", "f1").unwrap().unwrap().atomic_fact, "fact");
    }

    #[test]
    fn find_is_isolated_across_tenants() {
        let store = EventLogStore::new(test_pool());
        store.upsert("tenant-a", &test_record("f1", "m1", "g1")).unwrap();
        assert!(store.find("tenant-b", "f1").unwrap().is_none());
    }

    #[test]
    fn find_by_parent_filters_to_one_episode() {
        let store = EventLogStore::new(test_pool());
        store.upsert("tenant-a", &test_record("f1", "m1", "g1")).unwrap();
        store.upsert("tenant-a", &test_record("f2", "m2", "g1")).unwrap();
        let filter = EventLogFilter {
            parent_id: Some("m1".to_string()),
            ..Default::default()
        };
        let results = store.find_by_filter("tenant-a", &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "f1");
    }

    #[test]
    fn cascading_soft_delete_by_parent() {
        let store = EventLogStore::new(test_pool());
        store.upsert("tenant-a", &test_record("f1", "m1", "g1")).unwrap();
        store.upsert("tenant-a", &test_record("f2", "m1", "g1")).unwrap();
        store.upsert("tenant-a", &test_record("f3", "m2", "g1")).unwrap();
        let count = store.soft_delete_by_parent("tenant-a", "m1", "admin").unwrap();
        assert_eq!(count, 2);
        assert!(store.find("tenant-a", "f1").unwrap().is_none());
        assert!(store.find("tenant-a", "f3").unwrap().is_some());
    }
}
