//! ForesightRecord store (C5). Same shape as [`super::event_log_store`] plus
//! the date-overlap query spec §4.C5 calls out explicitly, and the same
//! `tenant_ns` threading (spec.md:28, C1) on every method.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::errors::{MemoryError, MemoryResult};
use crate::memory::ForesightRecord;
use crate::scope::resolve_pair;

#[derive(Debug, Clone, Default)]
pub struct ForesightFilter {
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub overlaps_start: Option<NaiveDate>,
    pub overlaps_end: Option<NaiveDate>,
    pub limit: usize,
}

pub struct ForesightStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ForesightStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn conn(&self) -> MemoryResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!("pool exhausted: {e}")))
    }

    pub fn upsert(&self, tenant_ns: &str, record: &ForesightRecord) -> MemoryResult<()> {
        let conn = self.conn()?;
        let payload = bincode::serialize(record).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        conn.execute(
            "INSERT INTO foresight_records (tenant_ns, id, parent_id, user_id, group_id, start_time, end_time, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(tenant_ns, id) DO UPDATE SET
                payload = excluded.payload, start_time = excluded.start_time, end_time = excluded.end_time",
            params![
                tenant_ns,
                record.id,
                record.parent_id,
                record.scope.user_id,
                record.scope.group_id,
                record.start_time.map(|d| d.to_string()),
                record.end_time.map(|d| d.to_string()),
                payload,
            ],
        )
        .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    pub fn find(&self, tenant_ns: &str, id: &str) -> MemoryResult<Option<ForesightRecord>> {
        let conn = self.conn()?;
        let row: Option<(Vec<u8>, Option<String>)> = conn
            .query_row(
                "SELECT payload, deleted_at FROM foresight_records WHERE tenant_ns = ?1 AND id = ?2",
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

    /// Filters by scope, then by `record.overlaps(query_start, query_end)`
    /// in-process (spec §4.C5's exact overlap semantics live on the struct,
    /// not duplicated as SQL).
    pub fn find_by_filter(&self, tenant_ns: &str, filter: &ForesightFilter) -> MemoryResult<Vec<ForesightRecord>> {
        let (user_filter, group_filter) =
            resolve_pair(filter.user_id.as_deref(), filter.group_id.as_deref())?;
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT payload, user_id, group_id FROM foresight_records
                 WHERE tenant_ns = ?1 AND deleted_at IS NULL",
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        let rows = stmt
            .query_map(params![tenant_ns], |row| {
                let payload: Vec<u8> = row.get(0)?;
                let user_id: Option<String> = row.get(1)?;
                let group_id: Option<String> = row.get(2)?;
                Ok((payload, user_id, group_id))
            })
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;

        let mut out = Vec::new();
        for row in rows {
            let (payload, user_id, group_id) = row.map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
            if !user_filter.matches(user_id.as_deref()) || !group_filter.matches(group_id.as_deref()) {
                continue;
            }
            let record: ForesightRecord =
                bincode::deserialize(&payload).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
            if !record.overlaps(filter.overlaps_start, filter.overlaps_end) {
                continue;
            }
            out.push(record);
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
                "SELECT deleted_id FROM foresight_records WHERE tenant_ns = ?1 AND id = ?2",
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
                "SELECT COALESCE(MAX(deleted_id), 0) + 1 FROM foresight_records WHERE tenant_ns = ?1",
                params![tenant_ns],
                |row| row.get(0),
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        let updated = conn
            .execute(
                "UPDATE foresight_records SET deleted_at = ?1, deleted_by = ?2, deleted_id = ?3
                 WHERE tenant_ns = ?4 AND id = ?5 AND deleted_id = 0",
                params![Utc::now().to_rfc3339(), deleted_by, next_id, tenant_ns, id],
            )
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(updated > 0)
    }

    pub fn hard_delete(&self, tenant_ns: &str, id: &str) -> MemoryResult<bool> {
        let conn = self.conn()?;
        let deleted = conn
            .execute(
                "DELETE FROM foresight_records WHERE tenant_ns = ?1 AND id = ?2",
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

    fn test_record(id: &str, start: &str, end: &str) -> ForesightRecord {
        ForesightRecord {
            id: id.to_string(),
            parent_type: ParentType::Memcell,
            parent_id: "m1".to_string(),
            scope: Scope {
                user_id: Some("u1".to_string()),
                group_id: None,
            },
            content: "trip to Japan".to_string(),
            evidence: "booked flights".to_string(),
            start_time: Some(NaiveDate::parse_from_str(start, "%Y-%m-%d").unwrap()),
            end_time: Some(NaiveDate::parse_from_str(end, "%Y-%m-%d").unwrap()),
            duration_days: Some(29),
            vector: vec![0.1],
            vector_model: "test-embed".to_string(),
        }
    }

    #[test]
    fn find_by_filter_applies_date_overlap() {
        let store = ForesightStore::new(test_pool());
        store.upsert("tenant-a", &test_record("f1", "2024-06-01", "2024-06-30")).unwrap();
        store.upsert("tenant-a", &test_record("f2", "2024-08-01", "2024-08-31")).unwrap();

        let filter = ForesightFilter {
            user_id: Some("u1".to_string()),
            overlaps_start: Some(NaiveDate::parse_from_str("2024-06-15", "%Y-%m-%d").unwrap()),
            overlaps_end: Some(NaiveDate::parse_from_str("2024-07-15", "%Y-%m-%d").unwrap()),
            ..Default::default()
        };
        let results = store.find_by_filter("tenant-a", &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "f1");
    }

    #[test]
    fn find_by_filter_excludes_other_tenants_overlapping_dates() {
        let store = ForesightStore::new(test_pool());
        store.upsert("tenant-a", &test_record("f1", "2024-06-01", "2024-06-30")).unwrap();
        store.upsert("tenant-b", &test_record("f2", "2024-06-01", "2024-06-30")).unwrap();

        let filter = ForesightFilter {
            user_id: Some("u1".to_string()),
            overlaps_start: Some(NaiveDate::parse_from_str("2024-06-15", "%Y-%m-%d").unwrap()),
            overlaps_end: Some(NaiveDate::parse_from_str("2024-07-15", "%Y-%m-%d").unwrap()),
            ..Default::default()
        };
        let results = store.find_by_filter("tenant-a", &filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "f1");
    }
}
