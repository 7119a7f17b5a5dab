//! ConversationMeta store (C5). One row per `(tenant_ns, group_id)`; read by
//! the extraction pipeline to resolve the episode's `Scene` and timezone.
//! `tenant_ns` threading follows spec.md:28 (C1).

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::errors::{MemoryError, MemoryResult};
use crate::memory::ConversationMeta;

pub struct ConversationMetaStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ConversationMetaStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn conn(&self) -> MemoryResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!("pool exhausted: {e}")))
    }

    pub fn upsert(&self, tenant_ns: &str, meta: &ConversationMeta) -> MemoryResult<()> {
        let conn = self.conn()?;
        let payload = bincode::serialize(meta).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        conn.execute(
            "INSERT INTO conversation_meta (tenant_ns, group_id, payload) VALUES (?1, ?2, ?3)
             ON CONFLICT(tenant_ns, group_id) DO UPDATE SET payload = excluded.payload",
            params![tenant_ns, meta.group_id, payload],
        )
        .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }

    pub fn find(&self, tenant_ns: &str, group_id: &str) -> MemoryResult<Option<ConversationMeta>> {
        let conn = self.conn()?;
        let payload: Option<Vec<u8>> = conn
            .query_row(
                "SELECT payload FROM conversation_meta WHERE tenant_ns = ?1 AND group_id = ?2",
                params![tenant_ns, group_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        payload
            .map(|p| bincode::deserialize(&p).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e))))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Scene;
    use chrono::Utc;

    fn test_pool() -> Arc<Pool<SqliteConnectionManager>> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(4).build(manager).unwrap();
        {
            let conn = pool.get().unwrap();
            conn.execute_batch(crate::store::schema::SCHEMA_SQL).unwrap();
        }
        Arc::new(pool)
    }

    fn test_meta() -> ConversationMeta {
        ConversationMeta {
            group_id: "g1".to_string(),
            scene: Scene::Companion,
            name: "Planning chat".to_string(),
            description: None,
            created_at: Utc::now(),
            default_timezone: "UTC".to_string(),
            user_details: Default::default(),
            tags: vec![],
        }
    }

    #[test]
    fn upsert_then_find_round_trips() {
        let store = ConversationMetaStore::new(test_pool());
        store.upsert("tenant-a", &test_meta()).unwrap();
        let found = store.find("tenant-a", "g1").unwrap().unwrap();
        assert_eq!(found.scene, Scene::Companion);
    }

    #[test]
    fn unknown_group_returns_none() {
        let store = ConversationMetaStore::new(test_pool());
        assert!(store.find("tenant-a", "missing").unwrap().is_none());
    }

    #[test]
    fn same_group_id_is_isolated_across_tenants() {
        let store = ConversationMetaStore::new(test_pool());
        store.upsert("tenant-a", &test_meta()).unwrap();
        assert!(store.find("tenant-b", "g1").unwrap().is_none());
    }
}
