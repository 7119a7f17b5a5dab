//! Memory store (C5): the durable document store behind MemCells, event-log
//! records, foresight records, profiles, and conversation metadata. Grounded
//! on the teacher's `memory_db::MemoryDatabase` — r2d2-pooled SQLite, PRAGMAs
//! tuned the same way, migration run once at construction.

pub mod conversation_meta_store;
pub mod event_log_store;
pub mod foresight_store;
pub mod memcell_store;
pub mod migration;
pub mod profile_store;
pub mod schema;
pub mod sync_status;

use std::sync::Arc;

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};

use crate::errors::{MemoryError, MemoryResult};
use crate::memory::{EventLogRecord, ForesightRecord, MemCell};

pub use conversation_meta_store::ConversationMetaStore;
pub use event_log_store::{EventLogFilter, EventLogStore};
pub use foresight_store::{ForesightFilter, ForesightStore};
pub use memcell_store::{MemCellFilter, MemCellStore};
pub use migration::{DatabaseStats, MigrationManager};
pub use profile_store::ProfileStore;
pub use sync_status::SyncStatusStore;

/// Aggregates the per-entity stores over one pooled SQLite connection, the
/// way the teacher's `MemoryDatabase` aggregates `ConversationStore` +
/// `EmbeddingStore` + `MessageStore`.
pub struct MemoryStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
    pub memcells: MemCellStore,
    pub event_log: EventLogStore,
    pub foresight: ForesightStore,
    pub profiles: ProfileStore,
    pub conversation_meta: ConversationMetaStore,
    pub sync_status: SyncStatusStore,
}

impl MemoryStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path).with_init(apply_pragmas);
        Self::from_manager(manager)
    }

    pub fn new_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(apply_pragmas);
        Self::from_manager(manager)
    }

    fn from_manager(manager: SqliteConnectionManager) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .context("failed to build sqlite connection pool")?;
        {
            let mut conn = pool.get().context("failed to obtain init connection")?;
            MigrationManager::new(&mut conn)
                .initialize_database()
                .context("schema migration failed")?;
        }
        let pool = Arc::new(pool);
        Ok(Self {
            memcells: MemCellStore::new(pool.clone()),
            event_log: EventLogStore::new(pool.clone()),
            foresight: ForesightStore::new(pool.clone()),
            profiles: ProfileStore::new(pool.clone()),
            conversation_meta: ConversationMetaStore::new(pool.clone()),
            sync_status: SyncStatusStore::new(pool.clone()),
            pool,
        })
    }

    pub fn pool(&self) -> Arc<Pool<SqliteConnectionManager>> {
        self.pool.clone()
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        let conn = self.pool.get().context("pool exhausted")?;
        migration::get_database_stats(&conn)
    }

    pub fn cleanup_old_data(&self, older_than_days: i32) -> Result<usize> {
        let mut conn = self.pool.get().context("pool exhausted")?;
        MigrationManager::new(&mut conn).cleanup_old_data(older_than_days)
    }

    /// Atomically lands a MemCell plus its EventLogRecords and ForesightRecords
    /// in one SQLite transaction — "either all of {MemCell, its EventLogRecords,
    /// its ForesightRecords} land, or none" (spec §4.C4). `tenant_ns` scopes
    /// every row written, per spec.md:28 (C1).
    pub fn commit_episode(
        &self,
        tenant_ns: &str,
        cell: &MemCell,
        event_logs: &[EventLogRecord],
        foresight: &[ForesightRecord],
    ) -> MemoryResult<()> {
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
        let mut conn = self
            .pool
            .get()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!("pool exhausted: {e}")))?;
        let tx = conn
            .transaction()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;

        let cell_payload = bincode::serialize(cell).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        tx.execute(
            "INSERT INTO memcells (tenant_ns, event_id, user_id, group_id, timestamp, payload, deleted_at, deleted_by, deleted_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, 0)
             ON CONFLICT(tenant_ns, event_id) DO UPDATE SET
                user_id = excluded.user_id, group_id = excluded.group_id,
                timestamp = excluded.timestamp, payload = excluded.payload",
            params![
                tenant_ns,
                cell.event_id,
                cell.scope.user_id,
                cell.scope.group_id,
                cell.timestamp.to_rfc3339(),
                cell_payload,
            ],
        )
        .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;

        for record in event_logs {
            let payload = bincode::serialize(record).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
            tx.execute(
                "INSERT INTO event_log_records (tenant_ns, id, parent_id, user_id, group_id, timestamp, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(tenant_ns, id) DO UPDATE SET payload = excluded.payload",
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
        }

        for record in foresight {
            let payload = bincode::serialize(record).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
            tx.execute(
                "INSERT INTO foresight_records (tenant_ns, id, parent_id, user_id, group_id, start_time, end_time, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(tenant_ns, id) DO UPDATE SET payload = excluded.payload",
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
        }

        tx.commit().map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }
}

fn apply_pragmas(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )
}
