//! Schema migration, grounded on the teacher's `MigrationManager` pattern: a
//! `schema_version` table gates re-running `SCHEMA_SQL`, plus maintenance
//! helpers (`cleanup_old_data`, `get_database_stats`) called from the
//! reconciler's periodic sweep and from ops tooling.

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

use super::schema::SCHEMA_SQL;

// v2 added the `tenant_ns` column (and folded it into every primary key) across
// every tenant-owned table; no ALTER path is provided since pre-v2 rows carry
// no namespace to backfill from.
const CURRENT_SCHEMA_VERSION: i32 = 2;

pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub memcells: i64,
    pub event_log_records: i64,
    pub foresight_records: i64,
    pub user_profiles: i64,
    pub pending_buffer_rows: i64,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    pub fn initialize_database(&mut self) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        let current: Option<i32> = self
            .conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .ok();
        match current {
            Some(v) if v == CURRENT_SCHEMA_VERSION => {}
            Some(v) => {
                info!("Migrating EverMem schema from v{} to v{}", v, CURRENT_SCHEMA_VERSION);
                self.conn.execute(
                    "UPDATE schema_version SET version = ?1",
                    [CURRENT_SCHEMA_VERSION],
                )?;
            }
            None => {
                self.conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    [CURRENT_SCHEMA_VERSION],
                )?;
            }
        }
        info!("EverMem store initialized at schema v{}", CURRENT_SCHEMA_VERSION);
        Ok(())
    }

    /// Hard-deletes soft-deleted rows older than `older_than_days`, an
    /// ops-triggered purge distinct from the reconciler's projection sweep.
    pub fn cleanup_old_data(&mut self, older_than_days: i32) -> Result<usize> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(older_than_days as i64);
        let cutoff_str = cutoff.to_rfc3339();
        let tx = self.conn.transaction()?;
        let mut removed = 0usize;
        removed += tx.execute(
            "DELETE FROM memcells WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
            [&cutoff_str],
        )?;
        removed += tx.execute(
            "DELETE FROM event_log_records WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
            [&cutoff_str],
        )?;
        removed += tx.execute(
            "DELETE FROM foresight_records WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
            [&cutoff_str],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

pub fn get_database_stats(conn: &Connection) -> Result<DatabaseStats> {
    Ok(DatabaseStats {
        memcells: conn.query_row("SELECT COUNT(*) FROM memcells WHERE deleted_at IS NULL", [], |r| r.get(0))?,
        event_log_records: conn.query_row(
            "SELECT COUNT(*) FROM event_log_records WHERE deleted_at IS NULL",
            [],
            |r| r.get(0),
        )?,
        foresight_records: conn.query_row(
            "SELECT COUNT(*) FROM foresight_records WHERE deleted_at IS NULL",
            [],
            |r| r.get(0),
        )?,
        user_profiles: conn.query_row("SELECT COUNT(*) FROM user_profiles", [], |r| r.get(0))?,
        pending_buffer_rows: conn.query_row("SELECT COUNT(*) FROM pending_buffer", [], |r| r.get(0))?,
    })
}
