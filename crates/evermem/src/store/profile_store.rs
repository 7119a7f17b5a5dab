//! UserProfile store (C5). Versioned upsert: every write bumps `version` and
//! only the latest row per `(tenant_ns, user_id, group_id)` is retained
//! (spec §3). `tenant_ns` threading follows spec.md:28 (C1).

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};

use crate::errors::{MemoryError, MemoryResult};
use crate::memory::UserProfile;

pub struct ProfileStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ProfileStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn conn(&self) -> MemoryResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!("pool exhausted: {e}")))
    }

    fn group_key(group_id: Option<&str>) -> &str {
        group_id.unwrap_or("")
    }

    pub fn find(&self, tenant_ns: &str, user_id: &str, group_id: Option<&str>) -> MemoryResult<Option<UserProfile>> {
        let conn = self.conn()?;
        let payload: Option<Vec<u8>> = conn
            .query_row(
                "SELECT payload FROM user_profiles WHERE tenant_ns = ?1 AND user_id = ?2 AND group_id = ?3",
                params![tenant_ns, user_id, Self::group_key(group_id)],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        payload
            .map(|p| bincode::deserialize(&p).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e))))
            .transpose()
    }

    /// Merges `update` into the current profile (if any), bumping `version`
    /// by one, and persists the result. Returns the new version.
    pub fn upsert_with_merge(
        &self,
        tenant_ns: &str,
        user_id: &str,
        group_id: Option<&str>,
        merge: impl FnOnce(Option<UserProfile>) -> UserProfile,
    ) -> MemoryResult<u64> {
        let current = self.find(tenant_ns, user_id, group_id)?;
        let next_version = current.as_ref().map(|p| p.version + 1).unwrap_or(1);
        let mut next = merge(current);
        next.version = next_version;
        self.upsert(tenant_ns, &next)?;
        Ok(next_version)
    }

    pub fn upsert(&self, tenant_ns: &str, profile: &UserProfile) -> MemoryResult<()> {
        let conn = self.conn()?;
        let payload = bincode::serialize(profile).map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        conn.execute(
            "INSERT INTO user_profiles (tenant_ns, user_id, group_id, version, payload)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(tenant_ns, user_id, group_id) DO UPDATE SET
                version = excluded.version, payload = excluded.payload",
            params![
                tenant_ns,
                profile.user_id,
                Self::group_key(profile.group_id.as_deref()),
                profile.version as i64,
                payload,
            ],
        )
        .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        Ok(())
    }
}
