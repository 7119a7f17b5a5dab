//! Message buffer (C2): durable, ordered, per-conversation queue of unprocessed
//! raw messages. Grounded on the teacher's `ConversationHierarchy` — a
//! `DashMap` of per-conversation state guarded per-entry — generalized from an
//! in-memory cache into the durable store spec §4.C2 requires ("survive
//! process restarts"), with the DashMap layer kept as a hot read cache over
//! the SQLite-backed tail. `tenant_ns` threading on every method follows
//! spec.md:28 (C1).

use std::sync::Arc;

use dashmap::DashMap;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::debug;

use crate::errors::{MemoryError, MemoryResult};
use crate::memory::Message;

type CacheKey = (String, String);

/// Per-conversation FIFO, durable between process restarts. Three operations
/// per spec §4.C2: `append`, `drain` (atomic), `peek` (read-only snapshot).
pub struct MessageBuffer {
    pool: Arc<Pool<SqliteConnectionManager>>,
    /// Hot cache invalidated on drain; avoids a DB round trip for `peek` in
    /// the common case of a buffer that hasn't been drained since last read.
    /// Keyed by `(tenant_ns, conversation_id)`.
    cache: DashMap<CacheKey, Vec<Message>>,
}

impl MessageBuffer {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self {
            pool,
            cache: DashMap::new(),
        }
    }

    fn conn(&self) -> MemoryResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))
    }

    fn cache_key(tenant_ns: &str, conversation_id: &str) -> CacheKey {
        (tenant_ns.to_string(), conversation_id.to_string())
    }

    /// Atomic at the storage layer: one INSERT, no partial append (spec §4.C2
    /// failure contract).
    pub fn append(&self, tenant_ns: &str, conversation_id: &str, message: &Message) -> MemoryResult<()> {
        let conn = self.conn()?;
        let payload = serde_json::to_vec(message)
            .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
        conn.execute(
            "INSERT INTO pending_buffer (tenant_ns, conversation_id, seq, message_id, payload)
             VALUES (?1, ?2, (SELECT COALESCE(MAX(seq), 0) + 1 FROM pending_buffer WHERE tenant_ns = ?1 AND conversation_id = ?2), ?3, ?4)",
            params![tenant_ns, conversation_id, message.message_id, payload],
        )
        .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;
        self.cache.remove(&Self::cache_key(tenant_ns, conversation_id));
        debug!(conversation_id, "appended message to buffer");
        Ok(())
    }

    /// Read-only snapshot, ordered by insertion (creation order).
    pub fn peek(&self, tenant_ns: &str, conversation_id: &str) -> MemoryResult<Vec<Message>> {
        let key = Self::cache_key(tenant_ns, conversation_id);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }
        let messages = self.load_from_store(tenant_ns, conversation_id)?;
        self.cache.insert(key, messages.clone());
        Ok(messages)
    }

    fn load_from_store(&self, tenant_ns: &str, conversation_id: &str) -> MemoryResult<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT payload FROM pending_buffer WHERE tenant_ns = ?1 AND conversation_id = ?2 ORDER BY seq ASC")
            .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;
        let rows = stmt
            .query_map(params![tenant_ns, conversation_id], |row| {
                let payload: Vec<u8> = row.get(0)?;
                Ok(payload)
            })
            .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;

        let mut messages = Vec::new();
        for row in rows {
            let payload = row.map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;
            let message: Message = serde_json::from_slice(&payload)
                .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Atomic drain: returns and clears. If the subsequent extraction fails,
    /// the caller re-enqueues via `requeue` (spec §4.C2 failure contract,
    /// "re-enqueued to the head in original order").
    pub fn drain(&self, tenant_ns: &str, conversation_id: &str) -> MemoryResult<Vec<Message>> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;
        let messages = {
            let mut stmt = tx
                .prepare("SELECT payload FROM pending_buffer WHERE tenant_ns = ?1 AND conversation_id = ?2 ORDER BY seq ASC")
                .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;
            let rows = stmt
                .query_map(params![tenant_ns, conversation_id], |row| {
                    let payload: Vec<u8> = row.get(0)?;
                    Ok(payload)
                })
                .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                let payload = row.map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;
                let message: Message = serde_json::from_slice(&payload)
                    .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
                out.push(message);
            }
            out
        };
        tx.execute(
            "DELETE FROM pending_buffer WHERE tenant_ns = ?1 AND conversation_id = ?2",
            params![tenant_ns, conversation_id],
        )
        .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;
        tx.commit()
            .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;
        self.cache.remove(&Self::cache_key(tenant_ns, conversation_id));
        debug!(conversation_id, count = messages.len(), "drained buffer");
        Ok(messages)
    }

    /// Re-enqueue to the head in original order after a failed extraction.
    pub fn requeue(&self, tenant_ns: &str, conversation_id: &str, messages: Vec<Message>) -> MemoryResult<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;
        let existing_min: i64 = tx
            .query_row(
                "SELECT COALESCE(MIN(seq), 1) FROM pending_buffer WHERE tenant_ns = ?1 AND conversation_id = ?2",
                params![tenant_ns, conversation_id],
                |row| row.get(0),
            )
            .unwrap_or(1);
        for (idx, message) in messages.iter().enumerate() {
            let payload = serde_json::to_vec(message)
                .map_err(|e| MemoryError::Internal(anyhow::anyhow!(e)))?;
            let seq = existing_min - (messages.len() as i64) + idx as i64;
            tx.execute(
                "INSERT INTO pending_buffer (tenant_ns, conversation_id, seq, message_id, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![tenant_ns, conversation_id, seq, message.message_id, payload],
            )
            .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))?;
        self.cache.remove(&Self::cache_key(tenant_ns, conversation_id));
        Ok(())
    }

    pub fn len(&self, tenant_ns: &str, conversation_id: &str) -> MemoryResult<usize> {
        Ok(self.peek(tenant_ns, conversation_id)?.len())
    }

    pub fn is_empty(&self, tenant_ns: &str, conversation_id: &str) -> MemoryResult<bool> {
        Ok(self.len(tenant_ns, conversation_id)? == 0)
    }

    /// Total depth across every conversation for one tenant, used for the
    /// backpressure high-watermark check (spec §5).
    pub fn total_depth(&self, tenant_ns: &str) -> MemoryResult<i64> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM pending_buffer WHERE tenant_ns = ?1",
            params![tenant_ns],
            |row| row.get(0),
        )
        .map_err(|e| MemoryError::BufferUnavailable(e.to_string()))
    }
}
