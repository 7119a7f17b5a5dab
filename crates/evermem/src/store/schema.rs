//! Document-store schema (C5). One table per entity family, indexed by
//! `user_id`, `group_id`, `timestamp`/`parent_id`, and `deleted_at` per spec
//! §6 "Persisted state layout". Grounded on the teacher's `schema::SCHEMA_SQL`
//! constant + migration-table convention.
//!
//! Every tenant-owned table carries a leading `tenant_ns` column (spec.md:28,
//! C1: "route it to the correct document collection") and folds it into the
//! primary key, so two tenants can never collide on the same entity id and no
//! query can return a row without supplying the caller's namespace.

pub const SCHEMA_SQL: &str = "
-- Raw message buffer (C2), durable between process restarts.
CREATE TABLE IF NOT EXISTS pending_buffer (
    tenant_ns TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    message_id TEXT NOT NULL,
    payload BLOB NOT NULL,
    PRIMARY KEY (tenant_ns, conversation_id, seq)
);
CREATE INDEX IF NOT EXISTS idx_pending_buffer_conversation ON pending_buffer (tenant_ns, conversation_id);

-- MemCells (episodes).
CREATE TABLE IF NOT EXISTS memcells (
    tenant_ns TEXT NOT NULL,
    event_id TEXT NOT NULL,
    user_id TEXT,
    group_id TEXT,
    timestamp TEXT NOT NULL,
    payload BLOB NOT NULL,
    deleted_at TEXT,
    deleted_by TEXT,
    deleted_id INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (tenant_ns, event_id)
);
CREATE INDEX IF NOT EXISTS idx_memcells_user ON memcells (tenant_ns, user_id);
CREATE INDEX IF NOT EXISTS idx_memcells_group ON memcells (tenant_ns, group_id);
CREATE INDEX IF NOT EXISTS idx_memcells_timestamp ON memcells (tenant_ns, timestamp);
CREATE INDEX IF NOT EXISTS idx_memcells_deleted ON memcells (tenant_ns, deleted_at);

-- Event log / atomic facts.
CREATE TABLE IF NOT EXISTS event_log_records (
    tenant_ns TEXT NOT NULL,
    id TEXT NOT NULL,
    parent_id TEXT NOT NULL,
    user_id TEXT,
    group_id TEXT,
    timestamp TEXT NOT NULL,
    payload BLOB NOT NULL,
    deleted_at TEXT,
    deleted_by TEXT,
    deleted_id INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (tenant_ns, id)
);
CREATE INDEX IF NOT EXISTS idx_event_log_parent ON event_log_records (tenant_ns, parent_id);
CREATE INDEX IF NOT EXISTS idx_event_log_user ON event_log_records (tenant_ns, user_id);
CREATE INDEX IF NOT EXISTS idx_event_log_group ON event_log_records (tenant_ns, group_id);
CREATE INDEX IF NOT EXISTS idx_event_log_deleted ON event_log_records (tenant_ns, deleted_at);

-- Foresight records.
CREATE TABLE IF NOT EXISTS foresight_records (
    tenant_ns TEXT NOT NULL,
    id TEXT NOT NULL,
    parent_id TEXT NOT NULL,
    user_id TEXT,
    group_id TEXT,
    start_time TEXT,
    end_time TEXT,
    payload BLOB NOT NULL,
    deleted_at TEXT,
    deleted_by TEXT,
    deleted_id INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (tenant_ns, id)
);
CREATE INDEX IF NOT EXISTS idx_foresight_parent ON foresight_records (tenant_ns, parent_id);
CREATE INDEX IF NOT EXISTS idx_foresight_user ON foresight_records (tenant_ns, user_id);
CREATE INDEX IF NOT EXISTS idx_foresight_group ON foresight_records (tenant_ns, group_id);
CREATE INDEX IF NOT EXISTS idx_foresight_deleted ON foresight_records (tenant_ns, deleted_at);

-- User profiles, versioned.
CREATE TABLE IF NOT EXISTS user_profiles (
    tenant_ns TEXT NOT NULL,
    user_id TEXT NOT NULL,
    group_id TEXT NOT NULL DEFAULT '',
    version INTEGER NOT NULL,
    payload BLOB NOT NULL,
    PRIMARY KEY (tenant_ns, user_id, group_id)
);

-- Conversation metadata.
CREATE TABLE IF NOT EXISTS conversation_meta (
    tenant_ns TEXT NOT NULL,
    group_id TEXT NOT NULL,
    payload BLOB NOT NULL,
    PRIMARY KEY (tenant_ns, group_id)
);

-- Per-entity C8 sync status, driving the background reconciler.
CREATE TABLE IF NOT EXISTS sync_status (
    tenant_ns TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    store TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    last_attempt_at TEXT,
    PRIMARY KEY (tenant_ns, entity_id, store)
);
CREATE INDEX IF NOT EXISTS idx_sync_status_pending ON sync_status (tenant_ns, synced);

-- Migration bookkeeping. Process-wide, not tenant-scoped.
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);
";
