//! Core data model (spec §3). All entities live inside one tenant namespace;
//! IDs are unique within a tenant.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel meaning "do not filter on this field" in C5/C9 find operations.
pub const MAGIC_ALL: &str = "__all__";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message (transient). Created by ingress, consumed by extraction, never
/// surfaced in retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub group_name: Option<String>,
    pub sender_id: String,
    pub sender_name: Option<String>,
    pub role: Role,
    pub content: String,
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub refer_list: Vec<String>,
}

/// The two orthogonal scopes an entity may be filed under. Exactly one of
/// `user_id`/`group_id` is the primary key on a MemCell; the other may be null.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scope {
    pub user_id: Option<String>,
    pub group_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    pub atomic_fact: Vec<String>,
    pub fact_embeddings: Vec<Vec<f32>>,
}

impl EventLog {
    pub fn is_aligned(&self) -> bool {
        self.atomic_fact.len() == self.fact_embeddings.len()
    }
}

/// Soft-delete audit trio, immutable once set (spec §3: "never re-stamped").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionAudit {
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
    pub deleted_id: u64,
}

impl DeletionAudit {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemCellType {
    Conversation,
}

/// MemCell (episode, durable). One per closed episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemCell {
    pub event_id: String,
    pub scope: Scope,
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub summary: String,
    pub episode: String,
    pub participants: Vec<String>,
    pub keywords: Vec<String>,
    pub r#type: MemCellType,
    pub original_data: Vec<Message>,
    pub semantic_memories: Vec<String>,
    pub event_log: EventLog,
    pub embedding: Vec<f32>,
    #[serde(flatten)]
    pub deletion: DeletionAudit,
}

impl MemCell {
    /// Invariant: exactly one of scope.user_id / scope.group_id is the primary key.
    pub fn has_single_primary_scope(&self) -> bool {
        self.scope.user_id.is_some() != self.scope.group_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParentType {
    Memcell,
}

/// EventLogRecord (durable). Exactly one per atomic fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogRecord {
    pub id: String,
    pub parent_type: ParentType,
    pub parent_id: String,
    pub scope: Scope,
    pub atomic_fact: String,
    pub timestamp: DateTime<Utc>,
    pub vector: Vec<f32>,
    pub vector_model: String,
    pub participants: Option<Vec<String>>,
    pub event_type: Option<String>,
    #[serde(default)]
    pub extend: HashMap<String, serde_json::Value>,
}

/// ForesightRecord (durable). Up to ten per episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForesightRecord {
    pub id: String,
    pub parent_type: ParentType,
    pub parent_id: String,
    pub scope: Scope,
    pub content: String,
    pub evidence: String,
    pub start_time: Option<NaiveDate>,
    pub end_time: Option<NaiveDate>,
    pub duration_days: Option<i64>,
    pub vector: Vec<f32>,
    pub vector_model: String,
}

impl ForesightRecord {
    /// `record.start ≤ query.end AND record.end ≥ query.start` — spec §4.C5 overlap.
    pub fn overlaps(&self, query_start: Option<NaiveDate>, query_end: Option<NaiveDate>) -> bool {
        let start_ok = match (self.start_time, query_end) {
            (Some(s), Some(qe)) => s <= qe,
            _ => true,
        };
        let end_ok = match (self.end_time, query_start) {
            (Some(e), Some(qs)) => e >= qs,
            _ => true,
        };
        start_ok && end_ok
    }
}

/// UserProfile (durable, versioned). Upsert bumps version; only latest retained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub group_id: Option<String>,
    pub version: u64,
    pub profile_data: serde_json::Value,
    pub confidence: f32,
    pub cluster_ids: Vec<String>,
    pub memcell_count: u64,
    pub last_updated_cluster: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scene {
    Assistant,
    Companion,
    GroupChat,
}

impl Scene {
    /// Spec §4.C4 step 5: foresight always runs in assistant/companion, optionally
    /// in group_chat (tenant-configurable; default on).
    pub fn foresight_enabled(self, group_chat_foresight: bool) -> bool {
        match self {
            Scene::Assistant | Scene::Companion => true,
            Scene::GroupChat => group_chat_foresight,
        }
    }
}

/// ConversationMeta (durable). Read at extraction time to label the episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDetail {
    pub full_name: Option<String>,
    pub role: Option<String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMeta {
    pub group_id: String,
    pub scene: Scene,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub default_timezone: String,
    #[serde(default)]
    pub user_details: HashMap<String, UserDetail>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One artifact family a search/fetch can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    EpisodicMemory,
    EventLog,
    Foresight,
    Profile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_log_alignment() {
        let mut log = EventLog::default();
        log.atomic_fact.push("a".into());
        assert!(!log.is_aligned());
        log.fact_embeddings.push(vec![0.0]);
        assert!(log.is_aligned());
    }

    #[test]
    fn deletion_audit_starts_unset() {
        let audit = DeletionAudit::default();
        assert!(!audit.is_deleted());
    }

    #[test]
    fn foresight_overlap_matches_spec_example() {
        let record = ForesightRecord {
            id: "f1".into(),
            parent_type: ParentType::Memcell,
            parent_id: "m1".into(),
            scope: Scope::default(),
            content: "x".into(),
            evidence: "y".into(),
            start_time: Some(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()),
            end_time: Some(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()),
            duration_days: Some(29),
            vector: vec![],
            vector_model: "m".into(),
        };
        let overlap_start = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let overlap_end = NaiveDate::from_ymd_opt(2024, 7, 15).unwrap();
        assert!(record.overlaps(Some(overlap_start), Some(overlap_end)));

        let miss_start = NaiveDate::from_ymd_opt(2024, 8, 1).unwrap();
        let miss_end = NaiveDate::from_ymd_opt(2024, 8, 31).unwrap();
        assert!(!record.overlaps(Some(miss_start), Some(miss_end)));
    }

    #[test]
    fn group_chat_foresight_is_optional() {
        assert!(Scene::Assistant.foresight_enabled(false));
        assert!(!Scene::GroupChat.foresight_enabled(false));
        assert!(Scene::GroupChat.foresight_enabled(true));
    }
}
