//! Tenant scoping layer (C1): translates every read/write into an isolated
//! logical namespace `(organization_id, space_id)` and hands out the
//! per-tenant configuration the rest of the core reads.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::errors::{MemoryError, MemoryResult};

/// Out-of-band tenancy envelope every façade operation carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantEnvelope {
    pub organization_id: String,
    pub space_id: String,
    pub hash_key: Option<String>,
}

impl TenantEnvelope {
    pub fn new(organization_id: impl Into<String>, space_id: impl Into<String>) -> Self {
        Self {
            organization_id: organization_id.into(),
            space_id: space_id.into(),
            hash_key: None,
        }
    }

    fn validate(&self) -> MemoryResult<()> {
        if self.organization_id.trim().is_empty() || self.space_id.trim().is_empty() {
            return Err(MemoryError::TenantUnresolved(
                "organization_id/space_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Stable key used to namespace every collection/index/queue for this tenant.
    pub fn namespace(&self) -> String {
        format!("{}::{}", self.organization_id, self.space_id)
    }

    /// Content hash of the namespace, used as `hash_key` when the caller
    /// doesn't supply one (spec §4.C1: tenancy envelope carries a `hash_key`
    /// for sharding). Stable across calls for the same org/space pair.
    pub fn fingerprint(&self) -> String {
        blake3::hash(self.namespace().as_bytes()).to_hex().to_string()
    }
}

/// Per-tenant knobs referenced throughout C3/C4/C9 (boundary thresholds, embedding
/// dimension, retry policy). Resolved once per tenant and cached.
#[derive(Debug, Clone)]
pub struct TenantConfig {
    pub max_buffer: usize,
    pub gap_hours: i64,
    pub embedding_dim: usize,
    pub embedding_batch_size: usize,
    pub embedding_concurrency: usize,
    pub extraction_retry_attempts: u32,
    pub extraction_retry_base_seconds: u64,
    pub scene_delimiters: Vec<String>,
    pub rrf_k0: f64,
    /// Spec §4.C4 step 5: foresight always runs in assistant/companion;
    /// group_chat is tenant-configurable, default on.
    pub group_chat_foresight: bool,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            max_buffer: 200,
            gap_hours: 4,
            embedding_dim: 384,
            embedding_batch_size: 256,
            embedding_concurrency: 5,
            extraction_retry_attempts: 3,
            extraction_retry_base_seconds: 2,
            scene_delimiters: vec![
                "let's change the subject".to_string(),
                "new topic".to_string(),
                "moving on".to_string(),
            ],
            rrf_k0: 60.0,
            group_chat_foresight: true,
        }
    }
}

/// Registry of resolved tenants, constructed lazily and cached for the process
/// lifetime — mirrors the teacher's `ConversationHierarchy` DashMap-of-state pattern,
/// scoped one level higher (tenant instead of conversation).
pub struct TenantRegistry {
    configs: DashMap<String, Arc<TenantConfig>>,
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self {
            configs: DashMap::new(),
        }
    }

    pub fn resolve(&self, envelope: &TenantEnvelope) -> MemoryResult<Arc<TenantConfig>> {
        envelope.validate()?;
        let key = envelope.fingerprint();
        if let Some(cfg) = self.configs.get(&key) {
            return Ok(cfg.clone());
        }
        let cfg = Arc::new(TenantConfig::default());
        self.configs.insert(key, cfg.clone());
        Ok(cfg)
    }

    pub fn set_config(&self, envelope: &TenantEnvelope, config: TenantConfig) {
        self.configs.insert(envelope.fingerprint(), Arc::new(config));
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_org_is_unresolved() {
        let registry = TenantRegistry::new();
        let envelope = TenantEnvelope::new("", "space");
        assert!(matches!(
            registry.resolve(&envelope),
            Err(MemoryError::TenantUnresolved(_))
        ));
    }

    #[test]
    fn distinct_tenants_get_distinct_namespaces() {
        let a = TenantEnvelope::new("orgA", "spaceA");
        let b = TenantEnvelope::new("orgB", "spaceA");
        assert_ne!(a.namespace(), b.namespace());
    }

    #[test]
    fn config_is_cached_across_resolves() {
        let registry = TenantRegistry::new();
        let envelope = TenantEnvelope::new("orgA", "spaceA");
        let first = registry.resolve(&envelope).unwrap();
        let second = registry.resolve(&envelope).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
