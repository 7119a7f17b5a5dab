//! Three-valued scope-filter contract shared by every C5 find operation and by
//! C9 retrieval (spec §4.C5). Grounded on the original `MemoryScope` enum
//! (`original_source/src/memory_layer/memory_scope.py`), generalized from one
//! fixed three-way enum into a reusable filter per field.

use crate::errors::{MemoryError, MemoryResult};
use crate::memory::MAGIC_ALL;

/// A single field's resolved filter intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeFilter {
    /// Sentinel `"__all__"` or the field omitted: do not filter on this field.
    All,
    /// `null` or empty string: match rows where the field is null or empty.
    Null,
    /// Any other value: exact match.
    Value(String),
}

impl ScopeFilter {
    pub fn from_input(input: Option<&str>) -> Self {
        match input {
            None => ScopeFilter::All,
            Some(s) if s == MAGIC_ALL => ScopeFilter::All,
            Some(s) if s.is_empty() => ScopeFilter::Null,
            Some(s) => ScopeFilter::Value(s.to_string()),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, ScopeFilter::All)
    }

    /// Does `field` (the stored column/attribute value, `None` meaning null)
    /// satisfy this filter?
    pub fn matches(&self, field: Option<&str>) -> bool {
        match self {
            ScopeFilter::All => true,
            ScopeFilter::Null => field.map(str::is_empty).unwrap_or(true),
            ScopeFilter::Value(v) => field == Some(v.as_str()),
        }
    }
}

/// Resolve a `(user_id, group_id)` pair and enforce the both-`"__all__"` rejection.
pub fn resolve_pair(
    user_id: Option<&str>,
    group_id: Option<&str>,
) -> MemoryResult<(ScopeFilter, ScopeFilter)> {
    let user = ScopeFilter::from_input(user_id);
    let group = ScopeFilter::from_input(group_id);
    if user.is_all() && group.is_all() {
        return Err(MemoryError::ScopeTooBroad);
    }
    Ok((user, group))
}
