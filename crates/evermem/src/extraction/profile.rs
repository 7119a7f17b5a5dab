//! Profile merge heuristics (spec §4.C4 step 6): every user referenced in an
//! episode's `participants` gets their `UserProfile` fetched, mutated, and
//! upserted with `version += 1`. The merge function itself (what fields the
//! LLM contributes to `profile_data`) is intentionally simple — the
//! interesting invariant is the version bump and cluster bookkeeping, not the
//! shape of `profile_data`.

use chrono::Utc;
use serde_json::{json, Value};

use crate::memory::UserProfile;

/// Folds one episode's observations about `user_id` into their profile.
/// `episode_summary` and `event_id` feed `profile_data`/`cluster_ids`; the
/// caller (pipeline) is responsible for the version bump via
/// [`crate::store::ProfileStore::upsert_with_merge`].
pub fn merge_episode_into_profile(
    existing: Option<UserProfile>,
    user_id: &str,
    group_id: Option<&str>,
    event_id: &str,
    episode_summary: &str,
    confidence: f32,
) -> UserProfile {
    let mut profile = existing.unwrap_or_else(|| UserProfile {
        user_id: user_id.to_string(),
        group_id: group_id.map(str::to_string),
        version: 0,
        profile_data: json!({ "observations": [] }),
        confidence,
        cluster_ids: vec![],
        memcell_count: 0,
        last_updated_cluster: None,
    });

    let observations = profile
        .profile_data
        .get_mut("observations")
        .and_then(Value::as_array_mut);
    if let Some(observations) = observations {
        observations.push(json!({
            "event_id": event_id,
            "summary": episode_summary,
            "observed_at": Utc::now().to_rfc3339(),
        }));
    } else {
        profile.profile_data = json!({
            "observations": [{
                "event_id": event_id,
                "summary": episode_summary,
                "observed_at": Utc::now().to_rfc3339(),
            }]
        });
    }

    if !profile.cluster_ids.contains(&event_id.to_string()) {
        profile.cluster_ids.push(event_id.to_string());
    }
    profile.last_updated_cluster = Some(event_id.to_string());
    profile.memcell_count += 1;
    // Running average, weighted toward the newer observation.
    profile.confidence = (profile.confidence * 0.7) + (confidence * 0.3);
    profile
}
