//! Reciprocal rank fusion (spec §4.C9): `score = Σ 1/(k₀ + rank_i)` across
//! sub-search result lists, ties broken by recency. Grounded on the teacher's
//! `retrieval_planner.rs` plan-based fan-out/fuse shape, generalized from a
//! single scoring strategy into the four `retrieve_method` variants.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct RankedHit {
    pub entity_id: String,
    pub score: f32,
}

/// One fused result, carrying the recency tiebreaker alongside its score.
#[derive(Debug, Clone)]
pub struct FusedHit {
    pub entity_id: String,
    pub score: f32,
}

/// Reciprocal rank fusion over any number of ranked lists. `recency` supplies
/// each entity's timestamp for deterministic tie-breaking (spec §4.C9 +
/// testable property 8: "given identical sub-search outputs, RRF fusion
/// yields the same ordering across runs").
pub fn reciprocal_rank_fusion(
    lists: &[Vec<RankedHit>],
    k0: f64,
    recency: impl Fn(&str) -> Option<DateTime<Utc>>,
) -> Vec<FusedHit> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    for list in lists {
        for (rank, hit) in list.iter().enumerate() {
            *scores.entry(hit.entity_id.clone()).or_insert(0.0) += 1.0 / (k0 + (rank + 1) as f64);
        }
    }

    let mut fused: Vec<FusedHit> = scores
        .into_iter()
        .map(|(entity_id, score)| FusedHit {
            entity_id,
            score: score as f32,
        })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let a_time = recency(&a.entity_id);
                let b_time = recency(&b.entity_id);
                b_time.cmp(&a_time)
            })
            .then_with(|| a.entity_id.cmp(&b.entity_id)) // fully deterministic fallback
    });
    fused
}

/// Weighted-sum hybrid fusion after per-list min-max normalization (spec
/// §4.C9 `hybrid` method).
pub fn weighted_sum_fusion(lists: &[(Vec<RankedHit>, f32)]) -> Vec<FusedHit> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    for (list, weight) in lists {
        if list.is_empty() {
            continue;
        }
        let min = list.iter().map(|h| h.score).fold(f32::INFINITY, f32::min);
        let max = list.iter().map(|h| h.score).fold(f32::NEG_INFINITY, f32::max);
        let range = (max - min).max(f32::EPSILON);
        for hit in list {
            let normalized = (hit.score - min) / range;
            *scores.entry(hit.entity_id.clone()).or_insert(0.0) += normalized * weight;
        }
    }
    let mut fused: Vec<FusedHit> = scores
        .into_iter()
        .map(|(entity_id, score)| FusedHit { entity_id, score })
        .collect();
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused
}
