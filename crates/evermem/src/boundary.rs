//! Boundary detector (C3): pure, deterministic decision on whether the
//! buffered tail plus an incoming probe message forms a closed episode.
//! Grounded on the teacher's `TopicExtractor` keyword-overlap heuristic
//! (`utils/topic_extractor.rs`, now folded into [`crate::utils::TextUtils`]
//! normalization), generalized from topic-for-title-generation into a
//! divergence score between two message windows.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::memory::Message;
use crate::tenant::TenantConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryDecision {
    pub fire: bool,
    pub forced: bool,
}

impl BoundaryDecision {
    fn none() -> Self {
        Self {
            fire: false,
            forced: false,
        }
    }

    fn fire(forced: bool) -> Self {
        Self { fire: true, forced }
    }
}

/// Topic-divergence score between two bags of words: 1 minus Jaccard overlap
/// of their normalized keyword sets. Deterministic, no I/O, cheap enough to
/// run on every probe (spec §4.C3: "exact score function left to the
/// implementer... specified only by its inputs and determinism").
fn topic_divergence(tail_window: &[&Message], probe_content: &str) -> f32 {
    use std::collections::HashSet;

    let tail_text: String = tail_window
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let tail_words: HashSet<String> = crate::utils::TextUtils::keywords(&tail_text);
    let probe_words: HashSet<String> = crate::utils::TextUtils::keywords(probe_content);

    if tail_words.is_empty() || probe_words.is_empty() {
        return 0.0;
    }
    let intersection = tail_words.intersection(&probe_words).count();
    let union = tail_words.union(&probe_words).count();
    if union == 0 {
        return 0.0;
    }
    1.0 - (intersection as f32 / union as f32)
}

/// Above this, rule 3 (long gap + topic switch) fires. Chosen so that two
/// windows sharing fewer than ~1/3 of their normalized keywords diverge.
const TOPIC_DIVERGENCE_THRESHOLD: f32 = 0.65;

/// Rule 3's gap-window size: how many trailing messages form the "tail" the
/// probe is compared against.
const TAIL_WINDOW_SIZE: usize = 5;

pub struct BoundaryDetector;

impl BoundaryDetector {
    /// Decide whether to fire a boundary before `probe` is appended to
    /// `buffer`. Rules are evaluated top-down; first match wins (spec §4.C3).
    pub fn evaluate(
        buffer: &[Message],
        probe: &Message,
        config: &TenantConfig,
        default_timezone: &str,
    ) -> BoundaryDecision {
        if buffer.is_empty() {
            return BoundaryDecision::none();
        }

        if buffer.len() >= config.max_buffer {
            return BoundaryDecision::fire(true);
        }

        let tail = buffer.last().expect("buffer non-empty checked above");

        if Self::local_date(probe.create_time, default_timezone)
            != Self::local_date(tail.create_time, default_timezone)
        {
            return BoundaryDecision::fire(false);
        }

        let gap_hours = (probe.create_time - tail.create_time).num_minutes() as f64 / 60.0;
        if buffer.len() > 1 && gap_hours >= config.gap_hours as f64 {
            let window_start = buffer.len().saturating_sub(TAIL_WINDOW_SIZE);
            let tail_window: Vec<&Message> = buffer[window_start..].iter().collect();
            let divergence = topic_divergence(&tail_window, &probe.content);
            if divergence >= TOPIC_DIVERGENCE_THRESHOLD {
                return BoundaryDecision::fire(false);
            }
        }

        let probe_lower = probe.content.to_lowercase();
        if config
            .scene_delimiters
            .iter()
            .any(|phrase| probe_lower.contains(&phrase.to_lowercase()))
        {
            return BoundaryDecision::fire(false);
        }

        BoundaryDecision::none()
    }

    fn local_date(timestamp: DateTime<Utc>, tz_name: &str) -> chrono::NaiveDate {
        match tz_name.parse::<Tz>() {
            Ok(tz) => timestamp.with_timezone(&tz).date_naive(),
            Err(_) => timestamp.date_naive(),
        }
    }
}
