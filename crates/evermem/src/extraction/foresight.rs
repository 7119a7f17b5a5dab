//! Foresight post-processing (spec §4.C4 step 5). Date sanitation strips
//! non-digits/hyphens and rejects invalid dates; the missing temporal field
//! (start, end, or duration) is derived from the other two when possible.
//! Supplements the distilled spec with the original's sanitation behavior
//! (`original_source` stripped non-ISO punctuation before parsing dates
//! rather than rejecting the whole prediction outright).

use chrono::NaiveDate;

/// One LLM-produced prediction before it becomes a durable `ForesightRecord`.
#[derive(Debug, Clone, Default)]
pub struct RawForesight {
    pub content: String,
    pub evidence: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub duration_days: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct SanitizedForesight {
    pub content: String,
    pub evidence: String,
    pub start_time: Option<NaiveDate>,
    pub end_time: Option<NaiveDate>,
    pub duration_days: Option<i64>,
}

/// Strips everything but digits and hyphens, then parses as `YYYY-MM-DD`;
/// `None` on empty input or an unparseable result (sanitize-then-drop, not
/// reject-the-whole-prediction).
fn sanitize_date(raw: &Option<String>) -> Option<NaiveDate> {
    let raw = raw.as_ref()?;
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_digit() || *c == '-').collect();
    NaiveDate::parse_from_str(&cleaned, "%Y-%m-%d").ok()
}

/// Sanitizes dates and fills in whichever of `{start, end, duration}` is
/// derivable from the other two (spec §4.C4 step 5).
pub fn sanitize_foresight(raw: RawForesight) -> SanitizedForesight {
    let start = sanitize_date(&raw.start_time);
    let end = sanitize_date(&raw.end_time);
    let mut duration = raw.duration_days;

    let (start, end, duration) = match (start, end, duration) {
        (Some(s), Some(e), _) if e >= s => (Some(s), Some(e), Some((e - s).num_days())),
        (Some(s), Some(e), _) => (Some(e), Some(s), Some((s - e).num_days())), // reversed range: swap so start <= end holds
        (Some(s), None, Some(d)) if d >= 0 => (Some(s), Some(s + chrono::Duration::days(d)), Some(d)),
        (None, Some(e), Some(d)) if d >= 0 => (Some(e - chrono::Duration::days(d)), Some(e), Some(d)),
        (s, e, d) => {
            duration = d;
            (s, e, duration)
        }
    };

    SanitizedForesight {
        content: raw.content,
        evidence: raw.evidence,
        start_time: start,
        end_time: end,
        duration_days: duration,
    }
}
