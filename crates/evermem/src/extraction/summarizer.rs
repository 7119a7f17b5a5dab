//! Transcript assembly and structured-output parsing for the LLM collaborator
//! (spec §4.C4 steps 1-2). The LLM is prompted for a JSON object; this module
//! owns the prompt text and the parse/validate step, not the HTTP call.

use serde::Deserialize;

use crate::errors::{MemoryError, MemoryResult};
use crate::memory::Message;

/// `{sender_name}: {content}`, one line per message, tagged with its
/// `message_id` as an HTML-style comment for traceability without polluting
/// the prompt body the LLM reads.
pub fn build_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let sender = m.sender_name.as_deref().unwrap_or(m.sender_id.as_str());
            format!("<!-- {} -->{}: {}", m.message_id, sender, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn summarize_prompt(transcript: &str) -> String {
    format!(
        "Summarize the following conversation episode as JSON with fields \
         subject, summary, episode, participants (array), keywords (array). \
         Conversation:\n{transcript}"
    )
}

pub fn atomic_facts_prompt(transcript: &str) -> String {
    format!(
        "Extract single-sentence declarative factual claims grounded in this \
         conversation as a JSON array of strings. Conversation:\n{transcript}"
    )
}

pub fn foresight_prompt(transcript: &str) -> String {
    format!(
        "Given this conversation, produce up to 10 speculative predictions about \
         future impact as a JSON array of objects with fields content, evidence, \
         start_time, end_time, duration_days (any of the last three may be null). \
         Conversation:\n{transcript}"
    )
}

#[derive(Debug, Deserialize)]
pub struct SummaryOutput {
    pub subject: String,
    pub summary: String,
    pub episode: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

pub fn parse_summary(raw: &str) -> MemoryResult<SummaryOutput> {
    serde_json::from_str(raw)
        .map_err(|e| MemoryError::ExtractionFailed(format!("unparseable summary output: {e}")))
}

pub fn parse_atomic_facts(raw: &str) -> MemoryResult<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| MemoryError::ExtractionFailed(format!("unparseable atomic-fact output: {e}")))
}

pub fn parse_foresight_list(raw: &str) -> MemoryResult<Vec<super::foresight::RawForesight>> {
    #[derive(Deserialize)]
    struct Entry {
        content: String,
        evidence: String,
        start_time: Option<String>,
        end_time: Option<String>,
        duration_days: Option<i64>,
    }
    let entries: Vec<Entry> = serde_json::from_str(raw)
        .map_err(|e| MemoryError::ExtractionFailed(format!("unparseable foresight output: {e}")))?;
    Ok(entries
        .into_iter()
        .take(10) // hard upper bound (spec §9: "4-10 varies; treat 10 as hard")
        .map(|e| super::foresight::RawForesight {
            content: e.content,
            evidence: e.evidence,
            start_time: e.start_time,
            end_time: e.end_time,
            duration_days: e.duration_days,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use chrono::Utc;

    fn msg(id: &str, content: &str) -> Message {
        Message {
            message_id: id.to_string(),
            conversation_id: "c1".to_string(),
            group_name: None,
            sender_id: "u1".to_string(),
            sender_name: Some("Alice".to_string()),
            role: Role::User,
            content: content.to_string(),
            create_time: Utc::now(),
            refer_list: vec![],
        }
    }

    #[test]
    fn transcript_tags_each_line_with_message_id() {
        let transcript = build_transcript(&[msg("m1", "hello")]);
        assert!(transcript.contains("<!-- m1 -->Alice: hello"));
    }

    #[test]
    fn parse_summary_rejects_malformed_json() {
        assert!(parse_summary("not json").is_err());
    }

    #[test]
    fn parse_foresight_list_caps_at_ten() {
        let entries: Vec<_> = (0..15)
            .map(|i| format!(r#"{{"content":"p{i}","evidence":"e","start_time":null,"end_time":null,"duration_days":null}}"#))
            .collect();
        let raw = format!("[{}]", entries.join(","));
        let parsed = parse_foresight_list(&raw).unwrap();
        assert_eq!(parsed.len(), 10);
    }
}
