//! Extraction pipeline (C4): orchestrates the seven-step algorithm in spec
//! §4.C4 over one closed episode. Grounded on the teacher's worker-pool
//! task-execution shape (`thread_pool.rs`'s `WorkerThread` draining a queue
//! and running one unit of work to completion), generalized from a single
//! LLM round-trip into the full summarize → facts → embed → foresight →
//! profile → commit chain.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::errors::{MemoryError, MemoryResult};
use crate::keyword_index::memcell_search_content;
use crate::memory::{
    ConversationMeta, EventLog, EventLogRecord, ForesightRecord, MemCell, MemCellType, ParentType, Scope,
};
use crate::store::MemoryStore;
use crate::tenant::TenantConfig;

use super::collaborators::{embed_batched, EmbeddingCollaborator, LlmCollaborator};
use super::facts::dedupe_facts;
use super::foresight::sanitize_foresight;
use super::profile::merge_episode_into_profile;
use super::summarizer::{
    atomic_facts_prompt, build_transcript, foresight_prompt, parse_atomic_facts, parse_foresight_list,
    parse_summary, summarize_prompt,
};

/// Input to one extraction run: a closed episode and the context needed to
/// label and scope it (spec §4.C4 contract). `tenant_ns` is resolved once at
/// `ingest()` time and carried through the async extraction path so C4's
/// eventual commit lands in the same namespace the originating write
/// resolved (spec.md:28, C1).
pub struct ClosedEpisode {
    pub tenant_ns: String,
    pub conversation_id: String,
    pub messages: Vec<crate::memory::Message>,
    pub conversation_meta: ConversationMeta,
    pub scope: Scope,
}

/// What C4 hands off to C8 after a successful commit.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub tenant_ns: String,
    pub memcell: MemCell,
    pub event_log_records: Vec<EventLogRecord>,
    pub foresight_records: Vec<ForesightRecord>,
}

pub struct ExtractionPipeline {
    llm: Arc<dyn LlmCollaborator>,
    embedder: Arc<dyn EmbeddingCollaborator>,
}

impl ExtractionPipeline {
    pub fn new(llm: Arc<dyn LlmCollaborator>, embedder: Arc<dyn EmbeddingCollaborator>) -> Self {
        Self { llm, embedder }
    }

    /// Runs the full algorithm and commits to `store`. Partial commits are
    /// forbidden (spec §4.C4): any failure before the final commit returns
    /// `ExtractionFailed` and nothing is written.
    pub async fn run(
        &self,
        episode: ClosedEpisode,
        config: &TenantConfig,
        store: &MemoryStore,
    ) -> MemoryResult<ExtractionOutcome> {
        let deadline = Duration::from_secs(180);

        // Step 1: transcript.
        let transcript = build_transcript(&episode.messages);

        // Step 2 & 3 run concurrently (spec: "Steps 2 & 3 may run in parallel").
        let summary_prompt = summarize_prompt(&transcript);
        let facts_prompt = atomic_facts_prompt(&transcript);
        let (summary_result, facts_result) = tokio::join!(
            self.llm.generate(&summary_prompt, 0.2, deadline),
            self.llm.generate(&facts_prompt, 0.2, deadline),
        );
        let summary = parse_summary(&summary_result?)?;
        let raw_facts = parse_atomic_facts(&facts_result?)?;
        let facts = dedupe_facts(raw_facts);

        let retry_base = Duration::from_secs(config.extraction_retry_base_seconds);
        let fact_embeddings = embed_batched(
            self.embedder.as_ref(),
            &facts,
            false,
            config.embedding_batch_size,
            config.embedding_concurrency,
            config.extraction_retry_attempts,
            retry_base,
        )
        .await?;

        // Step 4: embed the MemCell itself.
        let memcell_text = if facts.is_empty() {
            memcell_search_content(&summary.subject, &summary.summary, &summary.episode, &[])
        } else {
            facts.join(" ")
        };
        let memcell_embedding = embed_batched(
            self.embedder.as_ref(),
            &[memcell_text],
            false,
            1,
            1,
            config.extraction_retry_attempts,
            retry_base,
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| MemoryError::ExtractionFailed("embedder returned no vector for MemCell".to_string()))?;

        let first_timestamp = episode
            .messages
            .first()
            .map(|m| m.create_time)
            .unwrap_or_else(Utc::now);

        let event_id = Uuid::new_v4().to_string();
        let memcell = MemCell {
            event_id: event_id.clone(),
            scope: episode.scope.clone(),
            timestamp: first_timestamp,
            subject: summary.subject,
            summary: summary.summary,
            episode: summary.episode,
            participants: summary.participants,
            keywords: summary.keywords,
            r#type: MemCellType::Conversation,
            original_data: episode.messages.clone(),
            semantic_memories: vec![],
            event_log: EventLog {
                atomic_fact: facts.clone(),
                fact_embeddings,
            },
            embedding: memcell_embedding,
            deletion: Default::default(),
        };

        let event_log_records: Vec<EventLogRecord> = facts
            .iter()
            .zip(memcell.event_log.fact_embeddings.iter())
            .map(|(fact, vector)| EventLogRecord {
                id: Uuid::new_v4().to_string(),
                parent_type: ParentType::Memcell,
                parent_id: event_id.clone(),
                scope: episode.scope.clone(),
                atomic_fact: fact.clone(),
                timestamp: first_timestamp,
                vector: vector.clone(),
                vector_model: "evermem-embedding-v1".to_string(),
                participants: Some(memcell.participants.clone()),
                event_type: None,
                extend: Default::default(),
            })
            .collect();

        // Step 5: foresight, scene-gated.
        let foresight_records = if episode
            .conversation_meta
            .scene
            .foresight_enabled(config.group_chat_foresight)
        {
            let raw = self.llm.generate(&foresight_prompt(&transcript), 0.3, deadline).await?;
            let predictions = parse_foresight_list(&raw)?;
            let sanitized: Vec<_> = predictions.into_iter().map(sanitize_foresight).collect();
            let contents: Vec<String> = sanitized.iter().map(|f| f.content.clone()).collect();
            let vectors = embed_batched(
                self.embedder.as_ref(),
                &contents,
                false,
                config.embedding_batch_size,
                config.embedding_concurrency,
                config.extraction_retry_attempts,
                retry_base,
            )
            .await?;
            sanitized
                .into_iter()
                .zip(vectors)
                .map(|(f, vector)| ForesightRecord {
                    id: Uuid::new_v4().to_string(),
                    parent_type: ParentType::Memcell,
                    parent_id: event_id.clone(),
                    scope: episode.scope.clone(),
                    content: f.content,
                    evidence: f.evidence,
                    start_time: f.start_time,
                    end_time: f.end_time,
                    duration_days: f.duration_days,
                    vector,
                    vector_model: "evermem-embedding-v1".to_string(),
                })
                .collect()
        } else {
            vec![]
        };

        // Step 7 (commit first): partial commits are forbidden for
        // {MemCell, EventLogRecords, ForesightRecords} (spec §4.C4); profile
        // merges below are best-effort bookkeeping on top of a landed commit,
        // not part of that atomic set, so they must not run before it lands —
        // otherwise a commit failure leaves a profile mutation with nothing to
        // point back to.
        store.commit_episode(&episode.tenant_ns, &memcell, &event_log_records, &foresight_records)?;

        // Step 6: update profiles for every referenced participant.
        for participant in &memcell.participants {
            let group_id = episode.scope.group_id.clone();
            store
                .profiles
                .upsert_with_merge(&episode.tenant_ns, participant, group_id.as_deref(), |existing| {
                    merge_episode_into_profile(existing, participant, group_id.as_deref(), &event_id, &memcell.summary, 0.7)
                })?;
        }

        Ok(ExtractionOutcome {
            tenant_ns: episode.tenant_ns,
            memcell,
            event_log_records,
            foresight_records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Message, Role, Scene};
    use async_trait::async_trait;

    struct StubLlm;

    #[async_trait]
    impl LlmCollaborator for StubLlm {
        async fn generate(&self, prompt: &str, _temperature: f32, _deadline: Duration) -> MemoryResult<String> {
            if prompt.contains("single-sentence") {
                Ok(r#"["A went to Chengdu", "A enjoys Sichuan food"]"#.to_string())
            } else if prompt.contains("speculative predictions") {
                Ok("[]".to_string())
            } else {
                Ok(r#"{"subject":"Trip planning","summary":"Discussed a trip","episode":"They planned a trip to Chengdu.","participants":["u1"],"keywords":["trip","chengdu"]}"#.to_string())
            }
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl EmbeddingCollaborator for StubEmbedder {
        async fn embeddings(&self, texts: &[String], _is_query: bool) -> MemoryResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    fn test_episode() -> ClosedEpisode {
        ClosedEpisode {
            tenant_ns: "tenant-a".to_string(),
            conversation_id: "conv1".to_string(),
            messages: vec![Message {
                message_id: "m1".to_string(),
                conversation_id: "conv1".to_string(),
                group_name: None,
                sender_id: "u1".to_string(),
                sender_name: Some("Alice".to_string()),
                role: Role::User,
                content: "Let's plan a trip to Chengdu".to_string(),
                create_time: Utc::now(),
                refer_list: vec![],
            }],
            conversation_meta: ConversationMeta {
                group_id: "g1".to_string(),
                scene: Scene::Companion,
                name: "Planning".to_string(),
                description: None,
                created_at: Utc::now(),
                default_timezone: "UTC".to_string(),
                user_details: Default::default(),
                tags: vec![],
            },
            scope: Scope {
                user_id: None,
                group_id: Some("g1".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn run_produces_aligned_event_log_and_commits() {
        let store = MemoryStore::new_in_memory().unwrap();
        let pipeline = ExtractionPipeline::new(Arc::new(StubLlm), Arc::new(StubEmbedder));
        let outcome = pipeline.run(test_episode(), &TenantConfig::default(), &store).await.unwrap();

        assert_eq!(outcome.memcell.event_log.atomic_fact.len(), 2);
        assert_eq!(
            outcome.memcell.event_log.atomic_fact.len(),
            outcome.memcell.event_log.fact_embeddings.len()
        );
        assert_eq!(outcome.event_log_records.len(), 2);
        assert!(store.memcells.find("tenant-a", &outcome.memcell.event_id).unwrap().is_some());

        let profile = store.profiles.find("tenant-a", "u1", Some("g1")).unwrap().unwrap();
        assert_eq!(profile.memcell_count, 1);
    }
}
