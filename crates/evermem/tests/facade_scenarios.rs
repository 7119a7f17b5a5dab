//! Façade-level end-to-end scenarios (spec §8). Extraction itself (the full
//! summarize→facts→embed→foresight→commit chain) is exercised with stub
//! collaborators in `extraction::pipeline`'s own tests — these scenarios
//! only need a live `Engine`/`MemoryApi` pair plus an in-memory store, since
//! `Engine::new` always wires the HTTP collaborators (there is no in-process
//! substitution point at this layer) and none of these scenarios require a
//! real LLM/embedding round trip to complete.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use evermem::memory::{
    ConversationMeta, DeletionAudit, EventLog, MemCell, MemCellType, ParentType, Role, Scene, Scope, MAGIC_ALL,
};
use evermem::retrieval::{RetrieveMethod, SearchRequest};
use evermem::store::{ForesightFilter, MemCellFilter};
use evermem::{Config, Engine, IngestOutcome, MemoryApi, MemoryError, Message, TenantEnvelope};

fn test_config() -> Config {
    Config {
        store_path: ":memory:".to_string(),
        llm_backend_url: "http://127.0.0.1:0".to_string(),
        embedding_backend_url: "http://127.0.0.1:0".to_string(),
        extraction_threads: 1,
        extraction_queue_size: 16,
        extraction_queue_high_watermark: 8,
        extraction_timeout_seconds: 5,
        default_embedding_dim: 2,
        prometheus_port: 0,
    }
}

fn api() -> MemoryApi {
    MemoryApi::new(Arc::new(Engine::new(test_config()).unwrap()))
}

fn meta() -> ConversationMeta {
    ConversationMeta {
        group_id: "g1".to_string(),
        scene: Scene::Companion,
        name: "chat".to_string(),
        description: None,
        created_at: Utc::now(),
        default_timezone: "UTC".to_string(),
        user_details: Default::default(),
        tags: vec![],
    }
}

fn scope() -> Scope {
    Scope {
        user_id: None,
        group_id: Some("g1".to_string()),
    }
}

fn message(conversation_id: &str, content: &str, time: chrono::DateTime<Utc>) -> Message {
    Message {
        message_id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        group_name: None,
        sender_id: "u1".to_string(),
        sender_name: Some("Alice".to_string()),
        role: Role::User,
        content: content.to_string(),
        create_time: time,
        refer_list: vec![],
    }
}

/// S1: messages accumulate until a calendar-date change fires an unforced
/// boundary.
#[tokio::test]
async fn s1_date_change_fires_boundary_after_accumulation() {
    let api = api();
    let tenant = TenantEnvelope::new("org", "space");

    let day1 = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
    let first = api
        .ingest(&tenant, message("conv1", "hello", day1), &meta(), scope(), false)
        .await
        .unwrap();
    assert!(matches!(first, IngestOutcome::Accumulated { depth: 1 }));

    let day2 = Utc.with_ymd_and_hms(2024, 3, 2, 0, 5, 0).unwrap();
    let second = api
        .ingest(&tenant, message("conv1", "good morning", day2), &meta(), scope(), false)
        .await
        .unwrap();
    assert!(matches!(second, IngestOutcome::Processing { .. }));
}

/// S2: the buffer force-flushes once it reaches the tenant's `max_buffer`
/// depth, independent of any content or timing rule.
#[tokio::test]
async fn s2_forced_flush_at_max_buffer_depth() {
    let api = api();
    let tenant = TenantEnvelope::new("org", "space");
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let mut last = None;
    for i in 0..201 {
        let time = base + chrono::Duration::seconds(i);
        last = Some(
            api.ingest(&tenant, message("conv2", "chat", time), &meta(), scope(), false)
                .await
                .unwrap(),
        );
    }
    assert!(matches!(last.unwrap(), IngestOutcome::Processing { .. }));
}

/// S4: soft-delete removes an entity from C5/C6/C7 reads; re-deleting (or
/// deleting something that was never there) is an idempotent no-op.
#[tokio::test]
async fn s4_soft_delete_is_idempotent_and_fans_out() {
    let engine = Arc::new(Engine::new(test_config()).unwrap());
    let tenant = TenantEnvelope::new("org", "space");
    let tenant_ns = tenant.namespace();
    let cell = MemCell {
        event_id: "e1".to_string(),
        scope: scope(),
        timestamp: Utc::now(),
        subject: "subject".to_string(),
        summary: "summary".to_string(),
        episode: "episode".to_string(),
        participants: vec!["u1".to_string()],
        keywords: vec![],
        r#type: MemCellType::Conversation,
        original_data: vec![],
        semantic_memories: vec![],
        event_log: EventLog::default(),
        embedding: vec![0.1, 0.2],
        deletion: DeletionAudit::default(),
    };
    engine.store.memcells.upsert(&tenant_ns, &cell).unwrap();
    engine.keyword_index.upsert(
        &tenant_ns,
        evermem::keyword_index::KeywordDoc {
            entity_id: "e1".to_string(),
            memory_type: evermem::memory::MemoryType::EpisodicMemory,
            scope: scope(),
            search_content: "subject summary episode".to_string(),
            weight: 1.0,
        },
    );

    let api = MemoryApi::new(engine.clone());
    let filter = MemCellFilter {
        group_id: Some("g1".to_string()),
        limit: 10,
        ..Default::default()
    };
    assert_eq!(api.fetch_memcells(&tenant, &filter).unwrap().len(), 1);
    assert!(engine.keyword_index.contains(&tenant_ns, "e1"));

    assert!(api.delete_memcell(&tenant, "e1", "tester").unwrap());
    assert!(api.fetch_memcells(&tenant, &filter).unwrap().is_empty());
    assert!(!engine.keyword_index.contains(&tenant_ns, "e1"));

    // idempotent re-delete
    assert!(!api.delete_memcell(&tenant, "e1", "tester").unwrap());
    // deleting something that never existed
    assert!(!api.delete_memcell(&tenant, "never-existed", "tester").unwrap());
}

/// S5: requesting both `user_id` and `group_id` as `"__all__"` is rejected
/// rather than silently returning everything.
#[tokio::test]
async fn s5_scope_too_broad_is_rejected_at_search() {
    let api = api();
    let tenant = TenantEnvelope::new("org", "space");
    let request = SearchRequest {
        tenant_ns: tenant.namespace(),
        query_text: "anything".to_string(),
        user_id: Some(MAGIC_ALL.to_string()),
        group_id: Some(MAGIC_ALL.to_string()),
        memory_types: vec![],
        retrieve_method: RetrieveMethod::Keyword,
        top_k: 10,
        conversation_ids: vec![],
        deadline: std::time::Duration::from_secs(1),
    };
    let result = api.search(&tenant, request).await;
    assert!(matches!(result, Err(MemoryError::ScopeTooBroad)));
}

/// S3: a keyword search scoped to `event_log` returns the atomic fact whose
/// text matches, fully hydrated through the façade.
#[tokio::test]
async fn s3_keyword_search_returns_matching_atomic_fact() {
    let engine = Arc::new(Engine::new(test_config()).unwrap());
    let tenant = TenantEnvelope::new("org", "space");
    let tenant_ns = tenant.namespace();

    let record = evermem::memory::EventLogRecord {
        id: "ev1".to_string(),
        parent_type: ParentType::Memcell,
        parent_id: "e1".to_string(),
        scope: scope(),
        atomic_fact: "Alice enjoys Sichuan food".to_string(),
        timestamp: Utc::now(),
        vector: vec![0.1, 0.2],
        vector_model: "evermem-embedding-v1".to_string(),
        participants: Some(vec!["u1".to_string()]),
        event_type: None,
        extend: Default::default(),
    };
    engine.store.event_log.upsert(&tenant_ns, &record).unwrap();
    engine.keyword_index.upsert(
        &tenant_ns,
        evermem::keyword_index::KeywordDoc {
            entity_id: "ev1".to_string(),
            memory_type: evermem::memory::MemoryType::EventLog,
            scope: scope(),
            search_content: record.atomic_fact.clone(),
            weight: 1.0,
        },
    );

    let api = MemoryApi::new(engine);
    let request = SearchRequest {
        tenant_ns: tenant_ns.clone(),
        query_text: "Sichuan".to_string(),
        user_id: None,
        group_id: Some("g1".to_string()),
        memory_types: vec![evermem::memory::MemoryType::EventLog],
        retrieve_method: RetrieveMethod::Keyword,
        top_k: 10,
        conversation_ids: vec![],
        deadline: std::time::Duration::from_secs(1),
    };
    let response = api.search(&tenant, request).await.unwrap();
    assert_eq!(response.total_count, 1);
    let hit = &response.memories["g1"][0];
    match hit {
        evermem::retrieval::HydratedMemory::EventLog(r) => assert_eq!(r.atomic_fact, "Alice enjoys Sichuan food"),
        other => panic!("expected an event log hit, got {other:?}"),
    }
}

/// S6: fetching foresight records by date range returns only the ones whose
/// `[start, end]` overlaps the query window (spec §4.C5 overlap rule).
#[tokio::test]
async fn s6_foresight_fetch_returns_only_overlapping_dates() {
    let engine = Arc::new(Engine::new(test_config()).unwrap());
    let tenant = TenantEnvelope::new("org", "space");
    let tenant_ns = tenant.namespace();

    let in_range = evermem::memory::ForesightRecord {
        id: "f1".to_string(),
        parent_type: ParentType::Memcell,
        parent_id: "e1".to_string(),
        scope: scope(),
        content: "trip to Chengdu".to_string(),
        evidence: "mentioned booking flights".to_string(),
        start_time: chrono::NaiveDate::from_ymd_opt(2024, 6, 1),
        end_time: chrono::NaiveDate::from_ymd_opt(2024, 6, 10),
        duration_days: Some(9),
        vector: vec![0.1, 0.2],
        vector_model: "evermem-embedding-v1".to_string(),
    };
    let out_of_range = evermem::memory::ForesightRecord {
        id: "f2".to_string(),
        parent_type: ParentType::Memcell,
        parent_id: "e1".to_string(),
        scope: scope(),
        content: "trip to Lhasa".to_string(),
        evidence: "mentioned next year".to_string(),
        start_time: chrono::NaiveDate::from_ymd_opt(2025, 1, 1),
        end_time: chrono::NaiveDate::from_ymd_opt(2025, 1, 10),
        duration_days: Some(9),
        vector: vec![0.1, 0.2],
        vector_model: "evermem-embedding-v1".to_string(),
    };
    engine.store.foresight.upsert(&tenant_ns, &in_range).unwrap();
    engine.store.foresight.upsert(&tenant_ns, &out_of_range).unwrap();

    let api = MemoryApi::new(engine);
    let filter = ForesightFilter {
        user_id: None,
        group_id: Some("g1".to_string()),
        overlaps_start: chrono::NaiveDate::from_ymd_opt(2024, 6, 5),
        overlaps_end: chrono::NaiveDate::from_ymd_opt(2024, 6, 20),
        limit: 10,
    };
    let results = api.fetch_foresight(&tenant, &filter).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "f1");
}

/// Blank content is rejected before it ever touches the buffer.
#[tokio::test]
async fn ingest_validation_runs_before_any_buffering() {
    let api = api();
    let tenant = TenantEnvelope::new("org", "space");
    let mut msg = message("conv3", "whatever", Utc::now());
    msg.content = "   ".to_string();
    let result = api.ingest(&tenant, msg, &meta(), scope(), false).await;
    assert!(matches!(result, Err(MemoryError::ValidationError(_))));
}
