// EverMem/crates/evermem/src/main.rs
//
// Minimal in-process debug CLI: ingest a line of input as a message, then
// search. Not a transport — there is no HTTP/RPC surface in this crate,
// only the façade in `api.rs` driven directly.

#[cfg(feature = "cli")]
use std::io::{self, BufRead, Write};
#[cfg(feature = "cli")]
use std::sync::Arc;

#[cfg(feature = "cli")]
use chrono::Utc;
#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use dotenvy::dotenv;
#[cfg(feature = "cli")]
use evermem::memory::{ConversationMeta, Role, Scene, Scope};
#[cfg(feature = "cli")]
use evermem::retrieval::{RetrieveMethod, SearchRequest};
#[cfg(feature = "cli")]
use evermem::{Config, Engine, MemoryApi, Message, TenantEnvelope};

/// Debug CLI: ingest lines of input into one fixed conversation, or search it.
#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "evermem-cli", about = "Local debug driver for the EverMem façade")]
struct Cli {
    /// Overrides EVERMEM_STORE_PATH (sqlite file or ":memory:").
    #[arg(long)]
    store_path: Option<String>,

    /// Tenant organization id.
    #[arg(long, default_value = "debug-org")]
    org: String,

    /// Tenant space id.
    #[arg(long, default_value = "debug-space")]
    space: String,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    evermem::telemetry::init_tracing();

    let cli = Cli::parse();
    let mut cfg = Config::from_env()?;
    if let Some(store_path) = cli.store_path {
        cfg.store_path = store_path;
    }
    let engine = Arc::new(Engine::new(cfg)?);
    let api = MemoryApi::new(engine);
    let tenant = TenantEnvelope::new(cli.org, cli.space);
    let conversation_id = "debug-conversation".to_string();
    let meta = ConversationMeta {
        group_id: "debug-group".to_string(),
        scene: Scene::Assistant,
        name: "debug session".to_string(),
        description: None,
        created_at: Utc::now(),
        default_timezone: "UTC".to_string(),
        user_details: Default::default(),
        tags: vec![],
    };

    println!("evermem debug cli — type a message, or `search <query>`, Ctrl-D to exit");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if let Some(query) = line.strip_prefix("search ") {
            let request = SearchRequest {
                tenant_ns: tenant.namespace(),
                query_text: query.to_string(),
                user_id: None,
                group_id: Some("debug-group".to_string()),
                memory_types: vec![],
                retrieve_method: RetrieveMethod::Hybrid,
                top_k: 10,
                conversation_ids: vec![conversation_id.clone()],
                deadline: std::time::Duration::from_secs(5),
            };
            match api.search(&tenant, request).await {
                Ok(response) => println!("{} hit(s) across {} group(s)", response.total_count, response.memories.len()),
                Err(e) => eprintln!("search failed: {e}"),
            }
            continue;
        }

        let message = Message {
            message_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.clone(),
            group_name: None,
            sender_id: "debug-user".to_string(),
            sender_name: Some("you".to_string()),
            role: Role::User,
            content: line,
            create_time: Utc::now(),
            refer_list: vec![],
        };
        let scope = Scope {
            user_id: None,
            group_id: Some("debug-group".to_string()),
        };
        match api.ingest(&tenant, message, &meta, scope, false).await {
            Ok(outcome) => println!("{outcome:?}"),
            Err(e) => eprintln!("ingest failed: {e}"),
        }
        print!("> ");
        io::stdout().flush().ok();
    }
    Ok(())
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
