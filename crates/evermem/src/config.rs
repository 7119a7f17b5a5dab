// EverMem/crates/evermem/src/config.rs

use std::env;

use anyhow::{Context, Result};
use tracing::{info, warn};

/// Process-wide configuration, loaded once at startup (spec §9: "construct at
/// startup, dispose on shutdown"). Per-tenant overrides live in
/// `tenant::TenantConfig`; this struct only covers knobs that apply to every
/// tenant sharing one process (store location, collaborator endpoints, pool
/// sizing, default retry/backpressure policy).
#[derive(Debug, Clone)]
pub struct Config {
    pub store_path: String,
    pub llm_backend_url: String,
    pub embedding_backend_url: String,
    pub extraction_threads: usize,
    pub extraction_queue_size: usize,
    pub extraction_queue_high_watermark: usize,
    pub extraction_timeout_seconds: u64,
    pub default_embedding_dim: usize,
    pub prometheus_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let store_path = env::var("EVERMEM_STORE_PATH").unwrap_or_else(|_| "evermem.db".into());
        let llm_backend_url = env::var("EVERMEM_LLM_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8081".into());
        let embedding_backend_url = env::var("EVERMEM_EMBEDDING_URL")
            .unwrap_or_else(|_| llm_backend_url.clone());

        let extraction_threads = if env::var("EVERMEM_EXTRACTION_THREADS")
            .unwrap_or_else(|_| "auto".into())
            == "auto"
        {
            Self::auto_detect_extraction_threads()
        } else {
            env::var("EVERMEM_EXTRACTION_THREADS")
                .unwrap_or_else(|_| "4".into())
                .parse()
                .unwrap_or(4)
        };

        let config = Self {
            store_path,
            llm_backend_url,
            embedding_backend_url,
            extraction_threads,
            extraction_queue_size: env::var("EVERMEM_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".into())
                .parse()
                .context("EVERMEM_QUEUE_SIZE must be an integer")?,
            extraction_queue_high_watermark: env::var("EVERMEM_QUEUE_HIGH_WATERMARK")
                .unwrap_or_else(|_| "800".into())
                .parse()
                .context("EVERMEM_QUEUE_HIGH_WATERMARK must be an integer")?,
            extraction_timeout_seconds: env::var("EVERMEM_EXTRACTION_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "180".into())
                .parse()
                .context("EVERMEM_EXTRACTION_TIMEOUT_SECONDS must be an integer")?,
            default_embedding_dim: env::var("EVERMEM_EMBEDDING_DIM")
                .unwrap_or_else(|_| "384".into())
                .parse()
                .context("EVERMEM_EMBEDDING_DIM must be an integer")?,
            prometheus_port: env::var("EVERMEM_PROMETHEUS_PORT")
                .unwrap_or_else(|_| "9000".into())
                .parse()
                .context("EVERMEM_PROMETHEUS_PORT must be a u16")?,
        };

        info!(
            "EverMem configured: store={}, llm={}, extraction_threads={}, queue_size={}",
            config.store_path, config.llm_backend_url, config.extraction_threads,
            config.extraction_queue_size
        );
        Ok(config)
    }

    fn auto_detect_extraction_threads() -> usize {
        let cpus = num_cpus::get();
        cpus.clamp(2, 8)
    }
}
