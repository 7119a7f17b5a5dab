// EverMem/crates/evermem/src/lib.rs

pub mod api;
pub mod boundary;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod errors;
pub mod extraction;
pub mod keyword_index;
pub mod memory;
pub mod metrics;
pub mod retrieval;
pub mod scope;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod tenant;
pub mod utils;
pub mod vector_index;
pub mod worker_pool;

// Public API exports
pub use api::{IngestOutcome, MemoryApi};
pub use config::Config;
pub use engine::Engine;
pub use errors::{MemoryError, MemoryResult};
pub use memory::{
    ConversationMeta, EventLogRecord, ForesightRecord, MemCell, MemoryType, Message, Scope, UserProfile,
};
pub use tenant::{TenantConfig, TenantEnvelope};
