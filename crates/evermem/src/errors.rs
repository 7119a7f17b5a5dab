//! Error taxonomy (spec §7). Internal code propagates `anyhow::Result`; every
//! façade-boundary operation converts the final error into one of these kinds
//! before it crosses into the outer transport.

use thiserror::Error;

pub type MemoryResult<T> = Result<T, MemoryError>;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("tenant unresolved: {0}")]
    TenantUnresolved(String),

    #[error("scope too broad: user_id and group_id cannot both be MAGIC_ALL")]
    ScopeTooBroad,

    #[error("message buffer unavailable: {0}")]
    BufferUnavailable(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("store inconsistent: {0}")]
    StoreInconsistent(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl MemoryError {
    /// Stable code for `{status: failed, code, message}` translation at the façade.
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::TenantUnresolved(_) => "TENANT_UNRESOLVED",
            MemoryError::ScopeTooBroad => "SCOPE_TOO_BROAD",
            MemoryError::BufferUnavailable(_) => "BUFFER_UNAVAILABLE",
            MemoryError::ExtractionFailed(_) => "EXTRACTION_FAILED",
            MemoryError::StoreInconsistent(_) => "STORE_INCONSISTENT",
            MemoryError::Cancelled => "CANCELLED",
            MemoryError::DeadlineExceeded => "DEADLINE_EXCEEDED",
            MemoryError::ValidationError(_) => "VALIDATION_ERROR",
            MemoryError::Internal(_) => "INTERNAL",
        }
    }

    /// Numeric status a transport layer would typically surface this as.
    pub fn status_hint(&self) -> u16 {
        match self {
            MemoryError::TenantUnresolved(_) => 401,
            MemoryError::ScopeTooBroad => 400,
            MemoryError::BufferUnavailable(_) => 503,
            MemoryError::ExtractionFailed(_) => 500,
            MemoryError::StoreInconsistent(_) => 500,
            MemoryError::Cancelled => 499,
            MemoryError::DeadlineExceeded => 408,
            MemoryError::ValidationError(_) => 400,
            MemoryError::Internal(_) => 500,
        }
    }
}
