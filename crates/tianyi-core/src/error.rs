use thiserror::Error;

/// Unified error type for the Tianyi memory subsystem.
#[derive(Error, Debug)]
pub enum TianyiError {
    // ── Store errors ───────────────────────────────────────────
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("embedding dimension mismatch: collection expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("dangling reference: relation {relation} points at missing entity {missing}")]
    DanglingReference { relation: String, missing: String },

    #[error("not found: {0}")]
    NotFound(String),

    // ── Model errors ───────────────────────────────────────────
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("llm provider error: {0}")]
    LlmProvider(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl TianyiError {
    /// Whether the caller may retry the failed operation unchanged.
    ///
    /// Only transient backend or provider outages qualify; configuration and
    /// integrity errors will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TianyiError::StoreUnavailable(_) | TianyiError::EmbeddingUnavailable(_)
        )
    }

    /// A copy of this error for reporting one failure against several writes.
    ///
    /// Store and model variants are reproduced exactly; wrapped foreign errors
    /// keep only their message.
    pub fn duplicate(&self) -> Self {
        match self {
            TianyiError::StoreUnavailable(s) => TianyiError::StoreUnavailable(s.clone()),
            TianyiError::DimensionMismatch { expected, actual } => TianyiError::DimensionMismatch {
                expected: *expected,
                actual: *actual,
            },
            TianyiError::DanglingReference { relation, missing } => TianyiError::DanglingReference {
                relation: relation.clone(),
                missing: missing.clone(),
            },
            TianyiError::NotFound(s) => TianyiError::NotFound(s.clone()),
            TianyiError::EmbeddingUnavailable(s) => TianyiError::EmbeddingUnavailable(s.clone()),
            TianyiError::LlmProvider(s) => TianyiError::LlmProvider(s.clone()),
            TianyiError::Config(s) => TianyiError::Config(s.clone()),
            TianyiError::ConfigValidation { field, reason } => TianyiError::ConfigValidation {
                field: field.clone(),
                reason: reason.clone(),
            },
            other => TianyiError::Other(anyhow::anyhow!(other.to_string())),
        }
    }

    /// Shorthand for wrapping a backend error as `StoreUnavailable`.
    pub fn store(err: impl std::fmt::Display) -> Self {
        TianyiError::StoreUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TianyiError>;
