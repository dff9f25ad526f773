use thiserror::Error;

/// Validation and contract errors exposed by `storeline-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid source '{value}', expected one of shopify, amazon, ebay, mock")]
    InvalidSource { value: String },

    #[error("unknown key_mode '{value}', expected one of triple, pair")]
    InvalidKeyMode { value: String },

    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("invalid run status '{value}', expected success or error")]
    InvalidRunStatus { value: String },
}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
