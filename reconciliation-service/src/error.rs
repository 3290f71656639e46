//! Domain errors for reconciliation-service.

use crate::models::TaskStatus;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReconError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} transaction set must not be empty")]
    EmptySet(&'static str),

    #[error("transactions are already part of an active match")]
    AlreadyMatched {
        bank_ids: Vec<Uuid>,
        book_ids: Vec<Uuid>,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid task transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("task was cancelled")]
    Cancelled,

    #[error("job queue full")]
    QueueFull,

    #[error("store error: {0}")]
    Store(anyhow::Error),

    #[error("internal error: {0}")]
    Internal(anyhow::Error),
}

impl ReconError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Short label used for the error counter.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::EmptySet(_) => "empty_set",
            Self::AlreadyMatched { .. } => "already_matched",
            Self::NotFound { .. } => "not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::QueueFull => "queue_full",
            Self::Store(_) => "store",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for ReconError {
    fn from(err: sqlx::Error) -> Self {
        ReconError::Store(anyhow::Error::new(err))
    }
}

impl From<ReconError> for AppError {
    fn from(err: ReconError) -> Self {
        crate::services::metrics::record_error(err.kind());
        match err {
            ReconError::Validation(msg) => AppError::Unprocessable(anyhow::anyhow!(msg)),
            e @ ReconError::EmptySet(_) => AppError::Unprocessable(anyhow::anyhow!(e.to_string())),
            ReconError::AlreadyMatched { bank_ids, book_ids } => AppError::ConflictWithDetails {
                message: "Transactions are already part of an active match".to_string(),
                details: serde_json::json!({
                    "bank_transaction_ids": bank_ids,
                    "book_transaction_ids": book_ids,
                }),
            },
            e @ ReconError::NotFound { .. } => AppError::NotFound(anyhow::anyhow!(e.to_string())),
            e @ ReconError::InvalidTransition { .. } => {
                AppError::Conflict(anyhow::anyhow!(e.to_string()))
            }
            ReconError::QueueFull => AppError::ServiceUnavailable("Job queue full".to_string()),
            ReconError::Store(e) => AppError::DatabaseError(e),
            e @ (ReconError::Timeout(_) | ReconError::Cancelled) => {
                AppError::InternalError(anyhow::anyhow!(e.to_string()))
            }
            ReconError::Internal(e) => AppError::InternalError(e),
        }
    }
}
