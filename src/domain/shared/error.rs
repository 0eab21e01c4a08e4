//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, DomainError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("This connection has already been marked as paid")]
    AlreadyPaid,

    #[error("Choose a different pack")]
    SamePlan,

    #[error("Only payments of this month can be deleted")]
    NotCurrentMonth,

    #[error("Please provide SMCs list to pay.")]
    EmptyBatch,

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    InUse(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Serialization failure, deadlock or a lost race on a unique index.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Whether the unit of work that produced this error may be replayed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::TransactionConflict(_))
    }

    /// Validation-class errors are shown to users verbatim.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            DomainError::AlreadyPaid
                | DomainError::SamePlan
                | DomainError::NotCurrentMonth
                | DomainError::EmptyBatch
                | DomainError::AlreadyExists(_)
                | DomainError::InUse(_)
                | DomainError::ValidationError(_)
        )
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::NotFound(_) => "not_found",
            DomainError::AlreadyPaid => "already_paid",
            DomainError::SamePlan => "same_plan",
            DomainError::NotCurrentMonth => "not_current_month",
            DomainError::EmptyBatch => "empty_batch",
            DomainError::AlreadyExists(_) => "already_exists",
            DomainError::InUse(_) => "in_use",
            DomainError::ValidationError(_) => "validation",
            DomainError::TransactionConflict(_) => "conflict",
            DomainError::Unavailable(_) => "unavailable",
            DomainError::Internal(_) => "internal",
        }
    }
}
