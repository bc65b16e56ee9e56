//! The domain error taxonomy.
//!
//! Callers that need to branch on *kind* of failure (the HTTP layer mapping
//! to status codes, the dispatcher deciding whether to retry) match on
//! [`OrchestratorError`] rather than string-matching an `anyhow::Error`.
//! Everything else -- internal query wiring, transaction plumbing -- stays on
//! `anyhow::Result` with `.context()` at the call site.

use thiserror::Error;

/// A structured error carrying the taxonomy code a caller needs to branch on.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid user id")]
    InvalidUserId,

    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    #[error("expression produced too many operations (limit is {limit})")]
    TooManyOperations { limit: usize },

    #[error("invalid operand {0:?}")]
    InvalidOperand(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("referenced operation {0} not found")]
    RefNotFound(uuid::Uuid),

    #[error("referenced operation {0} has not completed")]
    RefNotCompleted(uuid::Uuid),

    #[error("calculation {0} not found")]
    CalculationNotFound(uuid::Uuid),

    #[error("operation {0} not found")]
    OperationNotFound(uuid::Uuid),

    #[error("agent {0} not found")]
    AgentNotFound(String),

    #[error("caller is not authorized to access calculation {0}")]
    Unauthorized(uuid::Uuid),

    #[error("no agent available for operation kind {0}")]
    NoAgentAvailable(String),

    #[error("agent {0} is at capacity")]
    AgentAtCapacity(String),

    #[error("agent {0} is not running")]
    AgentNotRunning(String),

    #[error("agent pool is not running")]
    PoolNotRunning,

    #[error("agent inbox is full")]
    QueueFull,

    #[error("operation cancelled")]
    ContextCanceled,

    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// The taxonomy tag used for logging and HTTP-status mapping.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUserId => "INVALID_USER_ID",
            Self::InvalidExpression(_) => "INVALID_EXPRESSION",
            Self::TooManyOperations { .. } => "TOO_MANY_OPERATIONS",
            Self::InvalidOperand(_) => "INVALID_OPERAND",
            Self::DivisionByZero => "DIVISION_BY_ZERO",
            Self::RefNotFound(_) => "REF_NOT_FOUND",
            Self::RefNotCompleted(_) => "REF_NOT_COMPLETED",
            Self::CalculationNotFound(_) => "CALCULATION_NOT_FOUND",
            Self::OperationNotFound(_) => "OPERATION_NOT_FOUND",
            Self::AgentNotFound(_) => "AGENT_NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::NoAgentAvailable(_) => "NO_AGENT_AVAILABLE",
            Self::AgentAtCapacity(_) => "AGENT_AT_CAPACITY",
            Self::AgentNotRunning(_) => "AGENT_NOT_RUNNING",
            Self::PoolNotRunning => "POOL_NOT_RUNNING",
            Self::QueueFull => "QUEUE_FULL",
            Self::ContextCanceled => "CONTEXT_CANCELED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a retry loop should treat this as worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NoAgentAvailable(_)
                | Self::AgentAtCapacity(_)
                | Self::QueueFull
                | Self::Internal(_)
        )
    }
}
