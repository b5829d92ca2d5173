//! Error types for commit evaluation.

use crate::models::AgentRole;

/// Errors produced by the evaluation core.
///
/// Malformed agent output and pillars with no contributors are expected
/// steady states and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("model invocation failed for {role}: {message}")]
    Generation { role: AgentRole, message: String },

    #[error("agent {role} timed out after {seconds}s")]
    AgentTimeout { role: AgentRole, seconds: u64 },

    #[error("invalid numeric input for {subject}: {detail}")]
    InvalidNumericInput { subject: String, detail: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for evaluation operations.
pub type EvalResult<T> = std::result::Result<T, EvalError>;
