//! Agent error types

use crate::core::state::FailureKind;
use crate::provider::ProviderError;
use thiserror::Error;

/// Error types for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Domain failure that may succeed on another attempt
    #[error("execution failed: {0}")]
    Execution(String),

    /// Domain failure that retrying cannot fix
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("timed out after {0} seconds")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,
}

impl AgentError {
    /// Whether another attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Provider(ProviderError::Auth { .. }) => false,
            AgentError::Provider(_) | AgentError::Execution(_) | AgentError::Timeout(_) => true,
            AgentError::Rejected(_) | AgentError::Cancelled => false,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            AgentError::Provider(_) => FailureKind::Provider,
            AgentError::Execution(_) => FailureKind::Execution,
            AgentError::Rejected(_) => FailureKind::Rejected,
            AgentError::Timeout(_) => FailureKind::Timeout,
            AgentError::Cancelled => FailureKind::Cancelled,
        }
    }
}
