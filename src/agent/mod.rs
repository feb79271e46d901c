//! Agents executing pipeline stages
//!
//! An [`Agent`] turns a [`StageContext`] into an opaque JSON payload. The
//! orchestrator owns timeouts, retries and bookkeeping; agents only do the
//! work and observe the cancellation token at safe points.

pub mod error;
pub mod llm_agent;
pub mod registry;
pub mod repository;
pub mod roles;

use crate::core::context::StageContext;
use async_trait::async_trait;

pub use error::AgentError;
pub use llm_agent::LlmAgent;
pub use registry::{AgentFactory, AgentRegistry};
pub use repository::RepositorySnapshot;
pub use roles::AgentRole;

/// Trait for stage execution - allows for different implementations
#[async_trait]
pub trait Agent: Send + Sync {
    /// Role name this agent implements
    fn role(&self) -> &str;

    /// Execute one attempt of a stage
    async fn execute(&self, ctx: &StageContext) -> Result<serde_json::Value, AgentError>;
}
