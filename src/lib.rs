//! vedops - a multi-agent DevSecOps pipeline orchestrator

pub mod agent;
pub mod cli;
pub mod core;
pub mod execution;
pub mod notify;
pub mod persistence;
pub mod provider;

// Re-export commonly used types
pub use agent::{Agent, AgentError, AgentRegistry, AgentRole, LlmAgent};
pub use core::{
    ConfigError, FailureKind, Pipeline, PipelineConfig, PipelineRun, ProviderConfig, ProviderKind,
    RunStatus, Stage, StageConfig, StageContext, StageResult, StageStatus,
};
pub use execution::{Orchestrator, OrchestratorError, SchedulingStrategy, ROLLBACK_STAGE};
pub use notify::{NotificationEvent, NotificationSink, Notifier};
pub use persistence::{InMemoryRunStore, RunStatistics, RunStore, RunSummary};
pub use provider::{LlmProvider, ProviderError};

#[cfg(feature = "sqlite")]
pub use persistence::SqliteRunStore;
