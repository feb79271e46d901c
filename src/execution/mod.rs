//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod recorder;
pub mod rollback;
pub mod scheduler;

pub use engine::{Orchestrator, OrchestratorError, DEFAULT_HISTORY_LIMIT};
pub use executor::{StageEvent, StageExecutor, StageOutcome};
pub use recorder::RunRecorder;
pub use rollback::ROLLBACK_STAGE;
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
