//! Execution state models

use crate::core::config::PipelineConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Run was submitted but the driver has not started yet
    Pending,
    /// Run is executing stages
    Running,
    /// Every required stage succeeded
    Succeeded,
    /// At least one required stage failed
    Failed,
    /// Run was cancelled
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(StateError::UnknownStatus(other.to_string())),
        }
    }
}

/// Status of a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Waiting for dependencies or a free slot
    Pending,
    /// An attempt is in flight
    Running,
    /// An attempt failed and the stage is waiting to be retried
    Retried,
    /// Stage completed successfully
    Succeeded,
    /// Stage failed (retry budget exhausted or non-retryable error)
    Failed,
    /// Stage never ran (failed dependency or cancelled run)
    Skipped,
    /// Stage was in flight when the run was cancelled
    Cancelled,
}

impl StageStatus {
    /// Check if stage is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Succeeded
                | StageStatus::Failed
                | StageStatus::Skipped
                | StageStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` respects the stage lifecycle.
    pub fn can_transition_to(&self, next: StageStatus) -> bool {
        use StageStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Retried)
                | (Running, Cancelled)
                | (Retried, Running)
                | (Retried, Failed)
                | (Retried, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Retried => "retried",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
            StageStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "running" => Ok(StageStatus::Running),
            "retried" => Ok(StageStatus::Retried),
            "succeeded" => Ok(StageStatus::Succeeded),
            "failed" => Ok(StageStatus::Failed),
            "skipped" => Ok(StageStatus::Skipped),
            "cancelled" => Ok(StageStatus::Cancelled),
            other => Err(StateError::UnknownStatus(other.to_string())),
        }
    }
}

/// Category of a stage failure, kept alongside the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Provider,
    Execution,
    Rejected,
    Timeout,
    Cancelled,
    Dependency,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Provider => "provider",
            FailureKind::Execution => "execution",
            FailureKind::Rejected => "rejected",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Dependency => "dependency",
        }
    }
}

impl FromStr for FailureKind {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "provider" => Ok(FailureKind::Provider),
            "execution" => Ok(FailureKind::Execution),
            "rejected" => Ok(FailureKind::Rejected),
            "timeout" => Ok(FailureKind::Timeout),
            "cancelled" => Ok(FailureKind::Cancelled),
            "dependency" => Ok(FailureKind::Dependency),
            other => Err(StateError::UnknownStatus(other.to_string())),
        }
    }
}

/// Errors raised when a state change would break the run lifecycle
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("stage '{stage}' cannot move from {from} to {to}")]
    InvalidStageTransition {
        stage: String,
        from: StageStatus,
        to: StageStatus,
    },

    #[error("run {run_id} already finished with status {status}")]
    RunAlreadyFinished { run_id: Uuid, status: RunStatus },

    #[error("unknown stage '{0}'")]
    UnknownStage(String),

    #[error("unknown status '{0}'")]
    UnknownStatus(String),
}

/// Result record for one stage of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage identifier
    pub stage: String,

    /// Agent role that executes the stage
    pub role: String,

    /// Current status
    pub status: StageStatus,

    /// Payload produced by the agent (opaque to the orchestrator)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,

    /// Error detail of the last failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,

    /// Number of attempts started
    pub attempts: u32,

    /// Number of retries performed (attempts after the first)
    pub retries: u32,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

impl StageResult {
    pub fn new(stage: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            role: role.into(),
            status: StageStatus::Pending,
            output: None,
            error: None,
            error_kind: None,
            attempts: 0,
            retries: 0,
            started_at: None,
            finished_at: None,
            duration_ms: None,
        }
    }

    /// Move to `next`, rejecting transitions out of terminal states.
    pub fn transition(&mut self, next: StageStatus) -> Result<(), StateError> {
        if !self.status.can_transition_to(next) {
            return Err(StateError::InvalidStageTransition {
                stage: self.stage.clone(),
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        match next {
            StageStatus::Running => {
                self.attempts += 1;
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            StageStatus::Retried => {
                self.retries += 1;
            }
            _ => {}
        }

        self.status = next;

        if next.is_terminal() {
            self.finished_at = Some(now);
            self.duration_ms = self
                .started_at
                .and_then(|started| (now - started).to_std().ok())
                .map(|d| d.as_millis() as u64);
        }

        Ok(())
    }

    /// Record failure detail without changing status
    pub fn set_error(&mut self, kind: FailureKind, message: impl Into<String>) {
        self.error_kind = Some(kind);
        self.error = Some(message.into());
    }
}

/// One entry of the per-run audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub stage: String,
    pub status: StageStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn from_result(result: &StageResult) -> Self {
        Self {
            stage: result.stage.clone(),
            status: result.status,
            attempts: result.attempts,
            message: result.error.clone(),
            recorded_at: result.finished_at.unwrap_or_else(Utc::now),
        }
    }
}

/// One end-to-end execution of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique run ID
    pub id: Uuid,

    pub pipeline_name: String,

    /// Configuration snapshot taken at submission (secrets redacted)
    pub config: PipelineConfig,

    /// Stage results in declared pipeline order
    pub stages: Vec<StageResult>,

    pub status: RunStatus,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Run-level error message (first failed required stage)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Terminal stage results flushed in declared order
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
}

impl PipelineRun {
    /// Create a pending run for the given configuration
    pub fn new(config: &PipelineConfig) -> Self {
        let stages = config
            .stages
            .iter()
            .map(|s| StageResult::new(&s.id, s.role_name()))
            .collect();

        Self {
            id: Uuid::new_v4(),
            pipeline_name: config.name.clone(),
            config: config.redacted(),
            stages,
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            audit: Vec::new(),
        }
    }

    pub fn stage(&self, id: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == id)
    }

    pub fn stage_mut(&mut self, id: &str) -> Option<&mut StageResult> {
        self.stages.iter_mut().find(|s| s.stage == id)
    }

    /// Mark run as started
    pub fn start(&mut self) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::RunAlreadyFinished {
                run_id: self.id,
                status: self.status,
            });
        }
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Move the run to a terminal status; allowed exactly once
    pub fn finish(&mut self, status: RunStatus) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(StateError::RunAlreadyFinished {
                run_id: self.id,
                status: self.status,
            });
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|s| s.status == status).count()
    }

    /// Successful stage results in declared order
    pub fn succeeded_stages(&self) -> Vec<StageResult> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Succeeded)
            .cloned()
            .collect()
    }

    /// Calculate progress (0.0 to 1.0) as the share of terminal stages
    pub fn progress(&self) -> f64 {
        if self.stages.is_empty() {
            return 0.0;
        }
        let done = self.stages.iter().filter(|s| s.status.is_terminal()).count();
        done as f64 / self.stages.len() as f64
    }
}
