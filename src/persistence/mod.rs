//! Persistence layer for pipeline run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::state::{PipelineRun, RunStatus, StageStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Run status
    pub status: RunStatus,

    pub created_at: DateTime<Utc>,

    /// When the run finished (if finished)
    pub finished_at: Option<DateTime<Utc>>,

    /// Progress (0.0 to 1.0)
    pub progress: f64,

    pub succeeded_stages: usize,
    pub failed_stages: usize,
    pub total_stages: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    /// Create a summary from a run
    pub fn from_run(run: &PipelineRun) -> Self {
        Self {
            run_id: run.id,
            pipeline_name: run.pipeline_name.clone(),
            status: run.status,
            created_at: run.created_at,
            finished_at: run.finished_at,
            progress: run.progress(),
            succeeded_stages: run.count(StageStatus::Succeeded),
            failed_stages: run.count(StageStatus::Failed),
            total_stages: run.stages.len(),
            error: run.error.clone(),
        }
    }
}

/// Aggregate outcome and duration figures over stored runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total_runs: usize,
    pub succeeded_runs: usize,
    pub failed_runs: usize,
    pub cancelled_runs: usize,

    /// Durations cover runs with both start and finish times
    pub avg_duration_ms: Option<f64>,
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
}

impl RunStatistics {
    pub fn from_runs<'a>(runs: impl IntoIterator<Item = &'a PipelineRun>) -> Self {
        let mut stats = RunStatistics::default();
        let mut durations = Vec::new();

        for run in runs {
            stats.total_runs += 1;
            match run.status {
                RunStatus::Succeeded => stats.succeeded_runs += 1,
                RunStatus::Failed => stats.failed_runs += 1,
                RunStatus::Cancelled => stats.cancelled_runs += 1,
                RunStatus::Pending | RunStatus::Running => {}
            }
            if let (Some(started), Some(finished)) = (run.started_at, run.finished_at) {
                let ms = finished.signed_duration_since(started).num_milliseconds().max(0);
                durations.push(ms as u64);
            }
        }

        if !durations.is_empty() {
            let total: u64 = durations.iter().sum();
            stats.avg_duration_ms = Some(total as f64 / durations.len() as f64);
            stats.min_duration_ms = durations.iter().min().copied();
            stats.max_duration_ms = durations.iter().max().copied();
        }
        stats
    }

    /// Share of runs that succeeded, 0.0 when there are none
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.succeeded_runs as f64 / self.total_runs as f64
        }
    }
}

/// Trait for run persistence backends
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace a run snapshot
    async fn save(&self, run: &PipelineRun) -> Result<()>;

    /// Load a run by ID
    async fn load(&self, run_id: Uuid) -> Result<Option<PipelineRun>>;

    /// Most recent runs first, optionally for one pipeline
    async fn list(&self, pipeline: Option<&str>, limit: usize) -> Result<Vec<RunSummary>>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;

    /// Statistics over runs created at or after `since`, optionally for
    /// one pipeline
    async fn statistics(
        &self,
        pipeline: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<RunStatistics>;
}

/// In-memory run store (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<Uuid, PipelineRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, run: &PipelineRun) -> Result<()> {
        self.runs.write().await.insert(run.id, run.clone());
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> Result<Option<PipelineRun>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list(&self, pipeline: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut summaries: Vec<RunSummary> = runs
            .values()
            .filter(|r| pipeline.map_or(true, |p| r.pipeline_name == p))
            .map(RunSummary::from_run)
            .collect();

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn statistics(
        &self,
        pipeline: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<RunStatistics> {
        let runs = self.runs.read().await;
        Ok(RunStatistics::from_runs(runs.values().filter(|r| {
            pipeline.map_or(true, |p| r.pipeline_name == p)
                && since.map_or(true, |t| r.created_at >= t)
        })))
    }
}
