//! Test utility functions for vedops scenarios

use std::sync::Arc;
use std::time::Duration;
use vedops::provider::EchoProvider;
use vedops::{
    Agent, AgentRegistry, FailureKind, Orchestrator, PipelineConfig, PipelineRun, RunStatus,
    StageResult, StageStatus,
};

/// Parse a pipeline and shrink its retry/grace timings so scenarios stay fast
pub fn fast_config(yaml: &str) -> PipelineConfig {
    let mut config = PipelineConfig::from_yaml(yaml).expect("scenario YAML should be valid");
    config.retry.initial_backoff_ms = 10;
    config.retry.max_backoff_ms = 50;
    config.cancel_grace_secs = 1;
    config
}

/// Collects mock agents into a registry
#[derive(Default)]
pub struct Agents {
    registry: AgentRegistry,
}

/// Start an empty registry
pub fn agents() -> Agents {
    Agents::default()
}

impl Agents {
    pub fn with(mut self, role: &str, agent: Arc<dyn Agent>) -> Self {
        self.registry.register_agent(role, agent);
        self
    }

    pub fn build(self) -> AgentRegistry {
        self.registry
    }
}

/// Orchestrator that never talks to a real LLM
pub fn orchestrator(registry: AgentRegistry) -> Orchestrator {
    Orchestrator::new(registry).with_provider(Arc::new(EchoProvider::default()))
}

/// Run a pipeline to completion with a bounded wait
pub async fn run_to_end(orchestrator: &Orchestrator, config: PipelineConfig) -> PipelineRun {
    let run = orchestrator.submit(config).expect("pipeline should be accepted");
    tokio::time::timeout(Duration::from_secs(30), orchestrator.wait(run.id))
        .await
        .expect("run should finish within 30s")
        .expect("run should reach a final status")
}

/// Poll until `check` holds for the run, or panic after 10s
pub async fn wait_until<F>(orchestrator: &Orchestrator, run: &PipelineRun, check: F) -> PipelineRun
where
    F: Fn(&PipelineRun) -> bool,
{
    for _ in 0..1000 {
        let snapshot = orchestrator.status(run.id).expect("run should be known");
        if check(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached for run {}", run.id);
}

pub fn stage<'a>(run: &'a PipelineRun, id: &str) -> &'a StageResult {
    run.stage(id)
        .unwrap_or_else(|| panic!("stage '{}' missing from run", id))
}

/// Assert the run finished with `expected`
pub fn assert_run_status(run: &PipelineRun, expected: RunStatus) {
    assert_eq!(
        run.status, expected,
        "run status mismatch; stages: {}",
        summary(run)
    );
}

pub fn assert_stage_status(run: &PipelineRun, id: &str, expected: StageStatus) {
    assert_eq!(
        stage(run, id).status,
        expected,
        "stage '{}' status mismatch; stages: {}",
        id,
        summary(run)
    );
}

pub fn assert_stage_failed_with(run: &PipelineRun, id: &str, kind: FailureKind) {
    let result = stage(run, id);
    assert_eq!(result.status, StageStatus::Failed, "stages: {}", summary(run));
    assert_eq!(result.error_kind, Some(kind));
    assert!(result.error.is_some(), "failed stage '{}' should keep its error", id);
}

/// Stage ids in the order they appear in the audit trail
pub fn audit_order(run: &PipelineRun) -> Vec<String> {
    run.audit.iter().map(|e| e.stage.clone()).collect()
}

/// Get a summary of the run
pub fn summary(run: &PipelineRun) -> String {
    run.stages
        .iter()
        .map(|s| format!("{}={}", s.stage, s.status))
        .collect::<Vec<_>>()
        .join(", ")
}
