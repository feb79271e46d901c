//! Test: Parallel Limits - bounded concurrency and exclusive stages

use crate::helpers::*;
use crate::mock_agent::*;
use std::sync::Arc;
use std::time::Duration;
use vedops::{RunStatus, StageStatus};

fn tracked(gauge: &Arc<ConcurrencyGauge>) -> Arc<TrackedAgent> {
    Arc::new(TrackedAgent::new(gauge.clone(), Duration::from_millis(150)))
}

/// Three independent stages with two slots: all succeed, never more than two at once
#[tokio::test]
async fn test_three_stages_two_slots() {
    let yaml = r#"
name: "Test: Two slots"
llm: { provider: ollama, model: llama3 }
max_parallel_agents: 2
stages:
  - { id: lint, role: tracked, parallel: true }
  - { id: unit, role: tracked, parallel: true }
  - { id: sast, role: tracked, parallel: true }
"#;

    let gauge = Arc::new(ConcurrencyGauge::default());
    let orchestrator = orchestrator(agents().with("tracked", tracked(&gauge)).build());

    let run = orchestrator.submit(fast_config(yaml)).unwrap();

    // Watch the snapshots while the run progresses
    let mut max_running = 0;
    loop {
        let snapshot = orchestrator.status(run.id).unwrap();
        max_running = max_running.max(snapshot.count(StageStatus::Running));
        if snapshot.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let run = orchestrator.wait(run.id).await.unwrap();
    assert_run_status(&run, RunStatus::Succeeded);
    assert_eq!(run.count(StageStatus::Succeeded), 3);
    assert!(max_running <= 2, "saw {} stages running", max_running);
    assert_eq!(gauge.max_seen(), 2);
}

/// With parallel execution disabled stages run one at a time
#[tokio::test]
async fn test_sequential_mode() {
    let yaml = r#"
name: "Test: Sequential"
llm: { provider: ollama, model: llama3 }
parallel_execution: false
stages:
  - { id: a, role: tracked, parallel: true }
  - { id: b, role: tracked, parallel: true }
"#;

    let gauge = Arc::new(ConcurrencyGauge::default());
    let orchestrator = orchestrator(agents().with("tracked", tracked(&gauge)).build());

    let run = run_to_end(&orchestrator, fast_config(yaml)).await;

    assert_run_status(&run, RunStatus::Succeeded);
    assert_eq!(gauge.max_seen(), 1);
    assert!(stage(&run, "a").finished_at <= stage(&run, "b").started_at);
}

/// A stage not marked parallel never overlaps with another stage
#[tokio::test]
async fn test_exclusive_stage_runs_alone() {
    let yaml = r#"
name: "Test: Exclusive"
llm: { provider: ollama, model: llama3 }
max_parallel_agents: 3
stages:
  - { id: scan, role: tracked, parallel: true }
  - { id: migrate, role: tracked }
  - { id: docs, role: tracked, parallel: true }
"#;

    let gauge = Arc::new(ConcurrencyGauge::default());
    let orchestrator = orchestrator(agents().with("tracked", tracked(&gauge)).build());

    let run = run_to_end(&orchestrator, fast_config(yaml)).await;

    assert_run_status(&run, RunStatus::Succeeded);
    assert_eq!(gauge.max_seen(), 1);

    let scan = stage(&run, "scan");
    let migrate = stage(&run, "migrate");
    let docs = stage(&run, "docs");
    assert!(scan.finished_at <= migrate.started_at);
    assert!(migrate.finished_at <= docs.started_at);
}

/// Parallel stages behind a shared dependency fan out together
#[tokio::test]
async fn test_fan_out_after_dependency() {
    let yaml = r#"
name: "Test: Fan out"
llm: { provider: ollama, model: llama3 }
max_parallel_agents: 3
stages:
  - { id: deploy, role: tracked }
  - { id: test, role: tracked, parallel: true, depends_on: [deploy] }
  - { id: governance, role: tracked, parallel: true, depends_on: [deploy] }
"#;

    let gauge = Arc::new(ConcurrencyGauge::default());
    let orchestrator = orchestrator(agents().with("tracked", tracked(&gauge)).build());

    let run = run_to_end(&orchestrator, fast_config(yaml)).await;

    assert_run_status(&run, RunStatus::Succeeded);
    assert_eq!(gauge.max_seen(), 2);
    assert_eq!(audit_order(&run), vec!["deploy", "test", "governance"]);
}
