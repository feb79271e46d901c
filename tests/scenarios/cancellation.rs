//! Test: Cancellation - cooperative cancel with a grace period

use crate::helpers::*;
use crate::mock_agent::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vedops::{FailureKind, OrchestratorError, RunStatus, StageStatus};

/// Cancel mid-run: the in-flight stage is cancelled, finished stages keep their status
#[tokio::test]
async fn test_cancel_mid_run() {
    let yaml = r#"
name: "Test: Cancel"
llm: { provider: ollama, model: llama3 }
stages:
  - id: build
  - id: deploy
    depends_on: [build]
  - id: test
    depends_on: [deploy]
"#;

    let deploy = Arc::new(
        ScriptedAgent::succeeding("deploy", "never").with_delay(Duration::from_secs(30)),
    );
    let orchestrator = orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::succeeding("build", "built")))
            .with("deploy", deploy.clone())
            .with("test", Arc::new(ScriptedAgent::succeeding("test", "never")))
            .build(),
    );

    let run = orchestrator.submit(fast_config(yaml)).unwrap();
    wait_until(&orchestrator, &run, |r| {
        r.stage("deploy").map(|s| s.status) == Some(StageStatus::Running)
    })
    .await;

    let cancelled_at = Instant::now();
    orchestrator.cancel(run.id).unwrap();
    let run = orchestrator.wait(run.id).await.unwrap();

    // The cooperative agent stops well within the 1s grace period
    assert!(cancelled_at.elapsed() < Duration::from_secs(2));
    assert_run_status(&run, RunStatus::Cancelled);
    assert_stage_status(&run, "build", StageStatus::Succeeded);
    assert_stage_status(&run, "deploy", StageStatus::Cancelled);
    assert_stage_status(&run, "test", StageStatus::Skipped);
    assert_eq!(stage(&run, "deploy").error_kind, Some(FailureKind::Cancelled));
    assert_eq!(run.audit.len(), 3);
}

/// An agent that ignores cancellation is abandoned after the grace period
#[tokio::test]
async fn test_stubborn_agent_abandoned() {
    let yaml = r#"
name: "Test: Stubborn"
llm: { provider: ollama, model: llama3 }
stages:
  - id: deploy
    role: stubborn
"#;

    let orchestrator = orchestrator(
        agents()
            .with("stubborn", Arc::new(StubbornAgent::new(Duration::from_secs(30))))
            .build(),
    );

    let run = orchestrator.submit(fast_config(yaml)).unwrap();
    wait_until(&orchestrator, &run, |r| r.stages[0].status == StageStatus::Running).await;

    let cancelled_at = Instant::now();
    orchestrator.cancel(run.id).unwrap();
    let run = orchestrator.wait(run.id).await.unwrap();

    let elapsed = cancelled_at.elapsed();
    assert!(elapsed >= Duration::from_millis(900), "grace period not honored: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5));
    assert_run_status(&run, RunStatus::Cancelled);
    assert_stage_status(&run, "deploy", StageStatus::Cancelled);
}

/// Cancelling during a retry backoff ends the stage as cancelled
#[tokio::test]
async fn test_cancel_during_backoff() {
    let yaml = r#"
name: "Test: Backoff cancel"
llm: { provider: ollama, model: llama3 }
stages:
  - id: build
    max_retries: 5
"#;

    let build = Arc::new(ScriptedAgent::new(
        "build",
        vec![fail(|| vedops::AgentError::Execution("flaky".into()))],
    ));
    let orchestrator = orchestrator(agents().with("build", build.clone()).build());

    let mut config = fast_config(yaml);
    config.retry.initial_backoff_ms = 10_000;
    config.retry.max_backoff_ms = 10_000;

    let run = orchestrator.submit(config).unwrap();
    wait_until(&orchestrator, &run, |r| r.stages[0].status == StageStatus::Retried).await;

    orchestrator.cancel(run.id).unwrap();
    let run = tokio::time::timeout(Duration::from_secs(5), orchestrator.wait(run.id))
        .await
        .expect("backoff should be interrupted")
        .unwrap();

    assert_run_status(&run, RunStatus::Cancelled);
    assert_stage_status(&run, "build", StageStatus::Cancelled);
    assert_eq!(build.calls(), 1);
}

/// Cancel is a no-op for finished runs and an error for unknown ones
#[tokio::test]
async fn test_cancel_edge_cases() {
    let yaml = r#"
name: "Test: Cancel edges"
llm: { provider: ollama, model: llama3 }
stages:
  - id: build
"#;

    let orchestrator = orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::succeeding("build", "ok")))
            .build(),
    );
    let run = run_to_end(&orchestrator, fast_config(yaml)).await;

    orchestrator.cancel(run.id).unwrap();
    assert_eq!(orchestrator.status(run.id).unwrap().status, RunStatus::Succeeded);

    assert!(matches!(
        orchestrator.cancel(uuid::Uuid::new_v4()),
        Err(OrchestratorError::RunNotFound(_))
    ));
}
