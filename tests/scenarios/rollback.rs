//! Test: Rollback - a failed deploy or test stage is undone by the deploy agent

use crate::helpers::*;
use crate::mock_agent::*;
use std::sync::Arc;
use vedops::{AgentError, RunStatus, StageStatus, ROLLBACK_STAGE};

const YAML: &str = r#"
name: "Test: Rollback"
llm: { provider: ollama, model: llama3 }
stages:
  - id: build
  - id: deploy
    depends_on: [build]
    max_retries: 0
  - id: test
    depends_on: [deploy]
    max_retries: 0
"#;

fn cluster_down() -> AgentError {
    AgentError::Execution("cluster unreachable".into())
}

fn smoke_failed() -> AgentError {
    AgentError::Execution("smoke tests failed".into())
}

#[tokio::test]
async fn test_deploy_failure_rolls_back() {
    let deploy = Arc::new(ScriptedAgent::new("deploy", vec![fail(cluster_down), ok("previous release restored")]));
    let orchestrator = orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::succeeding("build", "ok")))
            .with("deploy", deploy.clone())
            .with("test", Arc::new(ScriptedAgent::succeeding("test", "unused")))
            .build(),
    );

    let run = run_to_end(&orchestrator, fast_config(YAML)).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_stage_status(&run, "test", StageStatus::Skipped);
    assert_eq!(deploy.calls(), 2);

    let rollback = run.audit.last().unwrap();
    assert_eq!(rollback.stage, ROLLBACK_STAGE);
    assert_eq!(rollback.status, StageStatus::Succeeded);
    assert!(rollback.message.as_deref().unwrap().contains("'deploy'"));

    // The rollback prompt names the failure and sees the successful build
    let seen = deploy.seen();
    let prompt = seen[1].prompt.as_deref().unwrap();
    assert!(prompt.contains("cluster unreachable"));
    assert_eq!(seen[1].prior, vec!["build"]);

    // Not a stage of its own
    assert!(run.stage(ROLLBACK_STAGE).is_none());
}

#[tokio::test]
async fn test_failed_test_stage_rolls_back_through_deploy() {
    let deploy = Arc::new(ScriptedAgent::succeeding("deploy", "live"));
    let orchestrator = orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::succeeding("build", "ok")))
            .with("deploy", deploy.clone())
            .with("test", Arc::new(ScriptedAgent::new("test", vec![fail(smoke_failed)])))
            .build(),
    );

    let run = run_to_end(&orchestrator, fast_config(YAML)).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_stage_status(&run, "deploy", StageStatus::Succeeded);
    assert_eq!(deploy.calls(), 2);
    assert_eq!(audit_order(&run), vec!["build", "deploy", "test", ROLLBACK_STAGE]);
}

#[tokio::test]
async fn test_auto_rollback_disabled() {
    let deploy = Arc::new(ScriptedAgent::new("deploy", vec![fail(cluster_down)]));
    let orchestrator = orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::succeeding("build", "ok")))
            .with("deploy", deploy.clone())
            .with("test", Arc::new(ScriptedAgent::succeeding("test", "unused")))
            .build(),
    );

    let mut config = fast_config(YAML);
    config.auto_rollback = false;
    let run = run_to_end(&orchestrator, config).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_eq!(deploy.calls(), 1);
    assert!(!audit_order(&run).contains(&ROLLBACK_STAGE.to_string()));
}

/// A rollback that fails is recorded but leaves the run failed for the
/// original reason
#[tokio::test]
async fn test_failed_rollback_is_audited() {
    let deploy = Arc::new(ScriptedAgent::new("deploy", vec![fail(cluster_down)]));
    let orchestrator = orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::succeeding("build", "ok")))
            .with("deploy", deploy.clone())
            .with("test", Arc::new(ScriptedAgent::succeeding("test", "unused")))
            .build(),
    );

    let run = run_to_end(&orchestrator, fast_config(YAML)).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_eq!(deploy.calls(), 2);
    let rollback = run.audit.last().unwrap();
    assert_eq!(rollback.stage, ROLLBACK_STAGE);
    assert_eq!(rollback.status, StageStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("required stage 'deploy'"));
}

/// Build failures never reach a deployment, so nothing is rolled back
#[tokio::test]
async fn test_build_failure_skips_rollback() {
    let deploy = Arc::new(ScriptedAgent::succeeding("deploy", "unused"));
    let orchestrator = orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::new("build", vec![fail(|| AgentError::Rejected("no Dockerfile".into()))])))
            .with("deploy", deploy.clone())
            .with("test", Arc::new(ScriptedAgent::succeeding("test", "unused")))
            .build(),
    );

    let run = run_to_end(&orchestrator, fast_config(YAML)).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_eq!(deploy.calls(), 0);
    assert_eq!(audit_order(&run), vec!["build", "deploy", "test"]);
}
