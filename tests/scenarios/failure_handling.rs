//! Test: Failure Handling - failed stages, skipped dependents, optional stages

use crate::helpers::*;
use crate::mock_agent::*;
use std::sync::Arc;
use vedops::{AgentError, FailureKind, RunStatus, StageStatus};

/// A required stage failing non-retryably fails the run and skips dependents
#[tokio::test]
async fn test_required_failure_skips_dependents() {
    let yaml = r#"
name: "Test: Required failure"
llm: { provider: ollama, model: llama3 }
stages:
  - id: build
    max_retries: 0
  - id: deploy
    depends_on: [build]
  - id: test
    depends_on: [deploy]
"#;

    let build = Arc::new(ScriptedAgent::new(
        "build",
        vec![fail(|| AgentError::Rejected("Dockerfile missing".into()))],
    ));
    let deploy = Arc::new(ScriptedAgent::succeeding("deploy", "unused"));
    let orchestrator = orchestrator(
        agents()
            .with("build", build.clone())
            .with("deploy", deploy.clone())
            .with("test", Arc::new(ScriptedAgent::succeeding("test", "unused")))
            .build(),
    );

    let run = run_to_end(&orchestrator, fast_config(yaml)).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_stage_failed_with(&run, "build", FailureKind::Rejected);
    assert_stage_status(&run, "deploy", StageStatus::Skipped);
    assert_stage_status(&run, "test", StageStatus::Skipped);
    assert_eq!(stage(&run, "test").error_kind, Some(FailureKind::Dependency));

    assert_eq!(build.calls(), 1);
    assert_eq!(deploy.calls(), 0);
    assert!(run.error.as_deref().unwrap().contains("build"));
}

/// Independent branches keep running after a sibling fails
#[tokio::test]
async fn test_independent_branch_continues() {
    let yaml = r#"
name: "Test: Branches"
llm: { provider: ollama, model: llama3 }
stages:
  - id: build
  - id: security_scan
    parallel: true
    depends_on: [build]
  - id: deploy
    parallel: true
    depends_on: [build]
  - id: governance
    depends_on: [security_scan]
"#;

    let orchestrator = orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::succeeding("build", "ok")))
            .with("security_scan", Arc::new(ScriptedAgent::new("security_scan", vec![fail(|| AgentError::Rejected("critical CVE".into()))])))
            .with("deploy", Arc::new(ScriptedAgent::succeeding("deploy", "live")))
            .with("governance", Arc::new(ScriptedAgent::succeeding("governance", "unused")))
            .build(),
    );

    let run = run_to_end(&orchestrator, fast_config(yaml)).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_stage_status(&run, "build", StageStatus::Succeeded);
    assert_stage_status(&run, "deploy", StageStatus::Succeeded);
    assert_stage_failed_with(&run, "security_scan", FailureKind::Rejected);
    assert_stage_status(&run, "governance", StageStatus::Skipped);
}

/// Optional stage failures do not fail the run
#[tokio::test]
async fn test_optional_stage_failure() {
    let yaml = r#"
name: "Test: Optional"
llm: { provider: ollama, model: llama3 }
stages:
  - id: deploy
  - id: optimization
    depends_on: [deploy]
    required: false
    retryable: false
  - id: tuning_report
    role: observability
    depends_on: [optimization]
    required: false
"#;

    let orchestrator = orchestrator(
        agents()
            .with("deploy", Arc::new(ScriptedAgent::succeeding("deploy", "live")))
            .with("optimization", Arc::new(ScriptedAgent::new("optimization", vec![fail(|| AgentError::Execution("profiler crashed".into()))])))
            .with("observability", Arc::new(ScriptedAgent::succeeding("observability", "unused")))
            .build(),
    );

    let run = run_to_end(&orchestrator, fast_config(yaml)).await;

    assert_run_status(&run, RunStatus::Succeeded);
    assert_stage_failed_with(&run, "optimization", FailureKind::Execution);
    assert_stage_status(&run, "tuning_report", StageStatus::Skipped);
}

/// A required stage that never ran because an optional dependency failed
/// still fails the run
#[tokio::test]
async fn test_required_stage_skipped_by_optional_dependency() {
    let yaml = r#"
name: "Test: Optional gate"
llm: { provider: ollama, model: llama3 }
stages:
  - id: security_scan
    required: false
    retryable: false
  - id: deploy
    depends_on: [security_scan]
"#;

    let orchestrator = orchestrator(
        agents()
            .with("security_scan", Arc::new(ScriptedAgent::new("security_scan", vec![fail(|| AgentError::Execution("scanner offline".into()))])))
            .with("deploy", Arc::new(ScriptedAgent::succeeding("deploy", "unused")))
            .build(),
    );

    let run = run_to_end(&orchestrator, fast_config(yaml)).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_stage_status(&run, "deploy", StageStatus::Skipped);
    assert!(run.error.as_deref().unwrap().contains("deploy"));
}

/// A governance rejection from the built-in agent is final
#[tokio::test]
async fn test_governance_rejection_is_not_retried() {
    use async_trait::async_trait;
    use vedops::provider::CompletionOptions;
    use vedops::{LlmProvider, ProviderError};

    struct Rejecting;

    #[async_trait]
    impl LlmProvider for Rejecting {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn model(&self) -> &str {
            "gate"
        }

        async fn complete(&self, _prompt: &str, _options: &CompletionOptions) -> Result<String, ProviderError> {
            Ok("Too many open findings.\nDECISION: REJECT 3 high severity issues".to_string())
        }
    }

    let yaml = r#"
name: "Test: Governance"
llm: { provider: ollama, model: llama3 }
stages:
  - id: governance
    max_retries: 3
"#;

    let orchestrator = vedops::Orchestrator::new(vedops::AgentRegistry::with_builtin_roles())
        .with_provider(Arc::new(Rejecting));
    let run = run_to_end(&orchestrator, fast_config(yaml)).await;

    assert_run_status(&run, RunStatus::Failed);
    assert_stage_failed_with(&run, "governance", FailureKind::Rejected);
    assert_eq!(stage(&run, "governance").attempts, 1);
    assert!(stage(&run, "governance")
        .error
        .as_deref()
        .unwrap()
        .contains("3 high severity issues"));
}
