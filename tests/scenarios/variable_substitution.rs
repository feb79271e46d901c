//! Test: Variable Substitution - prompt templates rendered for each stage

use crate::helpers::*;
use crate::mock_agent::*;
use std::sync::Arc;
use vedops::RunStatus;

/// Test that pipeline variables and earlier outputs reach the prompt
#[tokio::test]
async fn test_variables_and_stage_outputs() {
    let yaml = r#"
name: "Test: Variables"
llm: { provider: ollama, model: llama3 }
variables:
  service: payments
  environment: staging
stages:
  - id: build
    prompt: "Build {{ service }}"
  - id: deploy
    depends_on: [build]
    prompt: "Deploy {{ service }} to {{ environment }} using {{ stages.build.output }} ({{ current_stage }})"
"#;

    let build = Arc::new(ScriptedAgent::new("build", vec![Reply::Output(serde_json::json!("app:2.1"))]));
    let deploy = Arc::new(ScriptedAgent::succeeding("deploy", "done"));
    let orchestrator = orchestrator(
        agents()
            .with("build", build.clone())
            .with("deploy", deploy.clone())
            .build(),
    );

    let run = run_to_end(&orchestrator, fast_config(yaml)).await;

    assert_run_status(&run, RunStatus::Succeeded);
    assert_eq!(build.seen()[0].prompt.as_deref(), Some("Build payments"));
    assert_eq!(
        deploy.seen()[0].prompt.as_deref(),
        Some("Deploy payments to staging using app:2.1 (deploy)")
    );
}

/// Overrides applied to the config before submit win over file values
#[tokio::test]
async fn test_variable_override() {
    let yaml = r#"
name: "Test: Override"
llm: { provider: ollama, model: llama3 }
variables:
  environment: staging
stages:
  - id: deploy
    prompt: "Target {{ environment }}"
"#;

    let deploy = Arc::new(ScriptedAgent::succeeding("deploy", "done"));
    let orchestrator = orchestrator(agents().with("deploy", deploy.clone()).build());

    let mut config = fast_config(yaml);
    config
        .variables
        .insert("environment".to_string(), "production".to_string());
    run_to_end(&orchestrator, config).await;

    assert_eq!(deploy.seen()[0].prompt.as_deref(), Some("Target production"));
}

/// Unknown placeholders are left untouched
#[tokio::test]
async fn test_unknown_placeholder_kept() {
    let yaml = r#"
name: "Test: Unknown"
llm: { provider: ollama, model: llama3 }
stages:
  - id: build
    prompt: "Use {{ missing }}"
"#;

    let build = Arc::new(ScriptedAgent::succeeding("build", "done"));
    let orchestrator = orchestrator(agents().with("build", build.clone()).build());

    run_to_end(&orchestrator, fast_config(yaml)).await;

    assert_eq!(build.seen()[0].prompt.as_deref(), Some("Use {{ missing }}"));
}
