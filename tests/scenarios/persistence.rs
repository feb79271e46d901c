//! Test: Persistence - run snapshots saved through the run store

use crate::helpers::*;
use crate::mock_agent::*;
use std::sync::Arc;
use std::time::Duration;
use vedops::{InMemoryRunStore, RunStatus, RunStore, StageStatus};

const YAML: &str = r#"
name: "Test: Persistence"
llm: { provider: ollama, model: llama3, api_key: sk-not-for-disk }
stages:
  - id: build
  - id: deploy
    depends_on: [build]
"#;

fn chain_orchestrator(store: Arc<dyn RunStore>) -> vedops::Orchestrator {
    orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::succeeding("build", "image built")))
            .with("deploy", Arc::new(ScriptedAgent::succeeding("deploy", "rolled out")))
            .build(),
    )
    .with_store(store)
}

#[tokio::test]
async fn test_final_snapshot_saved() {
    let store = Arc::new(InMemoryRunStore::new());
    let orchestrator = chain_orchestrator(store.clone());

    let run = run_to_end(&orchestrator, fast_config(YAML)).await;
    let saved = store.load(run.id).await.unwrap().expect("run should be saved");

    assert_eq!(saved.status, RunStatus::Succeeded);
    assert_eq!(saved.count(StageStatus::Succeeded), 2);
    assert_eq!(saved.audit.len(), 2);
    assert_eq!(saved.config.llm.api_key.as_deref(), Some("***"));
    assert_eq!(
        saved.stage("deploy").unwrap().output.as_ref().unwrap()["summary"],
        "rolled out"
    );
}

#[tokio::test]
async fn test_history_listing() {
    let store = Arc::new(InMemoryRunStore::new());
    let orchestrator = chain_orchestrator(store.clone());

    let first = run_to_end(&orchestrator, fast_config(YAML)).await;
    let second = run_to_end(&orchestrator, fast_config(YAML)).await;

    let summaries = store.list(Some("Test: Persistence"), 10).await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].run_id, second.id);
    assert_eq!(summaries[1].run_id, first.id);
    assert_eq!(summaries[0].succeeded_stages, 2);
    assert_eq!(summaries[0].total_stages, 2);

    assert!(store.list(Some("other"), 10).await.unwrap().is_empty());
    assert_eq!(store.list(None, 1).await.unwrap().len(), 1);
    assert_eq!(
        store.list_pipelines().await.unwrap(),
        vec!["Test: Persistence".to_string()]
    );
}

/// The store shows a stage as running while its agent is still working
#[tokio::test]
async fn test_in_flight_stage_visible_in_store() {
    let store = Arc::new(InMemoryRunStore::new());
    let orchestrator = orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::succeeding("build", "image built")))
            .with(
                "deploy",
                Arc::new(
                    ScriptedAgent::succeeding("deploy", "rolled out")
                        .with_delay(Duration::from_millis(400)),
                ),
            )
            .build(),
    )
    .with_store(store.clone());

    let run = orchestrator.submit(fast_config(YAML)).unwrap();

    let mut stored = None;
    for _ in 0..300 {
        if let Some(saved) = store.load(run.id).await.unwrap() {
            if saved.stage("deploy").map(|s| s.status) == Some(StageStatus::Running) {
                stored = Some(saved);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let stored = stored.expect("running deploy stage should be stored");
    assert_eq!(stored.status, RunStatus::Running);
    assert_eq!(stored.stage("build").unwrap().status, StageStatus::Succeeded);
    assert!(stored.stage("deploy").unwrap().started_at.is_some());

    let finished = orchestrator.wait(run.id).await.unwrap();
    assert_run_status(&finished, RunStatus::Succeeded);
    let saved = store.load(run.id).await.unwrap().unwrap();
    assert_eq!(saved.stage("deploy").unwrap().status, StageStatus::Succeeded);
}

/// A fresh orchestrator finds earlier runs through the store
#[tokio::test]
async fn test_load_falls_back_to_store() {
    let store: Arc<dyn RunStore> = Arc::new(InMemoryRunStore::new());

    let run = run_to_end(&chain_orchestrator(store.clone()), fast_config(YAML)).await;

    let later = chain_orchestrator(store);
    assert!(later.status(run.id).is_none());
    let loaded = later.load(run.id).await.unwrap().expect("run from store");
    assert_eq!(loaded.id, run.id);
    assert_eq!(loaded.status, RunStatus::Succeeded);

    assert!(later.load(uuid::Uuid::new_v4()).await.unwrap().is_none());
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_store_round_trip() {
    use vedops::SqliteRunStore;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteRunStore::new(dir.path().join("runs.db")).await.unwrap());
    let orchestrator = chain_orchestrator(store.clone());

    let run = run_to_end(&orchestrator, fast_config(YAML)).await;

    // Reopen the database to make sure the snapshot is on disk
    drop(orchestrator);
    let reopened = SqliteRunStore::new(dir.path().join("runs.db")).await.unwrap();
    let saved = reopened.load(run.id).await.unwrap().expect("run in sqlite");

    assert_eq!(saved.status, RunStatus::Succeeded);
    assert_eq!(saved.stages.len(), 2);
    assert_eq!(saved.audit.len(), 2);
    assert_eq!(saved.config.llm.api_key.as_deref(), Some("***"));

    let summaries = reopened.list(None, 10).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].status, RunStatus::Succeeded);
}
