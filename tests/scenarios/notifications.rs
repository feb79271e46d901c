//! Test: Notifications - lifecycle events reach every sink

use crate::helpers::*;
use crate::mock_agent::*;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use vedops::notify::{EventKind, NotificationEvent, NotificationSink, Notifier};
use vedops::{AgentError, RunStatus};

const YAML: &str = r#"
name: "Test: Notifications"
llm: { provider: ollama, model: llama3 }
max_parallel_agents: 2
stages:
  - id: build
  - id: security_scan
    parallel: true
    depends_on: [build]
  - id: test
    parallel: true
    depends_on: [build]
"#;

/// Collect events until the run-finished event arrives
async fn collect_until_finished(events: &Arc<Mutex<Vec<NotificationEvent>>>) -> Vec<NotificationEvent> {
    for _ in 0..500 {
        {
            let seen = events.lock().unwrap();
            if seen.iter().any(|e| e.kind == EventKind::RunFinished) {
                return seen.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run finished event never delivered");
}

fn recording_notifier() -> (Notifier, Arc<Mutex<Vec<NotificationEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let mut notifier = Notifier::new();
    notifier.on_event(move |event| {
        sink.lock().unwrap().push(event.clone());
        Ok(())
    });
    (notifier, events)
}

#[tokio::test]
async fn test_lifecycle_events_in_order() {
    let (notifier, events) = recording_notifier();
    let scan = Arc::new(
        ScriptedAgent::succeeding("security_scan", "clean").with_delay(Duration::from_millis(100)),
    );
    let orchestrator = orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::succeeding("build", "ok")))
            .with("security_scan", scan)
            .with("test", Arc::new(ScriptedAgent::succeeding("test", "passed")))
            .build(),
    )
    .with_notifier(notifier);

    let run = run_to_end(&orchestrator, fast_config(YAML)).await;
    assert_run_status(&run, RunStatus::Succeeded);

    let events = collect_until_finished(&events).await;
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::RunStarted,
            EventKind::StageFinished,
            EventKind::StageFinished,
            EventKind::StageFinished,
            EventKind::RunFinished,
        ]
    );

    // Stage events follow declared order even though `test` finished first
    let stages: Vec<&str> = events.iter().filter_map(|e| e.stage.as_deref()).collect();
    assert_eq!(stages, vec!["build", "security_scan", "test"]);

    assert!(events.iter().all(|e| e.run_id == run.id));
    assert_eq!(events.last().unwrap().status, "succeeded");
}

#[tokio::test]
async fn test_failed_stage_event_carries_error() {
    let (notifier, events) = recording_notifier();
    let orchestrator = orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::new("build", vec![fail(|| AgentError::Rejected("no Dockerfile".into()))])))
            .with("security_scan", Arc::new(ScriptedAgent::succeeding("security_scan", "unused")))
            .with("test", Arc::new(ScriptedAgent::succeeding("test", "unused")))
            .build(),
    )
    .with_notifier(notifier);

    let run = run_to_end(&orchestrator, fast_config(YAML)).await;
    assert_run_status(&run, RunStatus::Failed);

    let events = collect_until_finished(&events).await;
    let build = events
        .iter()
        .find(|e| e.stage.as_deref() == Some("build"))
        .expect("build event");
    assert_eq!(build.status, "failed");
    assert!(build.message.as_deref().unwrap().contains("no Dockerfile"));

    let finished = events.last().unwrap();
    assert_eq!(finished.kind, EventKind::RunFinished);
    assert_eq!(finished.status, "failed");
}

struct BrokenSink;

#[async_trait]
impl NotificationSink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn deliver(&self, _event: &NotificationEvent) -> anyhow::Result<()> {
        anyhow::bail!("sink unavailable")
    }
}

/// A failing sink neither blocks other sinks nor changes the run outcome
#[tokio::test]
async fn test_failing_sink_is_isolated() {
    let (notifier, events) = recording_notifier();
    let notifier = notifier.with_sink(Arc::new(BrokenSink));
    let orchestrator = orchestrator(
        agents()
            .with("build", Arc::new(ScriptedAgent::succeeding("build", "ok")))
            .with("security_scan", Arc::new(ScriptedAgent::succeeding("security_scan", "clean")))
            .with("test", Arc::new(ScriptedAgent::succeeding("test", "passed")))
            .build(),
    )
    .with_notifier(notifier);

    let run = run_to_end(&orchestrator, fast_config(YAML)).await;

    assert_run_status(&run, RunStatus::Succeeded);
    assert_eq!(collect_until_finished(&events).await.len(), 5);
}

/// Sink that takes a while per event
struct SlowSink {
    seen: Arc<Mutex<Vec<EventKind>>>,
}

#[async_trait]
impl NotificationSink for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    async fn deliver(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.seen.lock().unwrap().push(event.kind);
        Ok(())
    }
}

/// Every event is delivered before `execute` returns, so a caller may drop
/// the runtime straight away
#[test]
fn test_events_delivered_before_runtime_shutdown() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let notifier = Notifier::new().with_sink(Arc::new(SlowSink { seen: seen.clone() }));

    let config = fast_config(
        r#"
name: "Test: Drain"
llm: { provider: ollama, model: llama3 }
stages:
  - id: build
  - id: security_scan
    depends_on: [build]
"#,
    );

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let run = runtime.block_on(async move {
        let orchestrator = orchestrator(
            agents()
                .with("build", Arc::new(ScriptedAgent::succeeding("build", "ok")))
                .with("security_scan", Arc::new(ScriptedAgent::succeeding("security_scan", "clean")))
                .build(),
        )
        .with_notifier(notifier);
        orchestrator.execute(config).await.unwrap()
    });
    drop(runtime);

    assert_run_status(&run, RunStatus::Succeeded);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            EventKind::RunStarted,
            EventKind::StageFinished,
            EventKind::StageFinished,
            EventKind::RunFinished,
        ]
    );
}
