//! Notification hooks for run and stage events
//!
//! Sinks are configured on a [`Notifier`]; each run starts its own
//! [`NotificationDispatch`] with one delivery task per sink, so a slow or
//! failing sink never holds up the run and each sink sees events in the
//! order they were emitted. [`NotificationDispatch::close`] drains the queues
//! when the run ends, so events survive a process that exits right after.

use crate::core::state::{PipelineRun, RunStatus, StageResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on waiting for queued events when a dispatch closes
pub const DRAIN_TIMEOUT: Duration = WEBHOOK_TIMEOUT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    StageFinished,
    RunFinished,
}

/// Event delivered to notification sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: EventKind,
    pub run_id: Uuid,
    pub pipeline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Run or stage status at the time of the event
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn run_started(run: &PipelineRun) -> Self {
        Self {
            kind: EventKind::RunStarted,
            run_id: run.id,
            pipeline: run.pipeline_name.clone(),
            stage: None,
            status: RunStatus::Running.to_string(),
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn stage_finished(run: &PipelineRun, stage: &StageResult) -> Self {
        Self {
            kind: EventKind::StageFinished,
            run_id: run.id,
            pipeline: run.pipeline_name.clone(),
            stage: Some(stage.stage.clone()),
            status: stage.status.to_string(),
            message: stage.error.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn run_finished(run: &PipelineRun) -> Self {
        Self {
            kind: EventKind::RunFinished,
            run_id: run.id,
            pipeline: run.pipeline_name.clone(),
            stage: None,
            status: run.status.to_string(),
            message: run.error.clone(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stage {
            Some(stage) => write!(f, "[{}] stage '{}' {}", self.pipeline, stage, self.status)?,
            None => write!(f, "[{}] run {} {}", self.pipeline, self.run_id, self.status)?,
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

/// Destination for notification events
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &NotificationEvent) -> Result<()>;
}

/// POSTs each event as JSON to a URL
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        &self.url
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        self.client
            .post(&self.url)
            .timeout(WEBHOOK_TIMEOUT)
            .json(event)
            .send()
            .await
            .with_context(|| format!("Failed to reach webhook {}", self.url))?
            .error_for_status()
            .with_context(|| format!("Webhook {} rejected event", self.url))?;
        Ok(())
    }
}

/// Writes events to the tracing log
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        info!("{}", event);
        Ok(())
    }
}

/// Calls a closure for each event
pub struct HandlerSink<F> {
    handler: F,
}

impl<F> HandlerSink<F>
where
    F: Fn(&NotificationEvent) -> Result<()> + Send + Sync,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> NotificationSink for HandlerSink<F>
where
    F: Fn(&NotificationEvent) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        "handler"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        (self.handler)(event)
    }
}

/// Set of configured sinks
#[derive(Clone, Default)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    /// Add an event handler
    pub fn on_event<F>(&mut self, handler: F)
    where
        F: Fn(&NotificationEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.sinks.push(Arc::new(HandlerSink::new(handler)));
    }

    /// Copy with one [`WebhookSink`] per URL added
    pub fn with_webhooks(&self, urls: &[String]) -> Self {
        let mut notifier = self.clone();
        for url in urls {
            notifier.add_sink(Arc::new(WebhookSink::new(url.clone())));
        }
        notifier
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Spawn one delivery task per sink. Must be called inside a Tokio
    /// runtime; the tasks exit once the dispatch is dropped and drained.
    pub fn start(&self) -> NotificationDispatch {
        let (queues, tasks): (Vec<_>, Vec<_>) = self
            .sinks
            .iter()
            .map(|sink| {
                let (tx, mut rx) = mpsc::unbounded_channel::<NotificationEvent>();
                let sink = sink.clone();
                let task = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if let Err(e) = sink.deliver(&event).await {
                            warn!("Notification sink '{}' failed: {:#}", sink.name(), e);
                        }
                    }
                });
                (tx, task)
            })
            .unzip();

        NotificationDispatch { queues, tasks }
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("Notifier").field("sinks", &names).finish()
    }
}

/// Per-run handle that queues events for every sink
#[derive(Debug, Default)]
pub struct NotificationDispatch {
    queues: Vec<mpsc::UnboundedSender<NotificationEvent>>,
    tasks: Vec<JoinHandle<()>>,
}

impl NotificationDispatch {
    /// Fire-and-forget: never blocks and never fails
    pub fn emit(&self, event: NotificationEvent) {
        for queue in &self.queues {
            let _ = queue.send(event.clone());
        }
    }

    /// Stop accepting events and wait up to `limit` for every sink to
    /// deliver what is already queued. Sinks still busy after that are
    /// aborted.
    pub async fn close(mut self, limit: Duration) {
        self.queues.clear();
        if self.tasks.is_empty() {
            return;
        }

        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(limit, async move {
            for task in tasks.iter_mut() {
                if let Err(e) = task.await {
                    warn!("Notification sink task ended abnormally: {}", e);
                }
            }
        })
        .await;

        match drained {
            Ok(()) => debug!("Delivered all queued notifications"),
            Err(_) => {
                warn!(
                    "Notification sinks still busy after {:?}; dropping undelivered events",
                    limit
                );
                for task in &self.tasks {
                    task.abort();
                }
            }
        }
    }
}
