//! Orchestrator - validates submissions and drives pipeline runs

use crate::{
    agent::{Agent, AgentRegistry},
    core::{
        config::{ConfigError, PipelineConfig, RetryPolicy},
        context::StageContext,
        pipeline::Pipeline,
        state::{FailureKind, PipelineRun},
    },
    execution::{
        executor::{StageEvent, StageExecutor, StageOutcome},
        recorder::RunRecorder,
        rollback::{may_roll_back, rollback_stage, rollback_trigger, ROLLBACK_ROLE},
        scheduler::{ExecutionScheduler, SchedulingStrategy},
    },
    notify::Notifier,
    persistence::RunStore,
    provider::{build_provider, LlmProvider},
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("run {0} stopped without reaching a final status")]
    RunAbandoned(Uuid),
}

/// Finished runs kept in memory by default
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

struct RunHandle {
    state: watch::Receiver<PipelineRun>,
    cancel: CancellationToken,
}

/// Entry point for submitting, observing and cancelling pipeline runs
pub struct Orchestrator {
    registry: AgentRegistry,
    store: Option<Arc<dyn RunStore>>,
    notifier: Notifier,
    provider_override: Option<Arc<dyn LlmProvider>>,
    history_limit: usize,
    runs: Mutex<HashMap<Uuid, RunHandle>>,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(AgentRegistry::with_builtin_roles())
    }
}

impl Orchestrator {
    pub fn new(registry: AgentRegistry) -> Self {
        Self {
            registry,
            store: None,
            notifier: Notifier::new(),
            provider_override: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Persist every run snapshot to `store`
    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Use `provider` for every run instead of the one each config names
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider_override = Some(provider);
        self
    }

    /// Keep at most `limit` finished runs in memory; older ones are evicted
    /// on the next submission and stay reachable through [`Orchestrator::load`]
    /// when a store is configured
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Validate `config` and start a run for it.
    ///
    /// Returns the pending snapshot right away; the run proceeds on a
    /// spawned driver task, so this must be called within a Tokio runtime.
    /// Nothing is started when an error is returned.
    pub fn submit(&self, config: PipelineConfig) -> Result<PipelineRun, ConfigError> {
        let pipeline = Arc::new(Pipeline::from_config(&config)?);

        let provider = match &self.provider_override {
            Some(provider) => provider.clone(),
            None => build_provider(&config.llm)?,
        };

        let agents = pipeline
            .stages()
            .iter()
            .map(|stage| {
                self.registry
                    .resolve(&stage.role, provider.clone())
                    .ok_or_else(|| ConfigError::UnknownRole {
                        stage: stage.id.clone(),
                        role: stage.role.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let rollback_agent = if config.auto_rollback && may_roll_back(&pipeline) {
            let agent = self.registry.resolve(ROLLBACK_ROLE.as_str(), provider.clone());
            if agent.is_none() {
                warn!(
                    "Pipeline {} enables auto_rollback but no '{}' agent is registered",
                    config.name, ROLLBACK_ROLE
                );
            }
            agent
        } else {
            None
        };

        let run = PipelineRun::new(&config);
        let run_id = run.id;
        let (tx, rx) = watch::channel(run.clone());
        let cancel = CancellationToken::new();

        let notifications = self
            .notifier
            .with_webhooks(&config.notifications.webhooks)
            .start();

        let driver = RunDriver {
            run_id,
            scheduler: ExecutionScheduler::new(SchedulingStrategy::from_config(&config)),
            retry: config.retry.clone(),
            grace: config.cancel_grace(),
            config: Arc::new(run.config.clone()),
            recorder: RunRecorder::new(tx, pipeline.clone(), self.store.clone(), notifications),
            pipeline,
            agents,
            rollback_agent,
            cancel: cancel.clone(),
        };

        {
            let mut runs = self.lock_runs();
            evict_finished(&mut runs, self.history_limit);
            runs.insert(run_id, RunHandle { state: rx, cancel });
        }
        info!(
            "Submitted pipeline {} as run {} using {}",
            config.name,
            run_id,
            provider.name()
        );
        tokio::spawn(driver.drive());

        Ok(run)
    }

    /// Current snapshot of a run started by this orchestrator
    pub fn status(&self, run_id: Uuid) -> Option<PipelineRun> {
        self.lock_runs()
            .get(&run_id)
            .map(|handle| handle.state.borrow().clone())
    }

    /// Watch a run's snapshots as they change
    pub fn subscribe(&self, run_id: Uuid) -> Option<watch::Receiver<PipelineRun>> {
        self.lock_runs().get(&run_id).map(|handle| handle.state.clone())
    }

    /// Snapshots of every run started by this orchestrator
    pub fn runs(&self) -> Vec<PipelineRun> {
        let mut runs: Vec<PipelineRun> = self
            .lock_runs()
            .values()
            .map(|handle| handle.state.borrow().clone())
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        runs
    }

    /// Request cooperative cancellation; finished runs are left alone
    pub fn cancel(&self, run_id: Uuid) -> Result<(), OrchestratorError> {
        let runs = self.lock_runs();
        let handle = runs
            .get(&run_id)
            .ok_or(OrchestratorError::RunNotFound(run_id))?;

        if handle.state.borrow().status.is_terminal() {
            debug!("Run {} already finished; ignoring cancel", run_id);
            return Ok(());
        }

        info!("Cancelling run {}", run_id);
        handle.cancel.cancel();
        Ok(())
    }

    /// Wait until the run reaches a final status
    pub async fn wait(&self, run_id: Uuid) -> Result<PipelineRun, OrchestratorError> {
        let mut rx = self
            .subscribe(run_id)
            .ok_or(OrchestratorError::RunNotFound(run_id))?;

        let run = rx
            .wait_for(|run| run.status.is_terminal())
            .await
            .map_err(|_| OrchestratorError::RunAbandoned(run_id))?;
        Ok(run.clone())
    }

    /// Submit and wait for completion
    pub async fn execute(&self, config: PipelineConfig) -> Result<PipelineRun, OrchestratorError> {
        let run = self.submit(config)?;
        self.wait(run.id).await
    }

    /// Run snapshot from memory, falling back to the run store
    pub async fn load(&self, run_id: Uuid) -> anyhow::Result<Option<PipelineRun>> {
        if let Some(run) = self.status(run_id) {
            return Ok(Some(run));
        }
        match &self.store {
            Some(store) => store.load(run_id).await,
            None => Ok(None),
        }
    }

    fn lock_runs(&self) -> MutexGuard<'_, HashMap<Uuid, RunHandle>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Drop the oldest finished runs until at most `keep` remain
fn evict_finished(runs: &mut HashMap<Uuid, RunHandle>, keep: usize) {
    let mut finished: Vec<(chrono::DateTime<chrono::Utc>, Uuid)> = runs
        .iter()
        .filter_map(|(id, handle)| {
            let run = handle.state.borrow();
            run.status.is_terminal().then(|| (run.created_at, *id))
        })
        .collect();
    if finished.len() <= keep {
        return;
    }

    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        debug!("Evicting finished run {} from memory", id);
        runs.remove(&id);
    }
}

/// Per-run task owning scheduling and every state change of one run
struct RunDriver {
    run_id: Uuid,
    pipeline: Arc<Pipeline>,
    agents: Vec<Arc<dyn Agent>>,
    rollback_agent: Option<Arc<dyn Agent>>,
    config: Arc<PipelineConfig>,
    scheduler: ExecutionScheduler,
    retry: RetryPolicy,
    grace: Duration,
    cancel: CancellationToken,
    recorder: RunRecorder,
}

impl RunDriver {
    async fn drive(mut self) -> PipelineRun {
        self.recorder.start().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut in_flight = 0usize;
        let mut cancel_seen = false;

        loop {
            if self.cancel.is_cancelled() {
                if !cancel_seen {
                    cancel_seen = true;
                    info!(
                        "Run {} cancelled; waiting for {} in-flight stage(s)",
                        self.run_id, in_flight
                    );
                    self.recorder.skip_pending("pipeline cancelled").await;
                }
            } else {
                let batch = {
                    let run = self.recorder.current();
                    self.scheduler.next_stages(&self.pipeline, &run)
                };
                if !batch.is_empty() {
                    debug!("Run {} dispatching stages at {:?}", self.run_id, batch);
                }
                for position in batch {
                    self.dispatch(position, &tx).await;
                    in_flight += 1;
                }
            }

            if in_flight == 0 {
                break;
            }

            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => {
                        if self.handle(event).await {
                            in_flight -= 1;
                        }
                    }
                    None => break,
                },
                _ = self.cancel.cancelled(), if !cancel_seen => {}
            }
        }

        if self.cancel.is_cancelled() {
            debug!("Run {} cancelled; no rollback", self.run_id);
        } else {
            self.roll_back().await;
        }

        self.recorder.finish().await
    }

    /// Run the deploy agent once to undo a failed release
    async fn roll_back(&mut self) {
        let Some(agent) = self.rollback_agent.clone() else {
            return;
        };
        let Some(failed) = rollback_trigger(&self.pipeline, &self.recorder.current()).cloned() else {
            return;
        };

        warn!("Initiating rollback due to {} failure", failed.stage);
        let stage = rollback_stage(&self.config, &failed);
        let ctx = StageContext::new(self.run_id, stage.clone(), self.config.clone())
            .with_prior(self.recorder.current().succeeded_stages())
            .with_cancel(self.cancel.clone());
        let executor = StageExecutor::new(agent, stage, self.retry.clone(), self.grace);

        // Attempt events of the one-shot rollback are not tracked
        let (events, _ignored) = mpsc::unbounded_channel();
        let outcome = run_guarded(executor, usize::MAX, ctx, events).await;
        self.recorder.rollback_finished(&failed.stage, outcome).await;
    }

    async fn dispatch(&mut self, position: usize, events: &mpsc::UnboundedSender<StageEvent>) {
        let stage = self.pipeline.stages()[position].clone();
        let prior = self.recorder.current().succeeded_stages();
        self.recorder.stage_started(position).await;

        let ctx = StageContext::new(self.run_id, stage.clone(), self.config.clone())
            .with_prior(prior)
            .with_cancel(self.cancel.clone());
        let executor = StageExecutor::new(
            self.agents[position].clone(),
            stage,
            self.retry.clone(),
            self.grace,
        );

        let events = events.clone();
        tokio::spawn(async move {
            let outcome = run_guarded(executor, position, ctx, events.clone()).await;
            let _ = events.send(StageEvent::Finished { position, outcome });
        });
    }

    /// Apply a stage event; true when the stage task is done
    async fn handle(&mut self, event: StageEvent) -> bool {
        match event {
            StageEvent::AttemptStarted { position, attempt } => {
                debug!(
                    "Stage {} attempt {} started",
                    self.pipeline.stages()[position].id,
                    attempt
                );
                self.recorder.stage_started(position).await;
                false
            }
            StageEvent::AttemptFailed {
                position,
                attempt,
                kind,
                error,
                retry_in,
            } => {
                debug!(
                    "Stage {} attempt {} failed ({}), retry in {:?}",
                    self.pipeline.stages()[position].id,
                    attempt,
                    kind.as_str(),
                    retry_in
                );
                self.recorder.stage_retried(position, kind, &error).await;
                false
            }
            StageEvent::Finished { position, outcome } => {
                self.recorder.stage_finished(position, outcome).await;
                true
            }
        }
    }
}

/// Run the executor on its own task so a panicking agent becomes an
/// execution failure instead of taking the driver down
async fn run_guarded(
    executor: StageExecutor,
    position: usize,
    ctx: StageContext,
    events: mpsc::UnboundedSender<StageEvent>,
) -> StageOutcome {
    let stage_id = ctx.stage.id.clone();
    let task = tokio::spawn(async move { executor.run(position, ctx, &events).await });

    match task.await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Stage {} task panicked: {}", stage_id, e);
            StageOutcome::Failed {
                kind: FailureKind::Execution,
                error: format!("agent panicked: {}", e),
            }
        }
    }
}
