//! Run recorder - the only writer of a run's state
//!
//! The driver applies every stage event through the recorder, which
//! publishes the new snapshot on the run's watch channel, keeps the audit
//! trail in declared order and forwards snapshots to the run store and
//! notification sinks.

use crate::{
    core::{
        pipeline::Pipeline,
        state::{AuditEntry, FailureKind, PipelineRun, RunStatus, StageResult, StageStatus, StateError},
    },
    execution::{executor::StageOutcome, rollback::ROLLBACK_STAGE},
    notify::{NotificationDispatch, NotificationEvent, DRAIN_TIMEOUT},
    persistence::RunStore,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct RunRecorder {
    state: watch::Sender<PipelineRun>,
    pipeline: Arc<Pipeline>,
    /// Next stage position awaiting its audit entry
    flushed: usize,
    store: Option<Arc<dyn RunStore>>,
    notifications: NotificationDispatch,
}

impl RunRecorder {
    pub fn new(
        state: watch::Sender<PipelineRun>,
        pipeline: Arc<Pipeline>,
        store: Option<Arc<dyn RunStore>>,
        notifications: NotificationDispatch,
    ) -> Self {
        Self {
            state,
            pipeline,
            flushed: 0,
            store,
            notifications,
        }
    }

    /// Borrow the current snapshot. Drop the guard before recording anything.
    pub fn current(&self) -> watch::Ref<'_, PipelineRun> {
        self.state.borrow()
    }

    pub fn snapshot(&self) -> PipelineRun {
        self.state.borrow().clone()
    }

    pub async fn start(&mut self) {
        let mut result = Ok(());
        self.state.send_modify(|run| result = run.start());
        if let Err(e) = result {
            error!("{}", e);
            return;
        }

        let run = self.snapshot();
        info!("Starting pipeline run: {} ({})", run.pipeline_name, run.id);
        self.notifications.emit(NotificationEvent::run_started(&run));
        self.persist().await;
    }

    /// An attempt of the stage at `position` is now in flight
    pub async fn stage_started(&mut self, position: usize) {
        self.update_stage(position, |stage| stage.transition(StageStatus::Running));
        self.persist().await;
    }

    /// An attempt failed and the stage waits for its retry
    pub async fn stage_retried(&mut self, position: usize, kind: FailureKind, message: &str) {
        self.update_stage(position, |stage| {
            stage.set_error(kind, message);
            stage.transition(StageStatus::Retried)
        });
        self.persist().await;
    }

    /// Record a stage's final outcome; pending dependents of a stage that
    /// did not succeed are skipped.
    pub async fn stage_finished(&mut self, position: usize, outcome: StageOutcome) {
        let status = match outcome {
            StageOutcome::Succeeded(output) => {
                self.update_stage(position, |stage| {
                    stage.output = Some(output);
                    stage.error = None;
                    stage.error_kind = None;
                    stage.transition(StageStatus::Succeeded)
                });
                StageStatus::Succeeded
            }
            StageOutcome::Failed { kind, error } => {
                self.update_stage(position, |stage| {
                    stage.set_error(kind, error);
                    stage.transition(StageStatus::Failed)
                });
                StageStatus::Failed
            }
            StageOutcome::Cancelled { error } => {
                self.update_stage(position, |stage| {
                    stage.set_error(FailureKind::Cancelled, error);
                    stage.transition(StageStatus::Cancelled)
                });
                StageStatus::Cancelled
            }
        };

        if status != StageStatus::Succeeded {
            self.skip_dependents(position, status);
        }

        self.flush();
        self.persist().await;
    }

    /// Skip every stage that has not started yet
    pub async fn skip_pending(&mut self, reason: &str) {
        let pending: Vec<usize> = self
            .current()
            .stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == StageStatus::Pending)
            .map(|(pos, _)| pos)
            .collect();

        for pos in pending {
            self.update_stage(pos, |stage| {
                stage.set_error(FailureKind::Cancelled, reason);
                stage.transition(StageStatus::Skipped)
            });
        }

        self.flush();
        self.persist().await;
    }

    /// Append the outcome of an automatic rollback triggered by `trigger`
    pub async fn rollback_finished(&mut self, trigger: &str, outcome: StageOutcome) {
        let (status, message) = match outcome {
            StageOutcome::Succeeded(_) => {
                info!("Rollback after stage {} completed", trigger);
                (StageStatus::Succeeded, format!("rolled back after '{}' failed", trigger))
            }
            StageOutcome::Failed { error, .. } => {
                error!("Rollback after stage {} failed: {}", trigger, error);
                (StageStatus::Failed, format!("rollback after '{}' failed: {}", trigger, error))
            }
            StageOutcome::Cancelled { error } => (StageStatus::Cancelled, error),
        };

        // Stage entries stay ahead of the rollback entry
        self.skip_stranded();
        self.state.send_modify(|run| {
            run.audit.push(AuditEntry {
                stage: ROLLBACK_STAGE.to_string(),
                status,
                attempts: 1,
                message: Some(message),
                recorded_at: Utc::now(),
            })
        });
        self.persist().await;
    }

    /// Settle the run status, drain notifications and publish the final
    /// snapshot
    pub async fn finish(&mut self) -> PipelineRun {
        self.skip_stranded();

        let (status, message) = self.outcome();

        let mut run = self.snapshot();
        match run.finish(status) {
            Ok(()) => run.error = message,
            Err(e) => error!("{}", e),
        }

        match run.status {
            RunStatus::Succeeded => info!("Pipeline {} ({}) succeeded", run.pipeline_name, run.id),
            status => warn!(
                "Pipeline {} ({}) {}: {}",
                run.pipeline_name,
                run.id,
                status,
                run.error.as_deref().unwrap_or("")
            ),
        }

        // Store and sinks first; waiters may exit as soon as the run is terminal
        self.save(&run).await;
        self.notifications.emit(NotificationEvent::run_finished(&run));
        std::mem::take(&mut self.notifications)
            .close(DRAIN_TIMEOUT)
            .await;
        self.state.send_replace(run.clone());
        run
    }

    /// Cancelled only when some stage was actually cut short; a cancel that
    /// lands after the last stage finished changes nothing
    fn outcome(&self) -> (RunStatus, Option<String>) {
        let run = self.current();
        let interrupted = run.stages.iter().any(|s| {
            s.error_kind == Some(FailureKind::Cancelled)
                && matches!(s.status, StageStatus::Cancelled | StageStatus::Skipped)
        });
        if interrupted {
            return (RunStatus::Cancelled, Some("pipeline cancelled".to_string()));
        }

        let blocking = run
            .stages
            .iter()
            .zip(self.pipeline.stages())
            .find(|(result, stage)| {
                stage.required && matches!(result.status, StageStatus::Failed | StageStatus::Skipped)
            });

        match blocking {
            Some((result, _)) => (
                RunStatus::Failed,
                Some(format!(
                    "required stage '{}' {}: {}",
                    result.stage,
                    result.status,
                    result.error.as_deref().unwrap_or("no error recorded")
                )),
            ),
            None => (RunStatus::Succeeded, None),
        }
    }

    fn skip_dependents(&mut self, position: usize, status: StageStatus) {
        let failed_id = self.pipeline.stages()[position].id.clone();

        for pos in self.pipeline.transitive_dependents(position) {
            if self.current().stages[pos].status != StageStatus::Pending {
                continue;
            }
            info!(
                "Skipping stage {}: dependency {} {}",
                self.pipeline.stages()[pos].id,
                failed_id,
                status
            );
            let message = format!("dependency '{}' {}", failed_id, status);
            self.update_stage(pos, |stage| {
                stage.set_error(FailureKind::Dependency, message);
                stage.transition(StageStatus::Skipped)
            });
        }
    }

    /// Append audit entries for terminal stages in declared order, stopping
    /// at the first stage that is still open
    /// Skip whatever is still pending; nothing more will be dispatched
    fn skip_stranded(&mut self) {
        let stranded: Vec<usize> = self
            .current()
            .stages
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == StageStatus::Pending)
            .map(|(pos, _)| pos)
            .collect();
        for pos in stranded {
            self.update_stage(pos, |stage| {
                stage.set_error(FailureKind::Dependency, "dependencies never succeeded");
                stage.transition(StageStatus::Skipped)
            });
        }
        self.flush();
    }

    fn flush(&mut self) {
        let mut flushed = self.flushed;
        let mut events = Vec::new();

        self.state.send_modify(|run| {
            while flushed < run.stages.len() && run.stages[flushed].status.is_terminal() {
                let entry = AuditEntry::from_result(&run.stages[flushed]);
                run.audit.push(entry);
                events.push(NotificationEvent::stage_finished(run, &run.stages[flushed]));
                flushed += 1;
            }
        });

        self.flushed = flushed;
        for event in events {
            self.notifications.emit(event);
        }
    }

    fn update_stage<F>(&mut self, position: usize, f: F)
    where
        F: FnOnce(&mut StageResult) -> Result<(), StateError>,
    {
        let mut result = Ok(());
        self.state.send_modify(|run| result = f(&mut run.stages[position]));
        if let Err(e) = result {
            error!("Ignoring invalid stage update: {}", e);
        }
    }

    async fn persist(&self) {
        self.save(&self.snapshot()).await;
    }

    async fn save(&self, run: &PipelineRun) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.save(run).await {
            warn!("Failed to persist run {}: {:#}", run.id, e);
        }
    }
}
