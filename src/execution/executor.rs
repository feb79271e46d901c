//! Stage executor - runs one stage's attempts with timeout, retry and cancellation

use crate::{
    agent::{Agent, AgentError},
    core::{config::RetryPolicy, context::StageContext, stage::Stage, state::FailureKind},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

/// Progress reported by a stage task to the run driver
#[derive(Debug, Clone)]
pub enum StageEvent {
    /// A retry attempt started (the first attempt is marked at dispatch)
    AttemptStarted { position: usize, attempt: u32 },

    /// An attempt failed and will be retried after `retry_in`
    AttemptFailed {
        position: usize,
        attempt: u32,
        kind: FailureKind,
        error: String,
        retry_in: Duration,
    },

    /// The stage reached its final outcome
    Finished { position: usize, outcome: StageOutcome },
}

/// Final outcome of a stage task
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Succeeded(Value),
    Failed { kind: FailureKind, error: String },
    Cancelled { error: String },
}

enum Interrupt {
    Cancelled,
    TimedOut,
}

/// Executes a single stage
pub struct StageExecutor {
    agent: Arc<dyn Agent>,
    stage: Stage,
    retry: RetryPolicy,
    grace: Duration,
}

impl StageExecutor {
    pub fn new(agent: Arc<dyn Agent>, stage: Stage, retry: RetryPolicy, grace: Duration) -> Self {
        Self {
            agent,
            stage,
            retry,
            grace,
        }
    }

    /// Run attempts until one succeeds, the error is final or the run is cancelled
    pub async fn run(
        &self,
        position: usize,
        base: StageContext,
        events: &UnboundedSender<StageEvent>,
    ) -> StageOutcome {
        let max_attempts = self.stage.max_attempts();
        let mut attempt = 1;

        loop {
            if attempt > 1 {
                let _ = events.send(StageEvent::AttemptStarted { position, attempt });
            }

            info!(
                "Executing stage: {} (attempt {}/{})",
                self.stage.id, attempt, max_attempts
            );
            let ctx = base.clone().with_attempt(attempt);

            let err = match self.attempt(&ctx).await {
                Ok(output) => {
                    info!("Stage {} completed successfully", self.stage.id);
                    return StageOutcome::Succeeded(output);
                }
                Err(err) => err,
            };

            if matches!(err, AgentError::Cancelled) || ctx.is_cancelled() {
                info!("Stage {} cancelled", self.stage.id);
                return StageOutcome::Cancelled {
                    error: AgentError::Cancelled.to_string(),
                };
            }

            if !err.is_retryable() || attempt >= max_attempts {
                error!("Stage {} failed: {}", self.stage.id, err);
                return StageOutcome::Failed {
                    kind: err.kind(),
                    error: err.to_string(),
                };
            }

            let delay = self.retry.delay_for(attempt);
            warn!(
                "Stage {} attempt {} failed: {}; retrying in {:?}",
                self.stage.id, attempt, err, delay
            );
            let _ = events.send(StageEvent::AttemptFailed {
                position,
                attempt,
                kind: err.kind(),
                error: err.to_string(),
                retry_in: delay,
            });

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    info!("Stage {} cancelled during backoff", self.stage.id);
                    return StageOutcome::Cancelled {
                        error: AgentError::Cancelled.to_string(),
                    };
                }
                _ = sleep(delay) => {}
            }

            attempt += 1;
        }
    }

    /// One attempt under the stage timeout, racing cancellation
    async fn attempt(&self, ctx: &StageContext) -> Result<Value, AgentError> {
        let fut = self.agent.execute(ctx);
        tokio::pin!(fut);

        let interrupt = tokio::select! {
            biased;
            res = &mut fut => return res,
            _ = ctx.cancel.cancelled() => Interrupt::Cancelled,
            _ = sleep(self.stage.timeout) => Interrupt::TimedOut,
        };

        match interrupt {
            Interrupt::TimedOut => {
                error!(
                    "Timeout for stage {} after {}s",
                    self.stage.id,
                    self.stage.timeout.as_secs()
                );
                Err(AgentError::Timeout(self.stage.timeout.as_secs()))
            }
            Interrupt::Cancelled => {
                // Give the agent its grace period to wind down; whatever it
                // returns, the attempt counts as cancelled.
                match timeout(self.grace, &mut fut).await {
                    Ok(res) => debug!(
                        "Stage {} returned {} after cancellation",
                        self.stage.id,
                        if res.is_ok() { "a result" } else { "an error" }
                    ),
                    Err(_) => warn!(
                        "Stage {} ignored cancellation for {:?}; abandoning its work",
                        self.stage.id, self.grace
                    ),
                }
                Err(AgentError::Cancelled)
            }
        }
    }
}
