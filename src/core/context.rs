//! Stage context - what an agent sees when it executes

use crate::agent::AgentError;
use crate::core::{config::PipelineConfig, stage::Stage, state::StageResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Execution context for one stage attempt
///
/// Contains the stage definition, the run's configuration snapshot,
/// results of earlier successful stages and the run's cancellation token.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub run_id: Uuid,

    /// The stage being executed
    pub stage: Stage,

    /// Configuration snapshot of the run
    pub config: Arc<PipelineConfig>,

    /// Successful stage results, in declared order
    pub prior: Vec<StageResult>,

    /// Global and user-defined variables
    pub variables: HashMap<String, String>,

    /// 1-based attempt number
    pub attempt: u32,

    /// Cancelled when the run is cancelled
    pub cancel: CancellationToken,
}

impl StageContext {
    pub fn new(run_id: Uuid, stage: Stage, config: Arc<PipelineConfig>) -> Self {
        let variables = config
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            run_id,
            stage,
            config,
            prior: Vec::new(),
            variables,
            attempt: 1,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_prior(mut self, prior: Vec<StageResult>) -> Self {
        self.prior = prior;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Output of an earlier successful stage
    pub fn prior_output(&self, stage_id: &str) -> Option<&serde_json::Value> {
        self.prior
            .iter()
            .find(|r| r.stage == stage_id)
            .and_then(|r| r.output.as_ref())
    }

    /// Get all variables available for prompt rendering
    pub fn rendering_variables(&self) -> HashMap<String, String> {
        let mut vars = self.variables.clone();

        // Add stage outputs as variables
        for result in &self.prior {
            if let Some(output) = &result.output {
                let text = match output {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                vars.insert(format!("stages.{}.output", result.stage), text);
            }
        }

        vars.insert("current_stage".to_string(), self.stage.id.clone());
        vars.insert("run_id".to_string(), self.run_id.to_string());
        vars.insert("attempt".to_string(), self.attempt.to_string());

        vars
    }

    /// The stage's prompt template rendered with [`Self::rendering_variables`]
    pub fn rendered_prompt(&self) -> Option<String> {
        self.stage.render_prompt(&self.rendering_variables())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Safe point for agents: bail out if the run was cancelled
    pub fn check_cancelled(&self) -> Result<(), AgentError> {
        if self.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }
}
