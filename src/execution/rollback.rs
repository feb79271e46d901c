//! Automatic rollback after a failed deploy or test stage

use crate::{
    agent::AgentRole,
    core::{
        config::{PipelineConfig, StageConfig},
        pipeline::Pipeline,
        stage::{Stage, StageDefaults},
        state::{PipelineRun, StageResult, StageStatus},
    },
};

/// Audit trail name of the rollback step
pub const ROLLBACK_STAGE: &str = "rollback";

/// Role whose agent performs the rollback
pub const ROLLBACK_ROLE: AgentRole = AgentRole::Deploy;

fn triggers_rollback(role: &str) -> bool {
    role == AgentRole::Deploy.as_str() || role == AgentRole::Test.as_str()
}

/// Whether any stage of `pipeline` could ever trigger a rollback
pub fn may_roll_back(pipeline: &Pipeline) -> bool {
    pipeline.stages().iter().any(|s| s.required && triggers_rollback(&s.role))
}

/// First required deploy or test stage that failed, in declared order
pub fn rollback_trigger<'a>(pipeline: &Pipeline, run: &'a PipelineRun) -> Option<&'a StageResult> {
    run.stages
        .iter()
        .zip(pipeline.stages())
        .find(|(result, stage)| {
            stage.required && triggers_rollback(&stage.role) && result.status == StageStatus::Failed
        })
        .map(|(result, _)| result)
}

/// One-shot stage that asks the deploy agent to undo the release
pub fn rollback_stage(config: &PipelineConfig, failed: &StageResult) -> Stage {
    let prompt = format!(
        "Roll back the most recent deployment. Stage '{}' failed: {}\n\
         Restore the previous release, list the steps taken and confirm the \
         service is healthy.",
        failed.stage,
        failed.error.as_deref().unwrap_or("no error recorded")
    );

    let stage = StageConfig::new(ROLLBACK_STAGE)
        .with_role(ROLLBACK_ROLE.as_str())
        .retryable(false)
        .with_prompt(prompt);
    Stage::from_config(&stage, &StageDefaults::from_config(config))
}
