//! Execution scheduler - determines which stages to dispatch next

use crate::core::{
    config::PipelineConfig,
    pipeline::Pipeline,
    state::{PipelineRun, StageStatus},
};
use std::collections::HashSet;

/// Strategy for scheduling stage execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Execute stages in dependency order, one at a time
    Sequential,

    /// Limited parallelism (max N concurrent stages)
    LimitedParallel(usize),
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        SchedulingStrategy::Sequential
    }
}

impl SchedulingStrategy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        if config.parallel_execution && config.max_parallel_agents > 1 {
            SchedulingStrategy::LimitedParallel(config.max_parallel_agents)
        } else {
            SchedulingStrategy::Sequential
        }
    }

    /// Maximum number of stages in flight at once
    pub fn capacity(&self) -> usize {
        match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::LimitedParallel(max) => (*max).max(1),
        }
    }
}

/// Scheduler for determining which stages to run
#[derive(Debug, Clone, Default)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Positions of the stages to dispatch now, in declared order.
    ///
    /// A stage is eligible when it is pending and all of its dependencies
    /// succeeded. Parallel stages fill the free slots; a non-parallel stage
    /// waits until nothing is in flight and then runs alone, holding back
    /// every stage declared after it.
    pub fn next_stages(&self, pipeline: &Pipeline, run: &PipelineRun) -> Vec<usize> {
        let in_flight: Vec<usize> = in_flight_positions(run);

        if in_flight
            .iter()
            .any(|&pos| !pipeline.stages()[pos].parallel)
        {
            return vec![];
        }

        let budget = self.strategy.capacity().saturating_sub(in_flight.len());
        if budget == 0 {
            return vec![];
        }

        let succeeded: HashSet<&str> = run
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Succeeded)
            .map(|s| s.stage.as_str())
            .collect();

        let mut batch = Vec::new();
        for (pos, stage) in pipeline.stages().iter().enumerate() {
            if run.stages[pos].status != StageStatus::Pending || !stage.dependencies_met(&succeeded) {
                continue;
            }

            if stage.parallel {
                batch.push(pos);
                if batch.len() == budget {
                    break;
                }
            } else {
                if in_flight.is_empty() && batch.is_empty() {
                    batch.push(pos);
                }
                break;
            }
        }

        batch
    }

    /// Check if there are more stages to run
    pub fn has_more(&self, pipeline: &Pipeline, run: &PipelineRun) -> bool {
        !self.next_stages(pipeline, run).is_empty()
    }
}

/// Positions of stages with an attempt in flight or awaiting a retry
pub fn in_flight_positions(run: &PipelineRun) -> Vec<usize> {
    run.stages
        .iter()
        .enumerate()
        .filter(|(_, s)| matches!(s.status, StageStatus::Running | StageStatus::Retried))
        .map(|(pos, _)| pos)
        .collect()
}
