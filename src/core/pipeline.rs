//! Pipeline domain model

use crate::core::{
    config::{ConfigError, PipelineConfig},
    stage::{Stage, StageDefaults},
};
use std::collections::{HashMap, HashSet};

/// A validated stage dependency graph
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Stages in declared order
    stages: Vec<Stage>,

    /// Stage ID -> position in `stages`
    index: HashMap<String, usize>,

    /// Direct dependents of each stage, by position
    dependents: Vec<Vec<usize>>,

    /// Stage execution order (topological sort)
    execution_order: Vec<String>,
}

impl Pipeline {
    /// Create a pipeline from validated configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let defaults = StageDefaults::from_config(config);
        let stages: Vec<Stage> = config
            .stages
            .iter()
            .map(|s| Stage::from_config(s, &defaults))
            .collect();

        let index: HashMap<String, usize> = stages
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();

        let mut dependents = vec![Vec::new(); stages.len()];
        for (i, stage) in stages.iter().enumerate() {
            for dep in &stage.dependencies {
                if let Some(&d) = index.get(dep) {
                    dependents[d].push(i);
                }
            }
        }

        let execution_order = Self::topological_sort(&stages, &index);

        Ok(Pipeline {
            name: config.name.clone(),
            stages,
            index,
            dependents,
            execution_order,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Get a stage by ID
    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Every stage that depends on `position`, directly or transitively,
    /// in declared order
    pub fn transitive_dependents(&self, position: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        let mut stack = vec![position];

        while let Some(current) = stack.pop() {
            for &next in &self.dependents[current] {
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }

        let mut result: Vec<usize> = seen.into_iter().collect();
        result.sort_unstable();
        result
    }

    /// Get execution order (topological sort, ties broken by declared order)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    fn topological_sort(stages: &[Stage], index: &HashMap<String, usize>) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        for i in 0..stages.len() {
            Self::visit(i, stages, index, &mut visited, &mut result);
        }

        result
    }

    fn visit(
        position: usize,
        stages: &[Stage],
        index: &HashMap<String, usize>,
        visited: &mut HashSet<usize>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(position) {
            return;
        }

        for dep in &stages[position].dependencies {
            if let Some(&d) = index.get(dep) {
                Self::visit(d, stages, index, visited, result);
            }
        }

        result.push(stages[position].id.clone());
    }
}
