//! Stage domain model

use crate::core::config::{PipelineConfig, StageConfig};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// A single stage in a pipeline, resolved against pipeline defaults
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Unique stage identifier
    pub id: String,

    /// Agent role executing this stage
    pub role: String,

    /// Stage IDs that must succeed first
    pub dependencies: Vec<String>,

    /// May share the parallelism budget with other stages
    pub parallel: bool,

    /// Failure fails the whole run
    pub required: bool,

    /// Failed attempts may be retried
    pub retryable: bool,

    /// Retries allowed after the first attempt
    pub max_retries: u32,

    /// Per-attempt time budget
    pub timeout: Duration,

    /// Optional prompt template with `{{ variable }}` placeholders
    pub prompt_template: Option<String>,
}

impl Stage {
    /// Create a stage from a stage config
    pub fn from_config(config: &StageConfig, defaults: &StageDefaults) -> Self {
        Stage {
            id: config.id.clone(),
            role: config.role_name().to_string(),
            dependencies: config.depends_on.clone(),
            parallel: config.parallel,
            required: config.required,
            retryable: config.retryable,
            max_retries: config.max_retries.unwrap_or(defaults.max_retries),
            timeout: config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            prompt_template: config.prompt.clone(),
        }
    }

    /// Check if every dependency is among the succeeded stages
    pub fn dependencies_met(&self, succeeded: &HashSet<&str>) -> bool {
        self.dependencies
            .iter()
            .all(|dep| succeeded.contains(dep.as_str()))
    }

    /// Total attempts this stage may make
    pub fn max_attempts(&self) -> u32 {
        if self.retryable {
            self.max_retries + 1
        } else {
            1
        }
    }

    /// Render the prompt template with variable substitution
    pub fn render_prompt(&self, variables: &HashMap<String, String>) -> Option<String> {
        let mut prompt = self.prompt_template.clone()?;

        // Replace variables in the form {{ variable_name }}
        for (key, value) in variables {
            let placeholder = format!("{{{{ {} }}}}", key);
            prompt = prompt.replace(&placeholder, value);
        }

        Some(prompt)
    }
}

#[derive(Debug, Clone)]
pub struct StageDefaults {
    pub max_retries: u32,
    pub timeout: Duration,
}

impl StageDefaults {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_retries: config.retry.max_retries,
            timeout: config.stage_timeout(),
        }
    }
}

impl Default for StageDefaults {
    fn default() -> Self {
        Self {
            max_retries: 2,
            timeout: Duration::from_secs(300),
        }
    }
}
