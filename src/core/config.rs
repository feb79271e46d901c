//! Pipeline configuration from YAML

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Errors for invalid pipeline configuration. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read pipeline file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse pipeline YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("unknown LLM provider '{0}' (expected one of: openai, anthropic, google, ollama, azure_openai, custom)")]
    UnknownProvider(String),

    #[error("provider '{provider}' requires '{field}'")]
    MissingProviderField {
        provider: ProviderKind,
        field: &'static str,
    },

    #[error("no API key for provider '{provider}': set llm.api_key or {env}")]
    MissingApiKey {
        provider: ProviderKind,
        env: &'static str,
    },

    #[error("environment variable '{0}' referenced in configuration is not set")]
    MissingEnvVar(String),

    #[error("pipeline has no stages")]
    EmptyPipeline,

    #[error("duplicate stage ID: {0}")]
    DuplicateStage(String),

    #[error("stage '{stage}' depends on non-existent stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },

    #[error("cycle detected in dependency graph: {0}")]
    DependencyCycle(String),

    #[error("stage '{stage}' uses unregistered agent role '{role}'")]
    UnknownRole { stage: String, role: String },

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Supported LLM backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Google,
    Ollama,
    AzureOpenAi,
    Custom,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::Google,
        ProviderKind::Ollama,
        ProviderKind::AzureOpenAi,
        ProviderKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Google => "google",
            ProviderKind::Ollama => "ollama",
            ProviderKind::AzureOpenAi => "azure_openai",
            ProviderKind::Custom => "custom",
        }
    }

    /// Conventional environment variable holding the API key
    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::Google => "GOOGLE_API_KEY",
            ProviderKind::Ollama => "OLLAMA_API_KEY",
            ProviderKind::AzureOpenAi => "AZURE_OPENAI_API_KEY",
            ProviderKind::Custom => "CUSTOM_API_KEY",
        }
    }

    /// Self-hosted backends can run without credentials
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, ProviderKind::Ollama | ProviderKind::Custom)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "google" | "gemini" => Ok(ProviderKind::Google),
            "ollama" => Ok(ProviderKind::Ollama),
            "azure_openai" | "azure" => Ok(ProviderKind::AzureOpenAi),
            "custom" => Ok(ProviderKind::Custom),
            _ => Err(ConfigError::UnknownProvider(s.to_string())),
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name, resolved to a [`ProviderKind`] at validation time
    pub provider: String,

    /// API key or `${ENV_VAR}` reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model identifier
    pub model: String,

    /// Base URL for custom or self-hosted endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Azure OpenAI resource endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Azure OpenAI deployment name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,

    /// Azure OpenAI API version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ProviderConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            api_key: None,
            model: model.into(),
            base_url: None,
            endpoint: None,
            deployment_name: None,
            api_version: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Parse the provider name
    pub fn kind(&self) -> Result<ProviderKind, ConfigError> {
        self.provider.parse()
    }

    /// Check provider-specific required fields
    pub fn validate(&self) -> Result<ProviderKind, ConfigError> {
        let kind = self.kind()?;

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "llm.model".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let missing = |field: &'static str| ConfigError::MissingProviderField {
            provider: kind,
            field,
        };

        match kind {
            ProviderKind::AzureOpenAi => {
                if self.endpoint.is_none() {
                    return Err(missing("endpoint"));
                }
                if self.deployment_name.is_none() {
                    return Err(missing("deployment_name"));
                }
                if self.api_version.is_none() {
                    return Err(missing("api_version"));
                }
            }
            ProviderKind::Custom => {
                if self.base_url.is_none() {
                    return Err(missing("base_url"));
                }
            }
            _ => {}
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::InvalidValue {
                    field: "llm.temperature".to_string(),
                    reason: format!("{} is outside 0.0..=2.0", temperature),
                });
            }
        }

        Ok(kind)
    }

    /// Resolve the API key from configuration or environment
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigError> {
        let kind = self.kind()?;

        if let Some(raw) = &self.api_key {
            let key = expand_env(raw)?;
            if !key.is_empty() {
                return Ok(Some(key));
            }
        }

        match std::env::var(kind.api_key_env()) {
            Ok(key) if !key.is_empty() => Ok(Some(key)),
            _ if kind.requires_api_key() => Err(ConfigError::MissingApiKey {
                provider: kind,
                env: kind.api_key_env(),
            }),
            _ => Ok(None),
        }
    }
}

/// Replace `${VAR}` references with environment values
pub fn expand_env(value: &str) -> Result<String, ConfigError> {
    static ENV_REF: OnceLock<Regex> = OnceLock::new();
    let pattern = ENV_REF.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference pattern is valid")
    });

    let mut missing = None;
    let expanded = pattern.replace_all(value, |caps: &regex::Captures| {
        match std::env::var(&caps[1]) {
            Ok(v) => v,
            Err(_) => {
                missing.get_or_insert_with(|| caps[1].to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var) => Err(ConfigError::MissingEnvVar(var)),
        None => Ok(expanded.into_owned()),
    }
}

/// Retry policy with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = single attempt)
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_factor: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1000,
            backoff_factor: 2.0,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let delay = self.initial_backoff_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Local checkout scanned by the code analysis stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Deployment targets (e.g. "kubernetes", "aws-ecs")
    #[serde(default)]
    pub targets: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook URLs receiving run and stage events
    #[serde(default)]
    pub webhooks: Vec<String>,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage identifier
    pub id: String,

    /// Agent role; defaults to the stage ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Stage IDs that must succeed before this stage runs
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Whether this stage may run concurrently with other stages
    #[serde(default)]
    pub parallel: bool,

    /// A failed required stage fails the run
    #[serde(default = "default_true")]
    pub required: bool,

    /// Whether failed attempts may be retried
    #[serde(default = "default_true")]
    pub retryable: bool,

    /// Retry limit override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Timeout override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Extra instructions with `{{ variable }}` placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

fn default_true() -> bool {
    true
}

impl StageConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: None,
            depends_on: Vec::new(),
            parallel: false,
            required: true,
            retryable: true,
            max_retries: None,
            timeout_secs: None,
            prompt: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn after(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn role_name(&self) -> &str {
        self.role.as_deref().unwrap_or(&self.id)
    }
}

/// The eight-stage DevSecOps workflow
pub fn default_stages() -> Vec<StageConfig> {
    vec![
        StageConfig::new("code_analysis"),
        StageConfig::new("build").after(&["code_analysis"]),
        StageConfig::new("security_scan").after(&["build"]),
        StageConfig::new("deploy").after(&["security_scan"]),
        StageConfig::new("test").after(&["deploy"]).parallel(true),
        StageConfig::new("governance").after(&["test"]).parallel(true),
        StageConfig::new("observability")
            .after(&["deploy"])
            .parallel(true)
            .required(false),
        StageConfig::new("optimization")
            .after(&["observability"])
            .parallel(true)
            .required(false),
    ]
}

fn default_parallel_execution() -> bool {
    true
}

fn default_max_parallel_agents() -> usize {
    3
}

fn default_stage_timeout_secs() -> u64 {
    300
}

fn default_cancel_grace_secs() -> u64 {
    10
}

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub project: ProjectConfig,

    /// Variables available to stage prompt templates
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// LLM provider used by the built-in agents
    pub llm: ProviderConfig,

    /// Allow parallel-eligible stages to run concurrently
    #[serde(default = "default_parallel_execution")]
    pub parallel_execution: bool,

    /// Upper bound on concurrently running stages
    #[serde(default = "default_max_parallel_agents")]
    pub max_parallel_agents: usize,

    /// Default per-stage timeout in seconds
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Grace period granted to in-flight stages after cancellation
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Roll back through the deploy agent when a required deploy or test
    /// stage fails
    #[serde(default = "default_true")]
    pub auto_rollback: bool,

    #[serde(default)]
    pub deployment: DeploymentConfig,

    #[serde(default)]
    pub resources: ResourceLimits,

    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Pipeline stages in declared order
    #[serde(default = "default_stages")]
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    /// Create a configuration running the default DevSecOps stages
    pub fn new(name: impl Into<String>, llm: ProviderConfig) -> Self {
        Self {
            name: name.into(),
            version: None,
            project: ProjectConfig::default(),
            variables: BTreeMap::new(),
            llm,
            parallel_execution: default_parallel_execution(),
            max_parallel_agents: default_max_parallel_agents(),
            stage_timeout_secs: default_stage_timeout_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
            retry: RetryPolicy::default(),
            auto_rollback: true,
            deployment: DeploymentConfig::default(),
            resources: ResourceLimits::default(),
            notifications: NotificationConfig::default(),
            stages: default_stages(),
        }
    }

    pub fn with_stages(mut self, stages: Vec<StageConfig>) -> Self {
        self.stages = stages;
        self
    }

    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "name".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        self.llm.validate()?;

        if self.max_parallel_agents == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_parallel_agents".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.stage_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stage_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if !self.retry.backoff_factor.is_finite() || self.retry.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.backoff_factor".to_string(),
                reason: format!("{} must be a finite number >= 1.0", self.retry.backoff_factor),
            });
        }

        if self.stages.is_empty() {
            return Err(ConfigError::EmptyPipeline);
        }

        // Check that all stage IDs are unique
        let mut seen_ids = HashSet::new();
        for stage in &self.stages {
            if !seen_ids.insert(stage.id.as_str()) {
                return Err(ConfigError::DuplicateStage(stage.id.clone()));
            }
            if stage.timeout_secs == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: format!("stages.{}.timeout_secs", stage.id),
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        // Check that all dependencies reference existing stages
        for stage in &self.stages {
            for dep in &stage.depends_on {
                if !seen_ids.contains(dep.as_str()) {
                    return Err(ConfigError::UnknownDependency {
                        stage: stage.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        self.check_cycles()
    }

    /// Check for cycles in the stage dependency graph
    fn check_cycles(&self) -> Result<(), ConfigError> {
        let deps: HashMap<&str, &[String]> = self
            .stages
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.as_slice()))
            .collect();

        let mut visited = HashSet::new();
        let mut path = Vec::new();

        for stage in &self.stages {
            if !visited.contains(stage.id.as_str()) {
                Self::dfs_check(&stage.id, &deps, &mut visited, &mut path)?;
            }
        }

        Ok(())
    }

    fn dfs_check<'a>(
        stage_id: &'a str,
        deps: &HashMap<&'a str, &'a [String]>,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), ConfigError> {
        if let Some(pos) = path.iter().position(|s| *s == stage_id) {
            let mut cycle: Vec<&str> = path[pos..].to_vec();
            cycle.push(stage_id);
            return Err(ConfigError::DependencyCycle(cycle.join(" -> ")));
        }
        if visited.contains(stage_id) {
            return Ok(());
        }

        path.push(stage_id);
        for dep in deps.get(stage_id).copied().unwrap_or_default() {
            Self::dfs_check(dep, deps, visited, path)?;
        }
        path.pop();
        visited.insert(stage_id);

        Ok(())
    }

    /// Copy with secrets masked, used for run snapshots and persistence
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.llm.api_key.as_deref().is_some_and(|k| !k.starts_with("${")) {
            copy.llm.api_key = Some("***".to_string());
        }
        copy
    }

    pub fn stage(&self, id: &str) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}
