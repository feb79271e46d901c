//! Role name -> agent factory table

use super::{llm_agent::LlmAgent, roles::AgentRole, Agent};
use crate::provider::LlmProvider;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Builds an agent for a run from that run's provider
pub type AgentFactory = Arc<dyn Fn(Arc<dyn LlmProvider>) -> Arc<dyn Agent> + Send + Sync>;

/// Capability table resolved when a pipeline is submitted
#[derive(Clone, Default)]
pub struct AgentRegistry {
    factories: BTreeMap<String, AgentFactory>,
}

impl AgentRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with an [`LlmAgent`] for each built-in role
    pub fn with_builtin_roles() -> Self {
        let mut registry = Self::new();
        for role in AgentRole::ALL {
            registry.register(role.as_str(), move |provider| {
                Arc::new(LlmAgent::new(role, provider)) as Arc<dyn Agent>
            });
        }
        registry
    }

    /// Register (or replace) the factory for a role
    pub fn register<F>(&mut self, role: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(Arc<dyn LlmProvider>) -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        self.factories.insert(role.into(), Arc::new(factory));
        self
    }

    /// Register a ready-made agent shared by every run
    pub fn register_agent(&mut self, role: impl Into<String>, agent: Arc<dyn Agent>) -> &mut Self {
        self.register(role, move |_| agent.clone())
    }

    pub fn contains(&self, role: &str) -> bool {
        self.factories.contains_key(role)
    }

    /// Registered role names, sorted
    pub fn roles(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn resolve(&self, role: &str, provider: Arc<dyn LlmProvider>) -> Option<Arc<dyn Agent>> {
        self.factories.get(role).map(|factory| factory(provider))
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("roles", &self.roles())
            .finish()
    }
}
