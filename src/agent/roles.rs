//! Built-in DevSecOps agent roles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    CodeAnalysis,
    Build,
    SecurityScan,
    Deploy,
    Test,
    Governance,
    Observability,
    Optimization,
}

impl AgentRole {
    pub const ALL: [AgentRole; 8] = [
        AgentRole::CodeAnalysis,
        AgentRole::Build,
        AgentRole::SecurityScan,
        AgentRole::Deploy,
        AgentRole::Test,
        AgentRole::Governance,
        AgentRole::Observability,
        AgentRole::Optimization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::CodeAnalysis => "code_analysis",
            AgentRole::Build => "build",
            AgentRole::SecurityScan => "security_scan",
            AgentRole::Deploy => "deploy",
            AgentRole::Test => "test",
            AgentRole::Governance => "governance",
            AgentRole::Observability => "observability",
            AgentRole::Optimization => "optimization",
        }
    }

    /// One-line description shown by `vedops roles`
    pub fn description(&self) -> &'static str {
        match self {
            AgentRole::CodeAnalysis => "Inventory the repository and detect languages, frameworks and build tooling",
            AgentRole::Build => "Plan container images and build steps for the detected stack",
            AgentRole::SecurityScan => "Review dependencies, secrets and configuration for vulnerabilities",
            AgentRole::Deploy => "Produce a deployment plan for the configured targets",
            AgentRole::Test => "Design smoke, integration and load tests for the deployment",
            AgentRole::Governance => "Evaluate quality gates and approve or reject the release",
            AgentRole::Observability => "Propose metrics, logs, traces and alerting",
            AgentRole::Optimization => "Recommend cost and performance improvements",
        }
    }

    /// System instructions sent with every prompt of this role
    pub fn instructions(&self) -> &'static str {
        match self {
            AgentRole::CodeAnalysis => {
                "You are a senior code analyst. Summarize the project's technology stack, \
                 architecture and code quality risks. Be concise and concrete."
            }
            AgentRole::Build => {
                "You are a build engineer. Describe how to build and containerize this project, \
                 including a minimal Dockerfile outline and build commands."
            }
            AgentRole::SecurityScan => {
                "You are an application security engineer. List likely vulnerabilities, risky \
                 dependencies and leaked secrets, each with a severity and remediation."
            }
            AgentRole::Deploy => {
                "You are a deployment engineer. Describe the rollout plan, health checks and \
                 rollback strategy for the configured targets."
            }
            AgentRole::Test => {
                "You are a QA engineer. Propose smoke, integration and load tests that verify \
                 the deployment and state the pass criteria."
            }
            AgentRole::Governance => {
                "You are the release governance board. Weigh the results of every previous \
                 stage against quality gates. End your answer with a single line \
                 `DECISION: APPROVE` or `DECISION: REJECT <reason>`."
            }
            AgentRole::Observability => {
                "You are an SRE. Recommend metrics, structured logs, traces, dashboards and \
                 alert thresholds for this service."
            }
            AgentRole::Optimization => {
                "You are a performance and cost engineer. Recommend resource sizing, caching \
                 and cost reductions with their expected impact."
            }
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentRole::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown agent role '{}'", s))
    }
}
