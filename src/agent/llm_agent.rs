//! LLM-backed agent used for every built-in role

use super::{repository::RepositorySnapshot, roles::AgentRole, Agent, AgentError};
use crate::core::context::StageContext;
use crate::provider::{CompletionOptions, LlmProvider};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Longest prior-stage summary quoted in a prompt
const MAX_PRIOR_CHARS: usize = 1500;

pub struct LlmAgent {
    role: AgentRole,
    provider: Arc<dyn LlmProvider>,
}

impl LlmAgent {
    pub fn new(role: AgentRole, provider: Arc<dyn LlmProvider>) -> Self {
        Self { role, provider }
    }

    /// Assemble the user prompt for one attempt
    pub fn build_prompt(&self, ctx: &StageContext, snapshot: Option<&RepositorySnapshot>) -> String {
        let config = &ctx.config;
        let mut prompt = String::new();

        let _ = writeln!(prompt, "Pipeline: {}", config.name);
        let _ = writeln!(prompt, "Stage: {} (role: {})", ctx.stage.id, self.role);
        if let Some(name) = &config.project.name {
            let _ = writeln!(prompt, "Project: {}", name);
        }
        if let Some(url) = &config.project.repository_url {
            let _ = writeln!(prompt, "Repository: {}", url);
        }
        if !config.deployment.targets.is_empty() {
            let _ = writeln!(prompt, "Deployment targets: {}", config.deployment.targets.join(", "));
        }
        if let Some(env) = &config.deployment.environment {
            let _ = writeln!(prompt, "Environment: {}", env);
        }
        if let Some(cpu) = config.resources.cpu_cores {
            let _ = writeln!(prompt, "CPU cores: {}", cpu);
        }
        if let Some(memory) = config.resources.memory_mb {
            let _ = writeln!(prompt, "Memory: {} MB", memory);
        }

        if let Some(snapshot) = snapshot {
            let _ = write!(prompt, "\n## Repository inventory\n{}\n", snapshot.summary());
        }

        if let Some(extra) = ctx.rendered_prompt() {
            let _ = write!(prompt, "\n## Instructions\n{}\n", extra.trim());
        }

        if !ctx.prior.is_empty() {
            prompt.push_str("\n## Results of earlier stages\n");
            for result in &ctx.prior {
                let summary = result
                    .output
                    .as_ref()
                    .map(summary_text)
                    .unwrap_or_default();
                let _ = writeln!(prompt, "### {}\n{}", result.stage, truncate(&summary, MAX_PRIOR_CHARS));
            }
        }

        if ctx.attempt > 1 {
            let _ = write!(prompt, "\n(attempt {} of this stage)\n", ctx.attempt);
        }

        prompt
    }

    async fn inventory(&self, ctx: &StageContext) -> Result<Option<RepositorySnapshot>, AgentError> {
        if self.role != AgentRole::CodeAnalysis {
            return Ok(None);
        }
        let Some(path) = ctx.config.project.path.clone() else {
            return Ok(None);
        };

        let snapshot = tokio::task::spawn_blocking(move || RepositorySnapshot::scan(&path))
            .await
            .map_err(|e| AgentError::Execution(format!("repository scan aborted: {}", e)))?
            .map_err(|e| match e.kind() {
                // A wrong project path will not fix itself on retry
                std::io::ErrorKind::NotFound => AgentError::Rejected(e.to_string()),
                _ => AgentError::Execution(format!("repository scan failed: {}", e)),
            })?;

        Ok(Some(snapshot))
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn role(&self) -> &str {
        self.role.as_str()
    }

    async fn execute(&self, ctx: &StageContext) -> Result<serde_json::Value, AgentError> {
        ctx.check_cancelled()?;

        let snapshot = self.inventory(ctx).await?;
        ctx.check_cancelled()?;

        let prompt = self.build_prompt(ctx, snapshot.as_ref());
        debug!("Stage '{}' prompt:\n{}", ctx.stage.id, prompt);

        let options = CompletionOptions::default().with_system(self.role.instructions());
        let text = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
            res = self.provider.complete(&prompt, &options) => res?,
        };

        if self.role == AgentRole::Governance {
            if let Some(reason) = rejection_reason(&text) {
                return Err(AgentError::Rejected(reason));
            }
        }

        let mut output = json!({
            "role": self.role.as_str(),
            "provider": self.provider.name(),
            "model": self.provider.model(),
            "summary": text,
        });
        if let Some(snapshot) = snapshot {
            output["repository"] = serde_json::to_value(&snapshot)
                .map_err(|e| AgentError::Execution(e.to_string()))?;
        }

        Ok(output)
    }
}

/// Reason given on a `DECISION: REJECT` line, if the answer has one
pub fn rejection_reason(text: &str) -> Option<String> {
    static DECISION: OnceLock<Regex> = OnceLock::new();
    let pattern = DECISION.get_or_init(|| {
        Regex::new(r"(?im)^\W*DECISION:\s*REJECT(?:ED)?\b[\s:\-]*(.*)$").expect("decision pattern is valid")
    });

    pattern.captures(text).map(|caps| {
        let reason = caps
            .get(1)
            .map(|m| m.as_str().trim_matches(|c: char| c.is_whitespace() || matches!(c, '*' | '`' | '.')))
            .unwrap_or_default();
        if reason.is_empty() {
            "governance review rejected the release".to_string()
        } else {
            reason.to_string()
        }
    })
}

fn summary_text(output: &serde_json::Value) -> String {
    match output.get("summary") {
        Some(serde_json::Value::String(s)) => s.clone(),
        _ => match output {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}
