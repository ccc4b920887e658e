//! Vigil CLI - wiring between command-line arguments and the audit engine

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use vigil_core::checks::builtin_registry;
use vigil_core::policy_parser;
use vigil_core::{AuditResponse, Engine, EngineConfig, LocalSandbox, Outcome, Policy, StaticTarget};

/// Inputs shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub policies: PathBuf,
    pub target: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub gateway: Option<String>,
    pub verbose: bool,
}

impl Settings {
    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        if let Some(gateway) = &self.gateway {
            config = config.with_gateway(gateway.clone());
        }
        if self.verbose {
            config = config.verbose(true);
        }
        Ok(config)
    }

    pub fn target(&self) -> Result<StaticTarget> {
        match &self.target {
            Some(path) => policy_parser::load_target(path)
                .with_context(|| format!("loading target {}", path.display())),
            None => Ok(StaticTarget::new("local")),
        }
    }
}

/// Engine running against the local shell with the built-in checks.
pub fn build_engine(settings: &Settings) -> Result<Engine> {
    let catalog = policy_parser::load_policies(&settings.policies)
        .with_context(|| format!("loading policies {}", settings.policies.display()))?;
    let config = settings.engine_config()?;
    let target = settings.target()?;

    log::info!(
        "[AUDIT] {} policies against target {}",
        catalog.len(),
        target.name
    );

    Ok(Engine::new(config, Arc::new(LocalSandbox::new()), Arc::new(target))
        .with_audits(builtin_registry())
        .with_catalog(catalog))
}

/// Policies whose name contains `filter`, in catalog order.
pub fn select(engine: &Engine, filter: Option<&str>) -> Vec<Policy> {
    engine
        .catalog()
        .iter()
        .filter(|p| filter.map_or(true, |f| p.name.contains(f)))
        .cloned()
        .collect()
}

pub fn find(engine: &Engine, name: &str) -> Result<Policy> {
    engine
        .catalog()
        .get(name)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Policy {} not found", name))
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    pub error: usize,
    pub not_applicable: usize,
    pub warning: usize,
}

impl Summary {
    pub fn from_responses(responses: &[AuditResponse]) -> Self {
        let mut summary = Summary {
            total: responses.len(),
            ..Default::default()
        };
        for response in responses {
            match response.outcome() {
                Outcome::Success => summary.success += 1,
                Outcome::Failure => summary.failure += 1,
                Outcome::Error => summary.error += 1,
                Outcome::NotApplicable => summary.not_applicable += 1,
                Outcome::Warning => summary.warning += 1,
            }
        }
        summary
    }

    /// Whether any policy ended in failure or error.
    pub fn has_problems(&self) -> bool {
        self.failure + self.error > 0
    }
}

#[derive(Debug, Serialize)]
pub struct Report<'a> {
    pub summary: Summary,
    pub responses: &'a [AuditResponse],
}

pub fn render_json(responses: &[AuditResponse]) -> Result<String> {
    let report = Report {
        summary: Summary::from_responses(responses),
        responses,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

/// Human-readable block for one response.
pub fn format_response(response: &AuditResponse) -> String {
    let mut out = format!("  Policy: {}\n  Outcome: {}", response.policy(), response.outcome());
    if response.remediated() {
        out.push_str(" (remediated)");
    }
    for key in ["message", "exception"] {
        if let Some(value) = response.token(key).and_then(|v| v.as_str()) {
            out.push_str(&format!("\n  {}: {}", key, value));
        }
    }
    out
}

pub fn format_summary(summary: &Summary) -> String {
    format!(
        "{} policies: {} success, {} failure, {} error, {} not applicable, {} warning",
        summary.total,
        summary.success,
        summary.failure,
        summary.error,
        summary.not_applicable,
        summary.warning
    )
}
