use crate::audit::{Audit, AuditContext, AuditError, ParameterSet};
use crate::config::EngineConfig;
use crate::remote::CommandRegistry;
use crate::sandbox::Sandbox;
use crate::target::Target;
use crate::tokens::{self, TokenStore};
use crate::types::{AuditResponse, Outcome, Policy, PolicyCatalog};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Check logic by class name.
#[derive(Default)]
pub struct AuditRegistry {
    audits: BTreeMap<String, Box<dyn Audit>>,
}

impl AuditRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class: impl Into<String>, audit: impl Audit + 'static) -> &mut Self {
        self.audits.insert(class.into(), Box::new(audit));
        self
    }

    pub fn get(&self, class: &str) -> Option<&dyn Audit> {
        self.audits.get(class).map(|audit| audit.as_ref())
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.audits.keys().map(String::as_str)
    }
}

/// Runs policies against one target.
///
/// [`execute`](Engine::execute) is the error boundary of the crate: whatever
/// happens inside dependency resolution, parameter binding, check logic or
/// remediation ends up as an [`Outcome`] plus `exception` tokens. Panics in
/// check logic included.
pub struct Engine {
    config: EngineConfig,
    sandbox: Arc<dyn Sandbox>,
    target: Arc<dyn Target>,
    audits: AuditRegistry,
    catalog: PolicyCatalog,
    commands: CommandRegistry,
}

impl Engine {
    pub fn new(config: EngineConfig, sandbox: Arc<dyn Sandbox>, target: Arc<dyn Target>) -> Self {
        Self {
            config,
            sandbox,
            target,
            audits: AuditRegistry::new(),
            catalog: PolicyCatalog::default(),
            commands: CommandRegistry::default(),
        }
    }

    pub fn with_audits(mut self, audits: AuditRegistry) -> Self {
        self.audits = audits;
        self
    }

    pub fn with_catalog(mut self, catalog: PolicyCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_commands(mut self, commands: CommandRegistry) -> Self {
        self.commands = commands;
        self
    }

    pub fn register(&mut self, class: impl Into<String>, audit: impl Audit + 'static) {
        self.audits.register(class, audit);
    }

    pub fn add_policy(&mut self, policy: Policy) {
        self.catalog.insert(policy);
    }

    pub fn catalog(&self) -> &PolicyCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluates one policy. Always returns a response.
    pub fn execute(&self, policy: &Policy, allow_remediation: bool) -> AuditResponse {
        let mut chain = Vec::new();
        self.run(policy, allow_remediation, &mut chain)
    }

    pub fn audit(&self, policies: &[Policy]) -> Vec<AuditResponse> {
        policies.iter().map(|p| self.execute(p, false)).collect()
    }

    pub fn remediate(&self, policies: &[Policy]) -> Vec<AuditResponse> {
        policies.iter().map(|p| self.execute(p, true)).collect()
    }

    fn run(&self, policy: &Policy, allow_remediation: bool, chain: &mut Vec<String>) -> AuditResponse {
        log::info!("[AUDIT] Executing policy {}", policy.name);

        let mut tokens = TokenStore::new();
        tokens.set("policy", policy.name.as_str());
        tokens.set(tokens::PARAMETERS, Value::Object(Map::new()));
        let mut remediated = false;

        chain.push(policy.name.clone());
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.check_dependencies(policy, chain, &mut tokens)
                .and_then(|()| self.invoke(policy, allow_remediation, &mut tokens, &mut remediated))
        }))
        .unwrap_or_else(|payload| Err(AuditError::Panicked(panic_message(payload.as_ref()))));
        chain.pop();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => self.classify(policy, &e, &mut tokens),
        };
        tokens.set("outcome", outcome.as_str());

        log::info!("[AUDIT] Policy {} finished: {}", policy.name, outcome);
        AuditResponse::new(&policy.name, outcome, tokens.export(), remediated)
    }

    /// Runs every dependency in order; the first one that does not pass decides.
    fn check_dependencies(
        &self,
        policy: &Policy,
        chain: &mut Vec<String>,
        tokens: &mut TokenStore,
    ) -> Result<(), AuditError> {
        let mut first_failure: Option<AuditError> = None;
        // Flat: dependency names may contain dots.
        let mut outcomes = Map::new();

        for dependency in policy.depends() {
            if chain.contains(&dependency.policy) {
                let cycle = format!("{} -> {}", chain.join(" -> "), dependency.policy);
                outcomes.insert(dependency.policy.clone(), Outcome::Error.as_str().into());
                keep_first(
                    &mut first_failure,
                    AuditError::DependencyCycle {
                        chain: cycle,
                        fail_behaviour: dependency.on_fail,
                    },
                );
                continue;
            }

            let Some(required) = self.catalog.get(&dependency.policy) else {
                outcomes.insert(dependency.policy.clone(), Outcome::Error.as_str().into());
                keep_first(
                    &mut first_failure,
                    AuditError::UnknownPolicy {
                        policy: dependency.policy.clone(),
                        fail_behaviour: dependency.on_fail,
                    },
                );
                continue;
            };

            let response = self.run(required, false, chain);
            outcomes.insert(dependency.policy.clone(), response.outcome().as_str().into());

            if !response.outcome().is_pass() {
                log::info!(
                    "[AUDIT] Policy {}: dependency {} finished with {}",
                    policy.name,
                    dependency.policy,
                    response.outcome()
                );
                keep_first(
                    &mut first_failure,
                    AuditError::DependencyFailed {
                        policy: policy.name.clone(),
                        dependency: dependency.policy.clone(),
                        outcome: response.outcome(),
                        fail_behaviour: dependency.on_fail,
                    },
                );
            }
        }

        if !outcomes.is_empty() {
            tokens.set(tokens::DEPENDENCIES, Value::Object(outcomes));
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn invoke(
        &self,
        policy: &Policy,
        allow_remediation: bool,
        tokens: &mut TokenStore,
        remediated: &mut bool,
    ) -> Result<Outcome, AuditError> {
        let audit = self
            .audits
            .get(&policy.class)
            .ok_or_else(|| AuditError::UnknownClass(policy.class.clone()))?;

        let mut parameters = ParameterSet::default();
        audit.configure(&mut parameters);
        let bound = parameters.bind(policy.all_parameters())?;
        for (name, value) in &bound {
            tokens.set_parameter(name, value.clone());
            if tokens::is_reserved(name) {
                log::warn!(
                    "[AUDIT] Policy {}: parameter `{}` shadows an engine token, kept under `{}` only",
                    policy.name,
                    name,
                    tokens::PARAMETERS
                );
                continue;
            }
            tokens.set(name, value.clone());
        }

        let mut ctx = AuditContext::new(
            policy,
            self.sandbox.as_ref(),
            self.target.as_ref(),
            &self.config,
            &self.commands,
            tokens,
        );
        let outcome = audit.audit(&mut ctx)?;

        if outcome != Outcome::Failure || !allow_remediation {
            return Ok(outcome);
        }
        let Some(remediation) = audit.remediation() else {
            return Ok(outcome);
        };

        log::info!("[AUDIT] Policy {} failed, remediating", policy.name);
        *remediated = true;
        remediation.remediate(&mut ctx)
    }

    fn classify(&self, policy: &Policy, error: &AuditError, tokens: &mut TokenStore) -> Outcome {
        let outcome = error.outcome();
        tokens.set("exception", error.to_string());
        tokens.set("exception_type", error.kind());

        match error {
            AuditError::DependencyFailed { .. } => {
                log::info!("[AUDIT] Policy {} is {}: {}", policy.name, outcome, error);
            }
            e if e.is_warning() => {
                log::warn!("[AUDIT] Policy {} is {}: {}", policy.name, outcome, error);
            }
            _ => {
                log::error!("[AUDIT] Policy {} errored: {}", policy.name, error);
                if self.config.verbose {
                    tokens.set("exception_trace", Value::Array(error_chain(error)));
                }
            }
        }

        outcome
    }
}

fn keep_first(slot: &mut Option<AuditError>, error: AuditError) {
    if slot.is_none() {
        *slot = Some(error);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn error_chain(error: &dyn std::error::Error) -> Vec<Value> {
    let mut chain = Vec::new();
    let mut current = Some(error);
    while let Some(e) = current {
        chain.push(Value::String(e.to_string()));
        current = e.source();
    }
    chain
}
