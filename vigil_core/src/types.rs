use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Closed classification of one audit execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Error,
    NotApplicable,
    Warning,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Error => "error",
            Outcome::NotApplicable => "not_applicable",
            Outcome::Warning => "warning",
        }
    }

    /// Whether a dependency finishing with this outcome lets its dependents run.
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::Warning)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_fail_behaviour() -> Outcome {
    Outcome::Failure
}

/// A policy that must pass before the declaring policy's check logic runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub policy: String,
    /// Outcome assigned to the dependent policy when this dependency does not pass.
    #[serde(default = "default_fail_behaviour")]
    pub on_fail: Outcome,
}

impl Dependency {
    pub fn new(policy: impl Into<String>, on_fail: Outcome) -> Self {
        Self {
            policy: policy.into(),
            on_fail,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct Policy {
    pub name: String,
    /// Identifier of the check logic registered with the engine.
    pub class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub depends: Vec<Dependency>,
}

impl Policy {
    pub fn new(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn depends_on(mut self, policy: impl Into<String>, on_fail: Outcome) -> Self {
        self.depends.push(Dependency::new(policy, on_fail));
        self
    }

    pub fn depends(&self) -> &[Dependency] {
        &self.depends
    }

    pub fn all_parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }
}

/// Policies known to an engine, in load order. Names are unique; inserting a
/// policy with an existing name replaces it in place.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolicyCatalog {
    policies: Vec<Policy>,
}

impl PolicyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, policy: Policy) {
        match self.policies.iter_mut().find(|p| p.name == policy.name) {
            Some(existing) => *existing = policy,
            None => self.policies.push(policy),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Policy> {
        self.policies.iter()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn as_slice(&self) -> &[Policy] {
        &self.policies
    }
}

impl From<Vec<Policy>> for PolicyCatalog {
    fn from(policies: Vec<Policy>) -> Self {
        let mut catalog = Self::new();
        for policy in policies {
            catalog.insert(policy);
        }
        catalog
    }
}

/// Result of one engine execution. Built once by the engine and handed to the caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuditResponse {
    id: Uuid,
    policy: String,
    outcome: Outcome,
    tokens: Value,
    remediated: bool,
    completed_at: DateTime<Utc>,
}

impl AuditResponse {
    pub(crate) fn new(policy: &str, outcome: Outcome, tokens: Value, remediated: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            policy: policy.to_string(),
            outcome,
            tokens,
            remediated,
            completed_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn policy(&self) -> &str {
        &self.policy
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn tokens(&self) -> &Value {
        &self.tokens
    }

    /// Looks up a dotted token path in the snapshot.
    pub fn token(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.tokens, |node, segment| node.get(segment))
    }

    pub fn remediated(&self) -> bool {
        self.remediated
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}
