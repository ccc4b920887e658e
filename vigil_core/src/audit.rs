//! Check-logic side of the engine.
//!
//! An [`Audit`] implements one kind of check. It declares its inputs through
//! [`ParameterSet::add_parameter`], runs against an [`AuditContext`], and may
//! offer a [`Remediable`] capability the engine uses when a check fails.

use crate::config::EngineConfig;
use crate::expression::{self, ExpressionError};
use crate::remote::{CommandRegistry, RemoteCommand, RemoteError, RemoteEvaluator, RemoteTask};
use crate::sandbox::{Sandbox, SandboxError};
use crate::target::Target;
use crate::tokens::{self, TokenStore};
use crate::types::{Outcome, Policy};
use serde_json::{Map, Value};

#[derive(thiserror::Error, Debug)]
pub enum AuditError {
    #[error("policy `{policy}` depends on `{dependency}`, which finished with {outcome}")]
    DependencyFailed {
        policy: String,
        dependency: String,
        outcome: Outcome,
        fail_behaviour: Outcome,
    },

    #[error("{0}")]
    InvalidInput(String),

    #[error("target does not expose required fact `{0}`")]
    MissingFact(String),

    #[error("parameter `{name}` is malformed: {hint}")]
    ParameterType { name: String, hint: String },

    #[error("policy `{policy}` is not in the catalog")]
    UnknownPolicy { policy: String, fail_behaviour: Outcome },

    #[error("no check registered for class `{0}`")]
    UnknownClass(String),

    #[error("dependency cycle: {chain}")]
    DependencyCycle { chain: String, fail_behaviour: Outcome },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("expression failed: {0}")]
    Expression(#[from] ExpressionError),

    #[error("{0}")]
    Failed(String),

    #[error("check logic panicked: {0}")]
    Panicked(String),
}

impl AuditError {
    /// Name recorded in the `exception_type` token.
    pub fn kind(&self) -> &'static str {
        match self {
            AuditError::DependencyFailed { .. } => "DependencyFailure",
            AuditError::InvalidInput(_) => "InvalidInput",
            AuditError::MissingFact(_) => "MissingFact",
            AuditError::ParameterType { .. } => "ParameterType",
            AuditError::UnknownPolicy { .. } => "UnknownPolicy",
            AuditError::UnknownClass(_) => "UnknownClass",
            AuditError::DependencyCycle { .. } => "DependencyCycle",
            AuditError::Remote(RemoteError::Decode { .. }) => "RemoteDecode",
            AuditError::Remote(RemoteError::Sandbox(_)) | AuditError::Sandbox(_) => "Sandbox",
            AuditError::Remote(_) => "Remote",
            AuditError::Expression(_) => "Expression",
            AuditError::Failed(_) => "Audit",
            AuditError::Panicked(_) => "Panic",
        }
    }

    /// Outcome an execution ends with when this error escapes the check.
    pub fn outcome(&self) -> Outcome {
        match self {
            AuditError::DependencyFailed { fail_behaviour, .. }
            | AuditError::UnknownPolicy { fail_behaviour, .. }
            | AuditError::DependencyCycle { fail_behaviour, .. } => *fail_behaviour,
            AuditError::InvalidInput(_) | AuditError::MissingFact(_) => Outcome::NotApplicable,
            _ => Outcome::Error,
        }
    }

    /// Input problems are reported at warning level rather than as errors.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            AuditError::InvalidInput(_)
                | AuditError::MissingFact(_)
                | AuditError::ParameterType { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterMode {
    Required,
    Optional,
}

/// Expected JSON shape of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Any,
    String,
    Integer,
    Number,
    Boolean,
    List,
    Map,
}

impl ParameterKind {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParameterKind::Any => true,
            ParameterKind::String => value.is_string(),
            ParameterKind::Integer => value.is_i64() || value.is_u64(),
            ParameterKind::Number => value.is_number(),
            ParameterKind::Boolean => value.is_boolean(),
            ParameterKind::List => value.is_array(),
            ParameterKind::Map => value.is_object(),
        }
    }

    fn describe(&self) -> (&'static str, &'static str) {
        match self {
            ParameterKind::Any => ("any value", "value"),
            ParameterKind::String => ("a string", "'text'"),
            ParameterKind::Integer => ("an integer", "10"),
            ParameterKind::Number => ("a number", "0.5"),
            ParameterKind::Boolean => ("a boolean", "true"),
            ParameterKind::List => ("a list", "[a, b]"),
            ParameterKind::Map => ("a mapping", "{key: value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    pub mode: ParameterMode,
    pub description: String,
    pub default: Option<Value>,
    pub kind: ParameterKind,
}

impl ParameterDefinition {
    pub fn kind(&mut self, kind: ParameterKind) -> &mut Self {
        self.kind = kind;
        self
    }

    /// Explains what the parameter should look like, given the value it received.
    pub fn hint(&self, supplied: &Value) -> String {
        let (expected, example) = self.kind.describe();
        let got = match supplied {
            Value::Null => "null",
            Value::Bool(_) => "a boolean",
            Value::Number(n) if n.is_f64() => "a number",
            Value::Number(_) => "an integer",
            Value::String(_) => "a string",
            Value::Array(_) => "a list",
            Value::Object(_) => "a mapping",
        };
        format!(
            "expected {} (e.g. `{}: {}`), got {}",
            expected, self.name, example, got
        )
    }
}

/// Inputs an [`Audit`] accepts, in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    definitions: Vec<ParameterDefinition>,
}

impl ParameterSet {
    pub fn add_parameter(
        &mut self,
        name: &str,
        mode: ParameterMode,
        description: &str,
        default: Option<Value>,
    ) -> &mut ParameterDefinition {
        self.definitions.retain(|d| d.name != name);
        self.definitions.push(ParameterDefinition {
            name: name.to_string(),
            mode,
            description: description.to_string(),
            default,
            kind: ParameterKind::Any,
        });
        let last = self.definitions.len() - 1;
        &mut self.definitions[last]
    }

    pub fn definitions(&self) -> &[ParameterDefinition] {
        &self.definitions
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    /// Merges policy-supplied values over declared defaults and validates them.
    ///
    /// Supplied values for undeclared names pass through unchecked after the
    /// declared ones. A `null` value counts as not supplied.
    pub fn bind(&self, supplied: &Map<String, Value>) -> Result<Map<String, Value>, AuditError> {
        let mut bound = Map::new();

        for definition in &self.definitions {
            let value = supplied
                .get(&definition.name)
                .filter(|v| !v.is_null())
                .or(definition.default.as_ref().filter(|v| !v.is_null()));

            match (value, definition.mode) {
                (Some(value), _) => {
                    if !definition.kind.accepts(value) {
                        return Err(AuditError::ParameterType {
                            name: definition.name.clone(),
                            hint: definition.hint(value),
                        });
                    }
                    bound.insert(definition.name.clone(), value.clone());
                }
                (None, ParameterMode::Required) => {
                    return Err(AuditError::InvalidInput(format!(
                        "required parameter `{}` was not supplied ({})",
                        definition.name, definition.description
                    )));
                }
                (None, ParameterMode::Optional) => {
                    bound.insert(definition.name.clone(), Value::Null);
                }
            }
        }

        for (name, value) in supplied {
            if !bound.contains_key(name) {
                bound.insert(name.clone(), value.clone());
            }
        }

        Ok(bound)
    }
}

/// One kind of check.
pub trait Audit: Send + Sync {
    /// Declares accepted parameters. Called before every execution.
    fn configure(&self, _parameters: &mut ParameterSet) {}

    fn audit(&self, ctx: &mut AuditContext<'_>) -> Result<Outcome, AuditError>;

    /// Remediation capability, when the check can fix what it finds.
    fn remediation(&self) -> Option<&dyn Remediable> {
        None
    }
}

pub trait Remediable {
    fn remediate(&self, ctx: &mut AuditContext<'_>) -> Result<Outcome, AuditError>;
}

/// Everything check logic may touch during one execution.
pub struct AuditContext<'a> {
    policy: &'a Policy,
    sandbox: &'a dyn Sandbox,
    target: &'a dyn Target,
    config: &'a EngineConfig,
    commands: &'a CommandRegistry,
    tokens: &'a mut TokenStore,
}

impl<'a> AuditContext<'a> {
    pub fn new(
        policy: &'a Policy,
        sandbox: &'a dyn Sandbox,
        target: &'a dyn Target,
        config: &'a EngineConfig,
        commands: &'a CommandRegistry,
        tokens: &'a mut TokenStore,
    ) -> Self {
        Self {
            policy,
            sandbox,
            target,
            config,
            commands,
            tokens,
        }
    }

    pub fn policy(&self) -> &'a Policy {
        self.policy
    }

    pub fn sandbox(&self) -> &'a dyn Sandbox {
        self.sandbox
    }

    pub fn target(&self) -> &'a dyn Target {
        self.target
    }

    pub fn config(&self) -> &'a EngineConfig {
        self.config
    }

    pub fn tokens(&self) -> &TokenStore {
        &*self.tokens
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.tokens.get(key)
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.tokens.set(key, value);
    }

    pub fn get_parameter(&self, name: &str) -> Option<&Value> {
        self.tokens.get_parameter(name)
    }

    pub fn set_parameter(&mut self, name: &str, value: impl Into<Value>) {
        self.tokens.set_parameter(name, value);
    }

    /// String parameter, failing validation when absent or not a string.
    pub fn parameter_str(&self, name: &str) -> Result<String, AuditError> {
        match self.get_parameter(name) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Null) | None => Err(AuditError::InvalidInput(format!(
                "parameter `{}` is required",
                name
            ))),
            Some(other) => Err(AuditError::ParameterType {
                name: name.to_string(),
                hint: format!("expected a string, got `{}`", other),
            }),
        }
    }

    /// A target fact the check cannot run without.
    pub fn target_property(&self, name: &str) -> Result<Value, AuditError> {
        self.target
            .property(name)
            .ok_or_else(|| AuditError::MissingFact(name.to_string()))
    }

    /// Context for expressions: tokens, then target facts, then `target` itself.
    pub fn expression_context(&self) -> Map<String, Value> {
        let mut context = self.tokens.as_map().clone();
        let properties = self.target.properties();
        for (name, value) in &properties {
            context.insert(name.clone(), value.clone());
        }
        context.insert("target".to_string(), Value::Object(properties));
        context
    }

    pub fn evaluate(&self, expression: &str) -> Result<Value, AuditError> {
        let value = expression::evaluate(expression, &self.expression_context())?;
        log::debug!("[AUDIT] `{}` evaluated to {}", expression, value);
        Ok(value)
    }

    /// Fills `{dotted.key}` tokens, looking in `extra` before the token tree.
    pub fn interpolate(&self, template: &str, extra: &Map<String, Value>) -> String {
        tokens::interpolate(template, &[extra, self.tokens.as_map()])
    }

    /// Fresh command adapter bound to this execution's sandbox.
    pub fn command(&self) -> RemoteCommand<'a> {
        RemoteCommand::new(self.sandbox, self.commands, &self.config.gateway)
    }

    pub fn evaluator(&self) -> RemoteEvaluator<'a> {
        RemoteEvaluator::new(self.sandbox, self.config)
    }

    pub fn remote_evaluate(&self, task: &RemoteTask) -> Result<Value, AuditError> {
        Ok(self.evaluator().evaluate(task)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::MockSandbox;
    use crate::target::StaticTarget;
    use serde_json::json;

    fn supplied(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_bind_defaults_and_overrides() {
        let mut params = ParameterSet::default();
        params
            .add_parameter("module", ParameterMode::Required, "Module name", None)
            .kind(ParameterKind::String);
        params
            .add_parameter("limit", ParameterMode::Optional, "Row limit", Some(json!(10)))
            .kind(ParameterKind::Integer);
        params.add_parameter("note", ParameterMode::Optional, "Free text", None);

        let bound = params
            .bind(&supplied(json!({"module": "views", "extra": true})))
            .unwrap();
        assert_eq!(
            Value::Object(bound),
            json!({"module": "views", "limit": 10, "note": null, "extra": true})
        );
    }

    #[test]
    fn test_bind_missing_required_is_invalid_input() {
        let mut params = ParameterSet::default();
        params.add_parameter("module", ParameterMode::Required, "Module name", None);

        let err = params.bind(&supplied(json!({"module": null}))).unwrap_err();
        assert_eq!(err.kind(), "InvalidInput");
        assert_eq!(err.outcome(), Outcome::NotApplicable);
        assert!(err.to_string().contains("module"));
    }

    #[test]
    fn test_bind_wrong_kind_has_hint() {
        let mut params = ParameterSet::default();
        params
            .add_parameter("limit", ParameterMode::Optional, "Row limit", Some(json!(10)))
            .kind(ParameterKind::Integer);

        let err = params.bind(&supplied(json!({"limit": "ten"}))).unwrap_err();
        assert_eq!(err.kind(), "ParameterType");
        assert_eq!(err.outcome(), Outcome::Error);
        assert!(err
            .to_string()
            .contains("expected an integer (e.g. `limit: 10`), got a string"));
    }

    #[test]
    fn test_redeclaring_replaces_definition() {
        let mut params = ParameterSet::default();
        params.add_parameter("x", ParameterMode::Required, "first", None);
        params.add_parameter("x", ParameterMode::Optional, "second", Some(json!(1)));

        assert_eq!(params.definitions().len(), 1);
        assert_eq!(params.get("x").unwrap().description, "second");
    }

    #[test]
    fn test_error_classification() {
        let dependency = AuditError::DependencyFailed {
            policy: "a".into(),
            dependency: "b".into(),
            outcome: Outcome::Failure,
            fail_behaviour: Outcome::Warning,
        };
        assert_eq!(dependency.outcome(), Outcome::Warning);
        assert_eq!(dependency.kind(), "DependencyFailure");

        let missing = AuditError::MissingFact("drupal".into());
        assert_eq!(missing.outcome(), Outcome::NotApplicable);
        assert!(missing.is_warning());

        let decode = AuditError::Remote(crate::remote::RemoteError::Decode {
            context: "x".into(),
            output: String::new(),
            source: serde_json::from_str::<Value>("").unwrap_err(),
        });
        assert_eq!(decode.kind(), "RemoteDecode");
        assert_eq!(decode.outcome(), Outcome::Error);
        assert!(!decode.is_warning());

        let unknown = AuditError::UnknownPolicy {
            policy: "ghost".into(),
            fail_behaviour: Outcome::Warning,
        };
        assert_eq!(unknown.kind(), "UnknownPolicy");
        assert_eq!(unknown.outcome(), Outcome::Warning);

        let cycle = AuditError::DependencyCycle {
            chain: "a -> a".into(),
            fail_behaviour: Outcome::NotApplicable,
        };
        assert_eq!(cycle.kind(), "DependencyCycle");
        assert_eq!(cycle.outcome(), Outcome::NotApplicable);

        let panicked = AuditError::Panicked("index out of bounds".into());
        assert_eq!(panicked.kind(), "Panic");
        assert_eq!(panicked.outcome(), Outcome::Error);
    }

    #[test]
    fn test_context_accessors_and_expressions() {
        let policy = Policy::new("p", "c");
        let sandbox = MockSandbox::new();
        let target = StaticTarget::new("site")
            .with_property("php_version", "8.2")
            .with_property("drupal", json!({"version": "10.2.1"}));
        let config = EngineConfig::default();
        let commands = CommandRegistry::default();
        let mut tokens = TokenStore::new();

        let mut ctx = AuditContext::new(&policy, &sandbox, &target, &config, &commands, &mut tokens);
        ctx.set_parameter("threshold", 3);
        ctx.set("count", 5);

        assert_eq!(ctx.get("count"), Some(&json!(5)));
        assert_eq!(ctx.get_parameter("threshold"), Some(&json!(3)));
        assert_eq!(
            ctx.evaluate("count > parameters.threshold and php_version == '8.2'")
                .unwrap(),
            json!(true)
        );
        assert_eq!(
            ctx.evaluate("target.drupal.version").unwrap(),
            json!("10.2.1")
        );
        assert!(matches!(
            ctx.target_property("solr"),
            Err(AuditError::MissingFact(_))
        ));
        assert!(matches!(
            ctx.parameter_str("threshold"),
            Err(AuditError::ParameterType { .. })
        ));

        let extra = supplied(json!({"count": "overridden"}));
        assert_eq!(
            ctx.interpolate("{count}/{parameters.threshold}", &extra),
            "overridden/3"
        );
    }

    #[test]
    fn test_context_command_uses_gateway() {
        let policy = Policy::new("p", "c");
        let sandbox = MockSandbox::new();
        let target = StaticTarget::new("site");
        let config = EngineConfig::default().with_gateway("drush @stage");
        let commands = CommandRegistry::default();
        let mut tokens = TokenStore::new();

        let ctx = AuditContext::new(&policy, &sandbox, &target, &config, &commands, &mut tokens);
        let mut drush = ctx.command();
        drush.call("status", &[]).unwrap();
        assert_eq!(sandbox.commands(), vec!["drush @stage status"]);
    }
}
