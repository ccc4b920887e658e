//! Built-in check logic.
//!
//! | class            | passes when                                        |
//! |------------------|----------------------------------------------------|
//! | `expression`     | `expression` evaluates truthy against the tokens   |
//! | `module_enabled` | `pm-list` reports `module` as enabled              |
//! | `sql_count`      | the query result compares true against `expected` |
//! | `php_evaluation` | the remote `script` returns a truthy value         |

use crate::audit::{Audit, AuditContext, AuditError, ParameterKind, ParameterMode, ParameterSet, Remediable};
use crate::engine::AuditRegistry;
use crate::expression::is_truthy;
use crate::remote::RemoteTask;
use crate::types::Outcome;
use serde_json::{json, Map, Value};

pub const EXPRESSION: &str = "expression";
pub const MODULE_ENABLED: &str = "module_enabled";
pub const SQL_COUNT: &str = "sql_count";
pub const PHP_EVALUATION: &str = "php_evaluation";

/// Registry holding every built-in check under its class name.
pub fn builtin_registry() -> AuditRegistry {
    let mut registry = AuditRegistry::new();
    registry
        .register(EXPRESSION, ExpressionCheck)
        .register(MODULE_ENABLED, ModuleEnabled)
        .register(SQL_COUNT, SqlCount)
        .register(PHP_EVALUATION, PhpEvaluation);
    registry
}

fn optional_str(ctx: &AuditContext<'_>, name: &str) -> Option<String> {
    ctx.get_parameter(name)
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub struct ExpressionCheck;

impl Audit for ExpressionCheck {
    fn configure(&self, parameters: &mut ParameterSet) {
        parameters
            .add_parameter("expression", ParameterMode::Required, "Expression that must be truthy", None)
            .kind(ParameterKind::String);
        parameters
            .add_parameter("not_applicable", ParameterMode::Optional, "Expression marking the policy not applicable", None)
            .kind(ParameterKind::String);
        parameters
            .add_parameter("success_message", ParameterMode::Optional, "Message template on success", None)
            .kind(ParameterKind::String);
        parameters
            .add_parameter("failure_message", ParameterMode::Optional, "Message template on failure", None)
            .kind(ParameterKind::String);
    }

    fn audit(&self, ctx: &mut AuditContext<'_>) -> Result<Outcome, AuditError> {
        if let Some(guard) = optional_str(ctx, "not_applicable") {
            if is_truthy(&ctx.evaluate(&guard)?) {
                return Ok(Outcome::NotApplicable);
            }
        }

        let expression = ctx.parameter_str("expression")?;
        let result = ctx.evaluate(&expression)?;
        let passed = is_truthy(&result);
        ctx.set("result", result);

        let template = if passed { "success_message" } else { "failure_message" };
        if let Some(template) = optional_str(ctx, template) {
            let message = ctx.interpolate(&template, &Map::new());
            ctx.set("message", message);
        }

        Ok(if passed { Outcome::Success } else { Outcome::Failure })
    }
}

/// Checks a module's status through `pm-list`; enables it on remediation.
pub struct ModuleEnabled;

impl Audit for ModuleEnabled {
    fn configure(&self, parameters: &mut ParameterSet) {
        parameters
            .add_parameter("module", ParameterMode::Required, "Machine name of the module", None)
            .kind(ParameterKind::String);
    }

    fn audit(&self, ctx: &mut AuditContext<'_>) -> Result<Outcome, AuditError> {
        let module = ctx.parameter_str("module")?;

        let mut drush = ctx.command();
        drush.option("format", Some("json"));
        let listing = drush.call("pmList", &[])?;

        let status = listing
            .as_json()
            .and_then(|modules| modules.get(&module))
            .and_then(|info| info.get("status"))
            .and_then(Value::as_str)
            .unwrap_or("absent")
            .to_lowercase();
        ctx.set("status", status.as_str());

        if status == "enabled" {
            Ok(Outcome::Success)
        } else {
            Ok(Outcome::Failure)
        }
    }

    fn remediation(&self) -> Option<&dyn Remediable> {
        Some(self)
    }
}

impl Remediable for ModuleEnabled {
    fn remediate(&self, ctx: &mut AuditContext<'_>) -> Result<Outcome, AuditError> {
        let module = ctx.parameter_str("module")?;

        let mut drush = ctx.command();
        drush.option("y", None);
        drush.call("pmEnable", &[&module])?;

        self.audit(ctx)
    }
}

/// Compares a numeric SQL result against an expected value.
pub struct SqlCount;

impl Audit for SqlCount {
    fn configure(&self, parameters: &mut ParameterSet) {
        parameters
            .add_parameter("query", ParameterMode::Required, "Query returning a single number", None)
            .kind(ParameterKind::String);
        parameters
            .add_parameter("expected", ParameterMode::Optional, "Value to compare against", Some(json!(0)))
            .kind(ParameterKind::Number);
        parameters
            .add_parameter("comparison", ParameterMode::Optional, "One of ==, !=, <, <=, >, >=", Some(json!("==")))
            .kind(ParameterKind::String);
    }

    fn audit(&self, ctx: &mut AuditContext<'_>) -> Result<Outcome, AuditError> {
        let query = ctx.parameter_str("query")?;
        let expected = ctx
            .get_parameter("expected")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let comparison = optional_str(ctx, "comparison").unwrap_or_else(|| "==".to_string());

        let output = ctx.command().sql_query(&query)?;
        let count: f64 = output.parse().map_err(|_| {
            AuditError::Failed(format!("query returned a non-numeric result: {:?}", output))
        })?;
        ctx.set("count", json!(count));

        let passed = match comparison.as_str() {
            "==" => count == expected,
            "!=" => count != expected,
            "<" => count < expected,
            "<=" => count <= expected,
            ">" => count > expected,
            ">=" => count >= expected,
            other => {
                return Err(AuditError::ParameterType {
                    name: "comparison".to_string(),
                    hint: format!("expected one of ==, !=, <, <=, >, >= (e.g. `comparison: '>='`), got `{}`", other),
                })
            }
        };

        Ok(if passed { Outcome::Success } else { Outcome::Failure })
    }
}

/// Runs a PHP function body on the target.
pub struct PhpEvaluation;

impl Audit for PhpEvaluation {
    fn configure(&self, parameters: &mut ParameterSet) {
        parameters
            .add_parameter("script", ParameterMode::Required, "PHP function body returning the result", None)
            .kind(ParameterKind::String);
        parameters
            .add_parameter("arguments", ParameterMode::Optional, "Values passed to the function", Some(json!({})))
            .kind(ParameterKind::Map);
    }

    fn audit(&self, ctx: &mut AuditContext<'_>) -> Result<Outcome, AuditError> {
        let mut task = RemoteTask::new(ctx.parameter_str("script")?);
        if let Some(Value::Object(arguments)) = ctx.get_parameter("arguments") {
            for (name, value) in arguments {
                task = task.arg(name.clone(), value.clone());
            }
        }

        let result = ctx.remote_evaluate(&task)?;
        let passed = is_truthy(&result);
        ctx.set("result", result);

        Ok(if passed { Outcome::Success } else { Outcome::Failure })
    }
}
