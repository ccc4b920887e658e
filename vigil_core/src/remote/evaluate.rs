use super::{decode_json, RemoteError};
use crate::config::EngineConfig;
use crate::sandbox::Sandbox;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// A unit of logic to run on the target: a function body plus the argument
/// values it is called with.
///
/// Arguments are embedded as literals, so the remote process sees the values
/// as they were when the task was built.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTask {
    body: String,
    arguments: Vec<(String, Value)>,
}

impl RemoteTask {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            arguments: Vec::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.push((name.into(), value.into()));
        self
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn arguments(&self) -> &[(String, Value)] {
        &self.arguments
    }
}

/// Renders a [`RemoteTask`] into a standalone script for the remote interpreter.
///
/// The script must write exactly one JSON document to standard output.
pub trait ScriptDialect {
    fn render(&self, task: &RemoteTask) -> Result<String, RemoteError>;
}

/// PHP scripts, as run by `drush php-script`.
pub struct PhpDialect;

fn is_php_identifier(name: &str) -> bool {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let ident = IDENT.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));
    ident.is_match(name)
}

impl ScriptDialect for PhpDialect {
    fn render(&self, task: &RemoteTask) -> Result<String, RemoteError> {
        if let Some((name, _)) = task.arguments().iter().find(|(name, _)| !is_php_identifier(name)) {
            return Err(RemoteError::InvalidArgumentName(name.clone()));
        }

        let params: Vec<String> = task
            .arguments()
            .iter()
            .map(|(name, _)| format!("${}", name))
            .collect();
        let params = params.join(", ");

        let mut script = String::from("<?php\n");
        for (name, value) in task.arguments() {
            script.push_str(&format!("${} = {};\n", name, php_literal(value)));
        }
        script.push_str(&format!("$evaluation = function ({}) {{\n", params));
        script.push_str(task.body().trim_end());
        script.push_str("\n};\n");
        script.push_str(&format!("echo json_encode($evaluation({}));\n", params));
        Ok(script)
    }
}

/// Renders a JSON value as a PHP literal, `var_export` style.
pub fn php_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => php_string(s),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(php_literal).collect();
            format!("array({})", items.join(", "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(key, value)| format!("{} => {}", php_string(key), php_literal(value)))
                .collect();
            format!("array({})", entries.join(", "))
        }
    }
}

fn php_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Remote file holding a transferred script. Removed when dropped, on every
/// exit path of an evaluation.
struct RemoteTempFile<'a> {
    sandbox: &'a dyn Sandbox,
    path: String,
}

impl<'a> RemoteTempFile<'a> {
    fn create(sandbox: &'a dyn Sandbox) -> Result<Self, RemoteError> {
        let path = sandbox.exec("mktemp", &[])?.trim().to_string();
        if path.is_empty() {
            return Err(RemoteError::EmptyTempPath);
        }
        Ok(Self { sandbox, path })
    }

    fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for RemoteTempFile<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sandbox.exec("rm -f {path}", &[("path", &self.path)]) {
            log::warn!("[REMOTE] Failed to remove {}: {}", self.path, e);
        }
    }
}

/// Runs [`RemoteTask`]s on the target and decodes their JSON result.
pub struct RemoteEvaluator<'a> {
    sandbox: &'a dyn Sandbox,
    config: &'a EngineConfig,
    dialect: Box<dyn ScriptDialect>,
}

impl<'a> RemoteEvaluator<'a> {
    pub fn new(sandbox: &'a dyn Sandbox, config: &'a EngineConfig) -> Self {
        Self {
            sandbox,
            config,
            dialect: Box::new(PhpDialect),
        }
    }

    pub fn with_dialect(mut self, dialect: impl ScriptDialect + 'static) -> Self {
        self.dialect = Box::new(dialect);
        self
    }

    pub fn evaluate(&self, task: &RemoteTask) -> Result<Value, RemoteError> {
        let script = self.dialect.render(task)?;
        let payload = BASE64_STANDARD.encode(script.as_bytes());

        let file = RemoteTempFile::create(self.sandbox)?;
        log::debug!(
            "[REMOTE] Transferring {} byte script to {}",
            script.len(),
            file.path()
        );
        self.sandbox.exec(
            "echo {payload} | base64 --decode > {path}",
            &[("payload", &payload), ("path", file.path())],
        )?;

        if self.config.echo_remote_scripts {
            self.echo(&file, &script)?;
        }

        let output = self.sandbox.exec(
            &self.config.interpreter,
            &[("gateway", &self.config.gateway), ("path", file.path())],
        )?;

        decode_json("remote evaluation", &output)
    }

    fn echo(&self, file: &RemoteTempFile<'_>, script: &str) -> Result<(), RemoteError> {
        let remote = self.sandbox.exec("cat {path}", &[("path", file.path())])?;
        log::debug!("[REMOTE] Script at {}:\n{}", file.path(), remote);

        let local_digest = hex::encode(Sha256::digest(script.as_bytes()));
        let remote_digest = hex::encode(Sha256::digest(remote.as_bytes()));
        if local_digest != remote_digest {
            log::warn!(
                "[REMOTE] Transferred script digest mismatch at {} (local {}, remote {})",
                file.path(),
                local_digest,
                remote_digest
            );
        }
        Ok(())
    }
}
