use super::{decode_json, RemoteError};
use crate::sandbox::Sandbox;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Option token that makes the gateway print JSON.
pub const JSON_FORMAT_OPTION: &str = "--format=json";

/// Maps a mixed-case invocation name onto its hyphenated CLI command.
///
/// `pmInfo` and `PmInfo` both become `pm-info`; `status` is unchanged.
pub fn hyphenate(name: &str) -> String {
    static WORD: OnceLock<Regex> = OnceLock::new();
    let word = WORD.get_or_init(|| Regex::new(r"[A-Z]?[a-z0-9]+").expect("static regex"));
    word.find_iter(name)
        .map(|m| m.as_str().to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// How a command's arguments are laid out on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    /// Space-joined as given.
    Verbatim,
    /// Joined, then wrapped in double quotes as a single argument (SQL payloads).
    Quoted,
}

impl ArgShape {
    fn render(&self, args: &[&str]) -> Vec<String> {
        match self {
            ArgShape::Verbatim => args.iter().map(|a| a.to_string()).collect(),
            ArgShape::Quoted if args.is_empty() => Vec::new(),
            ArgShape::Quoted => vec![format!("\"{}\"", args.join(" "))],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub shape: ArgShape,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, shape: ArgShape) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }

    /// The hyphenated command token sent to the gateway.
    pub fn token(&self) -> String {
        hyphenate(&self.name)
    }
}

/// Commands a [`RemoteCommand`] is allowed to issue, keyed by invocation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRegistry {
    specs: BTreeMap<String, CommandSpec>,
}

impl Default for CommandRegistry {
    /// Common drush commands.
    fn default() -> Self {
        let mut registry = Self::empty();
        for name in [
            "status",
            "pmList",
            "pmInfo",
            "pmEnable",
            "pmUninstall",
            "configGet",
            "configSet",
            "stateGet",
            "coreRequirements",
            "updatedbStatus",
            "cacheRebuild",
            "userInformation",
            "watchdogShow",
        ] {
            registry.register(CommandSpec::new(name, ArgShape::Verbatim));
        }
        registry.register(CommandSpec::new("sqlQuery", ArgShape::Quoted));
        registry
    }
}

impl CommandRegistry {
    pub fn empty() -> Self {
        Self {
            specs: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, spec: CommandSpec) -> &mut Self {
        self.specs.insert(spec.name.clone(), spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.specs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }
}

/// Key of a one-shot command option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionKey {
    Named(String),
    /// Accepted for compatibility with positional option lists; renders nothing.
    Positional(usize),
}

impl From<&str> for OptionKey {
    fn from(name: &str) -> Self {
        OptionKey::Named(name.to_string())
    }
}

impl From<String> for OptionKey {
    fn from(name: String) -> Self {
        OptionKey::Named(name)
    }
}

impl From<usize> for OptionKey {
    fn from(index: usize) -> Self {
        OptionKey::Positional(index)
    }
}

/// Renders one option: `-x[ value]` for single-character names,
/// `--name[=value]` otherwise. Empty values are dropped.
pub fn render_option(key: &OptionKey, value: Option<&str>) -> Option<String> {
    let OptionKey::Named(name) = key else {
        return None;
    };
    let value = value.filter(|v| !v.is_empty());
    let flag = match (name.chars().count(), value) {
        (1, Some(v)) => format!("-{} {}", name, v),
        (1, None) => format!("-{}", name),
        (_, Some(v)) => format!("--{}={}", name, v),
        (_, None) => format!("--{}", name),
    };
    Some(flag)
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    Text(String),
    Json(Value),
}

impl CommandOutput {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            CommandOutput::Json(value) => Some(value),
            CommandOutput::Text(_) => None,
        }
    }

    /// Raw text, or the compact JSON encoding for decoded output.
    pub fn into_text(self) -> String {
        match self {
            CommandOutput::Text(text) => text,
            CommandOutput::Json(value) => value.to_string(),
        }
    }
}

/// Builds and runs gateway CLI invocations (`drush [options] <command> [args]`).
///
/// Options set through [`options`](Self::options) accumulate until the next
/// invocation and are cleared as soon as it is issued, whether it succeeds or not.
pub struct RemoteCommand<'a> {
    sandbox: &'a dyn Sandbox,
    registry: &'a CommandRegistry,
    gateway: String,
    options: Vec<String>,
}

impl<'a> RemoteCommand<'a> {
    pub fn new(sandbox: &'a dyn Sandbox, registry: &'a CommandRegistry, gateway: &str) -> Self {
        Self {
            sandbox,
            registry,
            gateway: gateway.to_string(),
            options: Vec::new(),
        }
    }

    /// Queues options for the next invocation. Repeated calls append.
    pub fn options<K, I>(&mut self, options: I) -> &mut Self
    where
        K: Into<OptionKey>,
        I: IntoIterator<Item = (K, Option<String>)>,
    {
        for (key, value) in options {
            if let Some(flag) = render_option(&key.into(), value.as_deref()) {
                self.options.push(flag);
            }
        }
        self
    }

    pub fn option(&mut self, key: impl Into<OptionKey>, value: Option<&str>) -> &mut Self {
        self.options([(key.into(), value.map(str::to_string))])
    }

    pub fn pending_options(&self) -> &[String] {
        &self.options
    }

    pub fn call(&mut self, command: &str, args: &[&str]) -> Result<CommandOutput, RemoteError> {
        let options = std::mem::take(&mut self.options);
        let spec = self
            .registry
            .get(command)
            .ok_or_else(|| RemoteError::UnknownCommand(command.to_string()))?;

        let mut parts = options.clone();
        parts.push(spec.token());
        parts.extend(spec.shape.render(args));
        let invocation = parts.join(" ");

        log::debug!("[DRUSH] {} {}", self.gateway, invocation);
        let output = self.sandbox.exec(
            "{gateway} {invocation}",
            &[("gateway", &self.gateway), ("invocation", &invocation)],
        )?;

        if options.iter().any(|o| o == JSON_FORMAT_OPTION) {
            return decode_json(&format!("`{}`", spec.token()), &output).map(CommandOutput::Json);
        }
        Ok(CommandOutput::Text(output))
    }

    /// Runs `sql-query "<sql>"` and returns the trimmed output.
    pub fn sql_query(&mut self, sql: &str) -> Result<String, RemoteError> {
        let output = self.call("sqlQuery", &[sql])?;
        Ok(output.into_text().trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::MockSandbox;
    use serde_json::json;

    #[test]
    fn test_hyphenate() {
        assert_eq!(hyphenate("sqlQuery"), "sql-query");
        assert_eq!(hyphenate("PmInfo"), "pm-info");
        assert_eq!(hyphenate("pmInfo"), "pm-info");
        assert_eq!(hyphenate("status"), "status");
        assert_eq!(hyphenate("updatedbStatus"), "updatedb-status");
    }

    #[test]
    fn test_render_option() {
        assert_eq!(render_option(&"y".into(), None), Some("-y".to_string()));
        assert_eq!(render_option(&"l".into(), Some("en")), Some("-l en".to_string()));
        assert_eq!(
            render_option(&"format".into(), Some("json")),
            Some("--format=json".to_string())
        );
        assert_eq!(render_option(&"yes".into(), Some("")), Some("--yes".to_string()));
        assert_eq!(render_option(&OptionKey::Positional(0), Some("ignored")), None);
    }

    #[test]
    fn test_call_assembles_options_command_args() {
        let sandbox = MockSandbox::new();
        let registry = CommandRegistry::default();
        let mut drush = RemoteCommand::new(&sandbox, &registry, "drush @prod");

        drush
            .option("y", None)
            .option("fields", Some("name,status"))
            .option(0usize, Some("ignored"));
        drush.call("pmInfo", &["views", "node"]).unwrap();

        assert_eq!(
            sandbox.commands(),
            vec!["drush @prod -y --fields=name,status pm-info views node"]
        );
    }

    #[test]
    fn test_options_accumulate_until_next_call() {
        let sandbox = MockSandbox::new();
        let registry = CommandRegistry::default();
        let mut drush = RemoteCommand::new(&sandbox, &registry, "drush");

        drush.options([("y", None)]);
        drush.options([("uri", Some("https://example.com".to_string()))]);
        assert_eq!(drush.pending_options(), ["-y", "--uri=https://example.com"]);

        drush.call("status", &[]).unwrap();
        assert!(drush.pending_options().is_empty());

        drush.call("status", &[]).unwrap();
        assert_eq!(
            sandbox.commands(),
            vec!["drush -y --uri=https://example.com status", "drush status"]
        );
    }

    #[test]
    fn test_options_cleared_after_failed_call() {
        let sandbox = MockSandbox::new();
        sandbox.fail("pm-enable", "module not found");
        let registry = CommandRegistry::default();
        let mut drush = RemoteCommand::new(&sandbox, &registry, "drush");

        drush.option("y", None);
        assert!(matches!(
            drush.call("pmEnable", &["nope"]),
            Err(RemoteError::Sandbox(_))
        ));
        assert!(drush.pending_options().is_empty());

        drush.option("y", None);
        assert!(matches!(
            drush.call("notRegistered", &[]),
            Err(RemoteError::UnknownCommand(_))
        ));
        assert!(drush.pending_options().is_empty());
    }

    #[test]
    fn test_json_output_is_decoded() {
        let sandbox = MockSandbox::new();
        sandbox.respond("pm-list", r#"{"views": {"status": "Enabled"}}"#);
        let registry = CommandRegistry::default();
        let mut drush = RemoteCommand::new(&sandbox, &registry, "drush");

        let output = drush
            .option("format", Some("json"))
            .call("pmList", &[])
            .unwrap();
        assert_eq!(
            output.as_json(),
            Some(&json!({"views": {"status": "Enabled"}}))
        );
    }

    #[test]
    fn test_json_output_must_parse() {
        let sandbox = MockSandbox::new();
        sandbox.respond("pm-list", "Drush command terminated abnormally.");
        let registry = CommandRegistry::default();
        let mut drush = RemoteCommand::new(&sandbox, &registry, "drush");

        let result = drush.option("format", Some("json")).call("pmList", &[]);
        assert!(matches!(result, Err(RemoteError::Decode { .. })));
    }

    #[test]
    fn test_raw_output_without_json_flag() {
        let sandbox = MockSandbox::new();
        sandbox.respond("status", "Drupal version : 10.2.1\n");
        let registry = CommandRegistry::default();
        let mut drush = RemoteCommand::new(&sandbox, &registry, "drush");

        let output = drush.call("status", &[]).unwrap();
        assert_eq!(
            output,
            CommandOutput::Text("Drupal version : 10.2.1\n".to_string())
        );
    }

    #[test]
    fn test_sql_query_quotes_and_trims() {
        let sandbox = MockSandbox::new();
        sandbox.respond("sql-query", "1\n");
        let registry = CommandRegistry::default();
        let mut drush = RemoteCommand::new(&sandbox, &registry, "drush");

        drush.option("database", Some("default"));
        assert_eq!(drush.sql_query("SELECT 1").unwrap(), "1");
        assert_eq!(
            sandbox.commands(),
            vec![r#"drush --database=default sql-query "SELECT 1""#]
        );
        assert!(drush.pending_options().is_empty());
    }

    #[test]
    fn test_custom_registry() {
        let sandbox = MockSandbox::new();
        let mut registry = CommandRegistry::empty();
        registry.register(CommandSpec::new("siteAudit", ArgShape::Verbatim));
        let mut drush = RemoteCommand::new(&sandbox, &registry, "drush");

        drush.call("siteAudit", &["--all"]).unwrap();
        assert_eq!(sandbox.commands(), vec!["drush site-audit --all"]);
        assert!(matches!(
            drush.call("status", &[]),
            Err(RemoteError::UnknownCommand(_))
        ));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["siteAudit"]);
    }
}
