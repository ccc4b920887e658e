use serde_json::{json, Map, Value};
use vigil_core::remote::{hyphenate, CommandRegistry, RemoteCommand, RemoteError, RemoteEvaluator, RemoteTask};
use vigil_core::tokens::interpolate;
use vigil_core::{EngineConfig, MockSandbox};

#[test]
fn test_hyphenation() {
    assert_eq!(hyphenate("sqlQuery"), "sql-query");
    assert_eq!(hyphenate("PmInfo"), "pm-info");
    assert_eq!(hyphenate("status"), "status");
}

#[test]
fn test_option_assembly() {
    let sandbox = MockSandbox::new();
    let registry = CommandRegistry::default();
    let mut drush = RemoteCommand::new(&sandbox, &registry, "drush");

    drush.option("y", None);
    drush.option("format", Some("json"));
    drush.option(0usize, Some("ignored"));
    assert_eq!(drush.pending_options(), &["-y", "--format=json"]);
}

#[test]
fn test_sql_wrapper_quotes_and_trims() {
    let sandbox = MockSandbox::new();
    sandbox.respond("sql-query", "  1\n");
    let registry = CommandRegistry::default();

    let result = RemoteCommand::new(&sandbox, &registry, "drush")
        .sql_query("SELECT 1")
        .unwrap();
    assert_eq!(result, "1");
    assert_eq!(sandbox.commands(), vec!["drush sql-query \"SELECT 1\""]);
}

#[test]
fn test_options_accumulate_until_invocation() {
    let sandbox = MockSandbox::new();
    let registry = CommandRegistry::default();
    let mut drush = RemoteCommand::new(&sandbox, &registry, "drush @prod");

    drush.options([("y", None::<String>)]);
    drush.options([("format", Some("yaml".to_string()))]);
    drush.call("pmInfo", &["views"]).unwrap();
    drush.call("status", &[]).unwrap();

    assert_eq!(
        sandbox.commands(),
        vec!["drush @prod -y --format=yaml pm-info views", "drush @prod status"]
    );
}

#[test]
fn test_failed_invocation_still_clears_options() {
    let sandbox = MockSandbox::new();
    sandbox.fail("config-get", "Config missing");
    let registry = CommandRegistry::default();
    let mut drush = RemoteCommand::new(&sandbox, &registry, "drush");

    drush.option("format", Some("json"));
    assert!(matches!(
        drush.call("configGet", &["system.site"]),
        Err(RemoteError::Sandbox(_))
    ));
    assert!(drush.pending_options().is_empty());
}

#[test]
fn test_remote_round_trip() {
    let sandbox = MockSandbox::new();
    sandbox.respond("mktemp", "/tmp/tmp.rt\n");
    sandbox.respond("php-script", "5");
    let config = EngineConfig::default();

    let task = RemoteTask::new("return $a + $b;").arg("a", 2).arg("b", 3);
    let result = RemoteEvaluator::new(&sandbox, &config).evaluate(&task).unwrap();

    assert_eq!(result, json!(5));
    assert_eq!(sandbox.commands().last().unwrap(), "rm -f /tmp/tmp.rt");
}

#[test]
fn test_both_remote_paths_share_decode_error() {
    let sandbox = MockSandbox::new();
    sandbox.respond("mktemp", "/tmp/tmp.de");
    sandbox.respond("php-script", "Notice: undefined index");
    sandbox.respond("status", "Drupal version : 10.2.1");
    let config = EngineConfig::default();
    let registry = CommandRegistry::default();

    let evaluated = RemoteEvaluator::new(&sandbox, &config).evaluate(&RemoteTask::new("return 1;"));
    assert!(matches!(evaluated, Err(RemoteError::Decode { .. })));

    let mut drush = RemoteCommand::new(&sandbox, &registry, "drush");
    drush.option("format", Some("json"));
    assert!(matches!(drush.call("status", &[]), Err(RemoteError::Decode { .. })));
}

#[test]
fn test_interpolation_repeats() {
    let tokens: Map<String, Value> = json!({"foo": {"bar": "x"}}).as_object().unwrap().clone();
    assert_eq!(interpolate("{foo.bar}-{foo.bar}", &[&tokens]), "x-x");
}
