use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use vigil_core::checks::builtin_registry;
use vigil_core::policy_parser::{load_policies, load_target};
use vigil_core::{Engine, EngineConfig, MockSandbox, Outcome, Policy, StaticTarget};

const POLICIES: &str = r#"
- name: drupal:bootstrap
  class: expression
  parameters:
    expression: "drupal_version matches '^10'"
- name: module:views
  class: module_enabled
  parameters:
    module: views
  depends:
    - policy: drupal:bootstrap
      on_fail: not_applicable
- name: module:devel
  class: module_enabled
  parameters:
    module: devel
  depends:
    - policy: drupal:bootstrap
- name: users:admins
  class: sql_count
  parameters:
    query: "SELECT COUNT(*) FROM users_roles WHERE roles_target_id = 'administrator'"
    expected: 2
    comparison: "<="
  depends:
    - policy: drupal:bootstrap
"#;

const PM_LIST: &str = r#"{"views": {"status": "Enabled"}, "devel": {"status": "Disabled"}}"#;

fn write_fixture(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn engine_for(target: StaticTarget, sandbox: Arc<MockSandbox>) -> Engine {
    let policies = write_fixture(POLICIES);
    let catalog = load_policies(policies.path()).unwrap();

    Engine::new(EngineConfig::default(), sandbox, Arc::new(target))
        .with_audits(builtin_registry())
        .with_catalog(catalog)
}

#[test]
fn test_full_audit_from_yaml() {
    let _ = env_logger::builder().is_test(true).try_init();

    let target_file = write_fixture("name: prod\nproperties:\n  drupal_version: '10.2.1'\n");
    let target = load_target(target_file.path()).unwrap();

    let sandbox = Arc::new(MockSandbox::new());
    sandbox.respond("pm-list", PM_LIST);
    sandbox.respond("sql-query", "1\n");
    let engine = engine_for(target, sandbox.clone());

    let policies = engine.catalog().as_slice().to_vec();
    let responses = engine.audit(&policies);
    let outcomes: Vec<_> = responses.iter().map(|r| (r.policy(), r.outcome())).collect();

    assert_eq!(
        outcomes,
        vec![
            ("drupal:bootstrap", Outcome::Success),
            ("module:views", Outcome::Success),
            ("module:devel", Outcome::Failure),
            ("users:admins", Outcome::Success),
        ]
    );
    assert!(responses.iter().all(|r| !r.remediated()));
    assert_eq!(
        responses[1].token("dependencies.drupal:bootstrap"),
        Some(&json!("success"))
    );
    assert!(sandbox
        .commands()
        .iter()
        .all(|c| !c.contains("pm-enable")));
}

#[test]
fn test_failed_bootstrap_marks_dependents() {
    let target = StaticTarget::new("legacy").with_property("drupal_version", "7.98");
    let sandbox = Arc::new(MockSandbox::new());
    let engine = engine_for(target, sandbox.clone());

    let views = engine.catalog().get("module:views").unwrap().clone();
    let devel = engine.catalog().get("module:devel").unwrap().clone();

    let response = engine.execute(&views, true);
    assert_eq!(response.outcome(), Outcome::NotApplicable);
    assert!(!response.remediated());

    let response = engine.execute(&devel, true);
    assert_eq!(response.outcome(), Outcome::Failure);
    assert_eq!(
        response.token("exception_type"),
        Some(&json!("DependencyFailure"))
    );

    // Check logic never reached the target.
    assert_eq!(sandbox.get_count(), 0);
}

#[test]
fn test_remediation_enables_module() {
    let target = StaticTarget::new("prod").with_property("drupal_version", "10.1.0");
    let sandbox = Arc::new(MockSandbox::new());
    sandbox.respond("pm-list", PM_LIST);
    let engine = engine_for(target, sandbox.clone());

    let devel = engine.catalog().get("module:devel").unwrap().clone();
    let response = engine.execute(&devel, true);

    // The scripted listing never changes, so the re-check still fails.
    assert_eq!(response.outcome(), Outcome::Failure);
    assert!(response.remediated());
    assert!(sandbox
        .commands()
        .contains(&"drush -y pm-enable devel".to_string()));
}

#[test]
fn test_every_execution_yields_snapshot() {
    let engine = Engine::new(
        EngineConfig::default().verbose(true),
        Arc::new(MockSandbox::new()),
        Arc::new(StaticTarget::new("empty")),
    )
    .with_audits(builtin_registry());

    let policies = vec![
        Policy::new("no-class", "missing"),
        Policy::new("no-params", "expression"),
        Policy::new("bad-expression", "expression").with_parameter("expression", "1 / 0"),
        Policy::new("ok", "expression").with_parameter("expression", "true"),
    ];

    for response in engine.audit(&policies) {
        let tokens = response.tokens().as_object().unwrap();
        assert!(!tokens.is_empty());
        assert_eq!(response.token("policy"), Some(&json!(response.policy())));
        assert_eq!(
            response.token("outcome"),
            Some(&json!(response.outcome().as_str()))
        );
    }
}

#[test]
fn test_response_serializes() {
    let engine = Engine::new(
        EngineConfig::default(),
        Arc::new(MockSandbox::new()),
        Arc::new(StaticTarget::new("site")),
    )
    .with_audits(builtin_registry());

    let policy = Policy::new("ok", "expression").with_parameter("expression", "1 + 1 == 2");
    let response = engine.execute(&policy, false);
    let value = serde_json::to_value(&response).unwrap();

    assert_eq!(value["policy"], json!("ok"));
    assert_eq!(value["outcome"], json!("success"));
    assert_eq!(value["tokens"]["parameters"]["expression"], json!("1 + 1 == 2"));
    assert!(value["completed_at"].is_string());
}
