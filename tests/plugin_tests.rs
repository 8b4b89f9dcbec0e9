//! Integration tests for the plugin and its fixtures
//!
//! These tests cover:
//! - Report header and parameter validation
//! - Item inspection before a session
//! - Parametrization of host, group and scenario fixtures
//! - Lazy per-request fixtures and marker overrides

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;

use distronode_test::cli::PluginArgs;
use distronode_test::config::{EngineDefaults, Overrides, MISSING_HOST_PATTERN, MISSING_INVENTORY};
use distronode_test::error::Error;
use distronode_test::fixtures::Fixtures;
use distronode_test::plugin::{ParamValue, Plugin, TestItem, TestRequest};
use distronode_test::version::AdapterStrategy;

fn plugin(args: PluginArgs, engine: FakeEngine) -> (Plugin, std::sync::Arc<FakeEngine>) {
    let engine = engine.into_arc();
    let plugin = Plugin::with_engine(args, engine.clone(), EngineDefaults::default())
        .with_strategy(AdapterStrategy::NEWEST);
    (plugin, engine)
}

fn args(inventory: &str, host_pattern: Option<&str>) -> PluginArgs {
    PluginArgs {
        inventory: Some(inventory.to_string()),
        host_pattern: host_pattern.map(str::to_string),
        ..PluginArgs::default()
    }
}

fn fixtures_of(generated: &[distronode_test::plugin::Parametrization]) -> Vec<&str> {
    generated.iter().map(|p| p.fixture.as_str()).collect()
}

// ============================================================================
// Session Tests
// ============================================================================

#[test]
fn test_report_header() {
    let (plugin, _engine) = plugin(PluginArgs::default(), FakeEngine::new());
    assert_eq!(plugin.report_header(), "distronode: 2.15.3");
}

#[test]
fn test_cli_options_use_engine_defaults() {
    let (plugin, _engine) = plugin(PluginArgs::default(), FakeEngine::new());
    let options = plugin.cli_options();
    assert_eq!(options.inventory.as_deref(), Some("/etc/distronode/hosts"));
    assert_eq!(options.connection.as_deref(), Some("smart"));
}

#[test]
fn test_assert_required_parameters() {
    let (plugin_without, _) = plugin(PluginArgs::default(), FakeEngine::new());
    match plugin_without.assert_required_parameters() {
        Err(Error::Usage { violations }) => assert_eq!(violations, vec![MISSING_HOST_PATTERN]),
        other => panic!("expected usage error, got {:?}", other),
    }

    let (plugin_with, _) = plugin(args("a,b,", Some("all")), FakeEngine::new());
    assert!(plugin_with.assert_required_parameters().is_ok());
}

#[test]
fn test_modify_items_validates_only_for_module_fixtures() {
    let (plugin, _engine) = plugin(PluginArgs::default(), FakeEngine::new());

    let plain = TestItem {
        name: "test_plain".into(),
        fixturenames: vec!["tmp_path".into(), "distronode_host".into()],
        defined: vec![],
    };
    assert!(plugin.modify_items(&[plain.clone()]).is_ok());

    let module = TestItem {
        name: "test_module".into(),
        fixturenames: vec!["distronode_module".into()],
        defined: vec![],
    };
    let err = plugin.modify_items(&[plain, module]).unwrap_err();
    assert!(err.is_usage());
}

// ============================================================================
// Parametrization Tests
// ============================================================================

#[test]
fn test_generate_host_parametrization() {
    let dir = InventoryDir::new();
    let (plugin, _engine) = plugin(args(&dir.file("hosts.yml"), Some("web")), FakeEngine::new());

    let generated = plugin.generate_tests(&["distronode_host".to_string()]).unwrap();
    assert_eq!(fixtures_of(&generated), vec!["distronode_host"]);
    assert_eq!(generated[0].ids, vec!["web1", "web2", "web3"]);
    assert!(matches!(&generated[0].values[0], ParamValue::Host(d) if d.pattern() == "web1"));
}

#[test]
fn test_generate_group_parametrization_with_extra_inventory() {
    let dir = InventoryDir::new();
    let extra = dir.file("extra.yml");
    let engine = FakeEngine::new().with_dump(&dir.path("extra.yml"), extra_dump());
    let plugin_args = PluginArgs {
        extra_inventory: Some(extra),
        ..args(&dir.file("hosts.yml"), Some("all"))
    };
    let (plugin, _engine) = plugin(plugin_args, engine);

    let generated = plugin.generate_tests(&["distronode_group".to_string()]).unwrap();
    assert_eq!(
        generated[0].ids,
        vec!["all", "db", "prod", "ungrouped", "web", "all", "cache", "ungrouped"]
    );
    assert_eq!(generated[0].len(), 8);
}

#[test]
fn test_generate_requires_parameters() {
    let dir = InventoryDir::new();
    let (plugin, _engine) = plugin(args(&dir.file("hosts.yml"), None), FakeEngine::new());

    let err = plugin.generate_tests(&["distronode_host".to_string()]).unwrap_err();
    assert!(err.is_usage());
}

#[test]
fn test_generate_reports_inventory_errors_as_usage() {
    let (plugin, _engine) = plugin(
        args("/nonexistent/distronode/hosts.yml", Some("all")),
        FakeEngine::new(),
    );

    let err = plugin.generate_tests(&["distronode_group".to_string()]).unwrap_err();
    assert!(err.is_usage());
    assert!(err.to_string().contains("no such file or directory"));
}

#[test]
fn test_generate_ignores_other_fixtures() {
    let (plugin, _engine) = plugin(PluginArgs::default(), FakeEngine::new());
    assert!(plugin.generate_tests(&["tmp_path".to_string()]).unwrap().is_empty());
}

#[test]
fn test_generate_scenarios() {
    let root = TempDir::new().unwrap();
    write_scenario(root.path(), "webserver", "default", "driver:\n  name: docker\n");
    write_scenario(root.path(), "webserver", "cluster", "");
    write_scenario(root.path(), "database", "default", "");

    let (plugin, _engine) = plugin(PluginArgs::default(), FakeEngine::new());
    let plugin = plugin.with_root(root.path());

    let generated = plugin.generate_tests(&["molecule_scenario".to_string()]).unwrap();
    assert_eq!(
        generated[0].ids,
        vec!["database-default", "webserver-cluster", "webserver-default"]
    );
    match &generated[0].values[1] {
        ParamValue::Scenario(scenario) => {
            assert_eq!(scenario.name, "cluster");
            assert!(scenario.parent_directory.ends_with("webserver"));
        }
        other => panic!("expected a scenario, got {:?}", other),
    }
}

#[test]
fn test_generate_scenarios_none_found() {
    let root = TempDir::new().unwrap();
    let (plugin, _engine) = plugin(PluginArgs::default(), FakeEngine::new());
    let plugin = plugin.with_root(root.path());

    let err = plugin.generate_tests(&["molecule_scenario".to_string()]).unwrap_err();
    assert!(matches!(err, Error::NoScenarios(_)));
    assert_eq!(err.exit_code().code(), 2);
}

// ============================================================================
// Fixture Tests
// ============================================================================

#[test]
fn test_module_fixture_uses_host_pattern() {
    let (plugin, _engine) = plugin(args("web1,web2,db1", Some("web*")), FakeEngine::new());
    let fixtures = Fixtures::new(&plugin, TestRequest::new("test_module"));

    let module = fixtures.module().unwrap();
    assert_eq!(module.pattern(), "web*");
    assert_eq!(module.len(), 2);
}

#[test]
fn test_module_fixture_without_host_pattern() {
    let (plugin, _engine) = plugin(args("web1,web2", None), FakeEngine::new());
    let fixtures = Fixtures::new(&plugin, TestRequest::new("test_module"));

    match fixtures.module() {
        Err(Error::Usage { violations }) => assert_eq!(violations, vec![MISSING_HOST_PATTERN]),
        other => panic!("expected usage error, got {:?}", other),
    }
}

#[test]
fn test_module_fixture_validates_merged_options() {
    let (plugin, engine) = plugin(args("web1,web2", None), FakeEngine::new());
    let marker: Overrides = [("inventory".to_string(), Value::from(""))]
        .into_iter()
        .collect();
    let fixtures = Fixtures::new(&plugin, TestRequest::new("test_blank").with_marker(marker));

    match fixtures.module() {
        Err(Error::Usage { violations }) => {
            assert_eq!(violations, vec![MISSING_HOST_PATTERN, MISSING_INVENTORY]);
        }
        other => panic!("expected usage error, got {:?}", other),
    }
    assert!(engine.requests().is_empty());
}

#[test]
fn test_marker_overrides_command_line() {
    let (plugin, _engine) = plugin(args("web1,web2,db1", Some("web*")), FakeEngine::new());
    let marker: Overrides = [("host_pattern".to_string(), Value::from("db1"))]
        .into_iter()
        .collect();
    let request = TestRequest::new("test_db").with_marker(marker);
    let fixtures = Fixtures::new(&plugin, request);

    assert_eq!(fixtures.module().unwrap().pattern(), "db1");

    let mut explicit = Overrides::new();
    explicit.insert("inventory".into(), json!("cache1,"));
    let manager = fixtures.adhoc(&explicit).unwrap();
    assert_eq!(manager.keys(), vec!["cache1"]);
}

#[test]
fn test_facts_fixture_runs_setup_once() {
    let stdout = json_output(&[("web1", json!({"distronode_facts": {"hostname": "web1"}}))]);
    let (plugin, engine) = plugin(
        args("web1,", Some("web1")),
        FakeEngine::new().with_adhoc(stdout, 0),
    );
    let fixtures = Fixtures::new(&plugin, TestRequest::new("test_facts"));

    let facts = fixtures.facts().unwrap();
    assert_eq!(facts.facts()["web1"]["hostname"], json!("web1"));
    fixtures.facts().unwrap();

    let requests = engine.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].module, "setup");
}

#[test]
fn test_localhost_fixture() {
    let stdout = json_output(&[("localhost", json!({"ping": "pong"}))]);
    let (plugin, engine) = plugin(PluginArgs::default(), FakeEngine::new().with_adhoc(stdout, 0));
    let fixtures = Fixtures::new(&plugin, TestRequest::new("test_local"));

    let localhost = fixtures.localhost().unwrap();
    assert_eq!(localhost.pattern(), "localhost");

    let result = localhost.invoke("ping", "").unwrap();
    assert!(result.is_success());

    let request = &engine.requests()[0];
    assert_eq!(request.sources, vec!["localhost,".to_string()]);
    assert_eq!(request.connection.as_deref(), Some("local"));
}
