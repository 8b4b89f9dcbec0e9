//! Integration tests for keyed host and group access.
//!
//! These tests cover:
//! - Membership, item and attribute lookups over both inventory trees
//! - Index and range subscripts through `slice`
//! - Keys, length and group listings
//! - Legacy adapter behavior
//! - Variable resolution for a host

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;

use distronode_test::config::Options;
use distronode_test::error::Error;
use distronode_test::host_manager::{HostManager, TreeKind};
use distronode_test::version::AdapterStrategy;

fn host_list_manager(list: &str) -> HostManager {
    HostManager::with_strategy(
        options(list),
        FakeEngine::new().into_arc(),
        AdapterStrategy::ManagedWithExtra,
    )
    .unwrap()
}

// ============================================================================
// Lookup Tests
// ============================================================================

#[test]
fn test_contains_hosts_groups_and_patterns() {
    let (_dir, _engine, manager) = sample_manager();

    assert!(manager.contains("web1"));
    assert!(manager.contains("web"));
    assert!(manager.contains("all"));
    assert!(manager.contains("web*"));
    assert!(manager.contains("web:&prod"));
    assert!(manager.contains("~db"));

    assert!(!manager.contains("nothing"));
    assert!(!manager.contains(""));
    assert!(!manager.contains("~("));
}

#[test]
fn test_get_and_attr_errors() {
    let (_dir, _engine, manager) = sample_manager();

    let web = manager.get("web").unwrap();
    assert_eq!(web.pattern(), "web");
    assert_eq!(web.len(), 3);
    assert_eq!(web.tree(), TreeKind::Primary);

    assert!(matches!(manager.get("nothing"), Err(Error::HostNotFound(p)) if p == "nothing"));
    assert!(matches!(manager.attr("nothing"), Err(Error::UnknownAttribute(n)) if n == "nothing"));
    assert!(manager.get("nothing").unwrap_err().is_not_found());
}

#[test]
fn test_empty_group_is_found() {
    let engine = FakeEngine::new().with_default_dump(json!({
        "all": {"children": ["ungrouped", "empty"]},
        "empty": {"hosts": []},
        "ungrouped": {"hosts": ["solo"]}
    }));
    let (_dir, _engine, manager) = sample_manager_with(engine);

    assert!(manager.contains("empty"));
    assert!(manager.get("empty").unwrap().is_empty());
}

#[test]
fn test_set_operators_on_host_list() {
    let manager = host_list_manager("localhost,web1,web2");

    assert_eq!(manager.get("local*,&*host").unwrap().len(), 1);
    assert_eq!(manager.get("!localhost").unwrap().len(), 2);
    assert!(!manager.contains("local*,&web*"));
}

// ============================================================================
// Subscript Tests
// ============================================================================

#[test]
fn test_subscripts() {
    let (_dir, _engine, manager) = sample_manager();

    assert_eq!(manager.get("all[0]").unwrap().len(), 1);
    let last = manager.get("all[-1]").unwrap();
    assert!(last.has_host("localhost"));
    assert_eq!(manager.get("all[0:1]").unwrap().len(), 2);
    assert_eq!(manager.get("all[0:]").unwrap().len(), 6);
    assert!(!manager.contains("all[8:]"));
    assert!(!manager.contains("all[10]"));
}

#[test]
fn test_subscript_past_end_of_small_inventory() {
    let manager = host_list_manager("one,two,three");
    assert!(!manager.contains("all[8:]"));
    assert!(manager.get("all[8:]").is_err());
}

#[test]
fn test_four_host_inventory() {
    let manager = host_list_manager("db1,db2,web1,web2,");

    let mut keys = manager.keys();
    keys.sort();
    assert_eq!(keys, vec!["db1", "db2", "web1", "web2"]);

    // Range ends are inclusive, as the engine reads them.
    let first = manager.get("all[0:2]").unwrap();
    assert_eq!(first.len(), 3);
    assert!(first.has_host("db1") && first.has_host("web1"));
    assert!(!first.has_host("web2"));
}

#[test]
fn test_oversized_subscript_bounds() {
    let (_dir, _engine, manager) = sample_manager();

    assert!(manager.contains("all[0:9223372036854775807]"));
    assert_eq!(manager.get("all[0:9223372036854775807]").unwrap().len(), 6);
    assert!(!manager.contains("all[-9223372036854775808]"));
    assert!(!manager.contains("all[99999999999999999999:]"));
    assert!(!manager.contains("all[99999999999999999999]"));
    assert!(manager.get("all[0:99999999999999999999]").is_err());
}

#[test]
fn test_slice() {
    let (_dir, _engine, manager) = sample_manager();

    assert_eq!(manager.slice(Some(0), Some(0)).unwrap().len(), 1);
    assert_eq!(manager.slice(Some(0), Some(1)).unwrap().len(), 2);
    assert_eq!(manager.slice(Some(2), Some(4)).unwrap().len(), 3);
    assert!(manager.slice(None, None).is_err());
    assert!(manager.slice(None, Some(-1)).is_err());
}

// ============================================================================
// Listing Tests
// ============================================================================

#[test]
fn test_keys_len_and_host_names() {
    let (_dir, _engine, manager) = sample_manager();

    let keys = manager.keys();
    assert_eq!(keys.len(), 9);
    for key in ["web1", "db2", "localhost", "web", "db", "prod"] {
        assert!(keys.iter().any(|k| k == key), "missing key {}", key);
    }
    assert!(!keys.iter().any(|k| k == "all" || k == "ungrouped"));

    assert_eq!(manager.len(), 6);
    assert!(!manager.is_empty());
    assert_eq!(manager.host_names().len(), 6);
}

#[test]
fn test_len_counts_hosts_after_limit() {
    let dir = InventoryDir::new();
    let opts = Options {
        inventory: Some(dir.file("hosts.yml")),
        subset: Some("prod".into()),
        ..Options::default()
    };
    let manager = HostManager::with_strategy(
        opts,
        FakeEngine::new().into_arc(),
        AdapterStrategy::ManagedWithExtra,
    )
    .unwrap();

    assert_eq!(manager.len(), 2);
    // Lookups still see every host.
    assert_eq!(manager.get("all").unwrap().len(), 6);
}

#[test]
fn test_keys_of_host_list() {
    let manager = host_list_manager("alpha,beta,gamma,");
    assert_eq!(manager.keys(), vec!["alpha", "beta", "gamma"]);
    assert_eq!(manager.len(), 3);
}

#[test]
fn test_host_names_follow_host_pattern() {
    let dir = InventoryDir::new();
    let opts = Options {
        inventory: Some(dir.file("hosts.yml")),
        host_pattern: Some("db".into()),
        ..Options::default()
    };
    let manager = HostManager::with_strategy(
        opts,
        FakeEngine::new().into_arc(),
        AdapterStrategy::ManagedWithExtra,
    )
    .unwrap();

    assert_eq!(manager.host_names(), vec!["db1", "db2"]);
}

#[test]
fn test_list_groups() {
    let (_dir, _engine, manager) = sample_manager();
    assert_eq!(
        manager.list_groups(),
        vec!["all", "db", "prod", "ungrouped", "web"]
    );
    assert!(manager.get_extra_inventory_groups().is_empty());
}

// ============================================================================
// Extra Inventory Tests
// ============================================================================

#[test]
fn test_extra_inventory() {
    let dir = InventoryDir::new();
    let primary = dir.file("hosts.yml");
    let extra = dir.file("extra.yml");
    let engine = FakeEngine::new()
        .with_dump(&dir.path("extra.yml"), extra_dump())
        .into_arc();

    let opts = Options {
        inventory: Some(primary),
        extra_inventory: Some(extra),
        ..Options::default()
    };
    let manager =
        HostManager::with_strategy(opts, engine, AdapterStrategy::ManagedWithExtra).unwrap();

    assert!(manager.extra().is_some());
    assert!(manager.contains("redis1"));
    assert_eq!(manager.get("redis1").unwrap().tree(), TreeKind::Extra);
    assert_eq!(manager.get("cache").unwrap().len(), 2);
    // Primary wins for names present in both trees.
    assert_eq!(manager.get("all").unwrap().tree(), TreeKind::Primary);

    assert_eq!(manager.get_extra_inventory_groups(), vec!["all", "cache", "ungrouped"]);
    assert_eq!(manager.len(), 6);
    assert!(manager.keys().iter().any(|k| k == "redis2"));
    assert!(manager.keys().iter().any(|k| k == "cache"));
}

#[test]
fn test_extra_inventory_ignored_by_older_adapters() {
    let dir = InventoryDir::new();
    let opts = Options {
        inventory: Some(dir.file("hosts.yml")),
        extra_inventory: Some(dir.file("extra.yml")),
        ..Options::default()
    };
    let manager =
        HostManager::with_strategy(opts, FakeEngine::new().into_arc(), AdapterStrategy::Managed)
            .unwrap();

    assert!(manager.extra().is_none());
    assert!(manager.get_extra_inventory_groups().is_empty());
}

// ============================================================================
// Legacy Adapter Tests
// ============================================================================

#[test]
fn test_legacy_adapter_lists_host_names() {
    let dir = InventoryDir::new();
    let engine = FakeEngine::new()
        .with_version("distronode 2.3.1")
        .with_listed(&["alpha", "beta"])
        .into_arc();

    let manager =
        HostManager::with_strategy(options(&dir.file("hosts")), engine, AdapterStrategy::Legacy)
            .unwrap();

    assert_eq!(manager.strategy(), AdapterStrategy::Legacy);
    assert_eq!(manager.len(), 2);
    assert!(manager.contains("alpha"));
    assert_eq!(manager.list_groups(), vec!["all", "ungrouped"]);
}

#[test]
fn test_legacy_engine_failure_is_configuration_error() {
    let dir = InventoryDir::new();
    let err = HostManager::with_strategy(
        options(&dir.file("hosts")),
        FakeEngine::new().into_arc(),
        AdapterStrategy::Legacy,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}

// ============================================================================
// Construction Errors
// ============================================================================

#[test]
fn test_missing_inventory_is_usage_error() {
    let err = HostManager::with_strategy(
        Options::default(),
        FakeEngine::new().into_arc(),
        AdapterStrategy::NEWEST,
    )
    .unwrap_err();
    assert!(err.is_usage());
}

#[test]
fn test_nonexistent_inventory_path() {
    let err = HostManager::with_strategy(
        options("/nonexistent/distronode/hosts.yml"),
        FakeEngine::new().into_arc(),
        AdapterStrategy::NEWEST,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Configuration { source_name, .. } if source_name.ends_with("hosts.yml")));
}

// ============================================================================
// Variable Tests
// ============================================================================

#[test]
fn test_host_vars() {
    let (_dir, _engine, manager) = sample_manager();

    let vars = manager.host_vars("web1").unwrap();
    assert_eq!(vars["http_port"], json!(8080));
    assert_eq!(vars["ntp"], json!("pool.ntp.org"));
    assert_eq!(vars["inventory_hostname"], json!("web1"));
    assert_eq!(vars["group_names"], json!(["prod", "web"]));

    let web2 = manager.host_vars("web2").unwrap();
    assert_eq!(web2["http_port"], json!(80));

    assert!(matches!(manager.host_vars("ghost"), Err(Error::HostNotFound(_))));
    assert_eq!(manager.host("db1").unwrap().address(), "10.0.1.1");
}
