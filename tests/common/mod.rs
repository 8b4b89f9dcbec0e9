//! Shared test utilities for the distronode-test suite.
//!
//! This module provides:
//! - A canned [`Engine`] implementation recording ad-hoc requests
//! - Sample inventory dumps and engine output builders
//! - Temporary inventory and scenario trees
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tempfile::TempDir;

use distronode_test::config::Options;
use distronode_test::engine::{AdHocRequest, CommandOutput, Engine};
use distronode_test::error::{Error, Result};
use distronode_test::host_manager::HostManager;
use distronode_test::version::AdapterStrategy;

// ============================================================================
// Fake Engine
// ============================================================================

/// Engine answering from canned data.
#[derive(Debug)]
pub struct FakeEngine {
    version: String,
    dumps: HashMap<String, Value>,
    default_dump: Value,
    listed: Vec<String>,
    adhoc_stdout: String,
    adhoc_exit: i32,
    requests: Mutex<Vec<AdHocRequest>>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self {
            version: "distronode [core 2.15.3]".to_string(),
            dumps: HashMap::new(),
            default_dump: sample_dump(),
            listed: Vec::new(),
            adhoc_stdout: String::new(),
            adhoc_exit: 0,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    /// Dump returned for one source path.
    pub fn with_dump(mut self, source: &Path, dump: Value) -> Self {
        self.dumps.insert(source.display().to_string(), dump);
        self
    }

    /// Dump returned for sources without a specific one.
    pub fn with_default_dump(mut self, dump: Value) -> Self {
        self.default_dump = dump;
        self
    }

    /// Host names returned by `--list-hosts`.
    pub fn with_listed(mut self, hosts: &[&str]) -> Self {
        self.listed = hosts.iter().map(|h| h.to_string()).collect();
        self
    }

    pub fn with_adhoc(mut self, stdout: impl Into<String>, exit_code: i32) -> Self {
        self.adhoc_stdout = stdout.into();
        self.adhoc_exit = exit_code;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Ad-hoc requests received so far.
    pub fn requests(&self) -> Vec<AdHocRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Engine for FakeEngine {
    fn version(&self) -> Result<String> {
        Ok(self.version.clone())
    }

    fn inventory_dump(&self, source: &str) -> Result<Value> {
        Ok(self
            .dumps
            .get(source)
            .cloned()
            .unwrap_or_else(|| self.default_dump.clone()))
    }

    fn list_hosts(&self, source: &str, _pattern: &str) -> Result<Vec<String>> {
        if self.listed.is_empty() {
            return Err(Error::engine(
                format!("distronode all -i {} --list-hosts", source),
                1,
                "no hosts listed",
            ));
        }
        Ok(self.listed.clone())
    }

    fn run_adhoc(&self, request: &AdHocRequest) -> Result<CommandOutput> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(CommandOutput {
            command: format!("distronode {}", request.to_args().join(" ")),
            exit_code: self.adhoc_exit,
            stdout: self.adhoc_stdout.clone(),
            stderr: String::new(),
        })
    }
}

// ============================================================================
// Inventory Fixtures
// ============================================================================

/// Six hosts: web1-3, db1-2 and localhost, with `prod` overlapping both tiers.
pub fn sample_dump() -> Value {
    json!({
        "_meta": {
            "hostvars": {
                "web1": {"distronode_host": "10.0.0.1", "http_port": 8080},
                "db1": {"distronode_host": "10.0.1.1"}
            }
        },
        "all": {"children": ["ungrouped", "web", "db"], "vars": {"ntp": "pool.ntp.org"}},
        "web": {"hosts": ["web1", "web2", "web3"], "vars": {"http_port": 80}},
        "db": {"hosts": ["db1", "db2"]},
        "prod": {"hosts": ["web1", "db1"]},
        "ungrouped": {"hosts": ["localhost"]}
    })
}

/// Two hosts in a `cache` group, for the extra inventory.
pub fn extra_dump() -> Value {
    json!({
        "all": {"children": ["ungrouped", "cache"]},
        "cache": {"hosts": ["redis1", "redis2"]},
        "ungrouped": {"hosts": []}
    })
}

/// Temporary directory holding inventory files the engine is asked about.
pub struct InventoryDir {
    pub dir: TempDir,
}

impl InventoryDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    /// Create an (opaque) inventory file and return its path as a string.
    pub fn file(&self, name: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, "# read through the engine\n").unwrap();
        path.display().to_string()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn options(inventory: &str) -> Options {
    Options {
        inventory: Some(inventory.to_string()),
        ..Options::default()
    }
}

/// Host manager over the sample dump using the newest adapter.
pub fn sample_manager() -> (InventoryDir, Arc<FakeEngine>, HostManager) {
    sample_manager_with(FakeEngine::new())
}

pub fn sample_manager_with(engine: FakeEngine) -> (InventoryDir, Arc<FakeEngine>, HostManager) {
    let dir = InventoryDir::new();
    let inventory = dir.file("hosts.yml");
    let engine = engine.into_arc();
    let manager = HostManager::with_strategy(
        options(&inventory),
        engine.clone(),
        AdapterStrategy::ManagedWithExtra,
    )
    .unwrap();
    (dir, engine, manager)
}

// ============================================================================
// Engine Output Builders
// ============================================================================

/// Stdout of the `json` callback for one task.
pub fn json_output(hosts: &[(&str, Value)]) -> String {
    let mut results = serde_json::Map::new();
    for (host, payload) in hosts {
        results.insert(host.to_string(), payload.clone());
    }
    json!({
        "plays": [{
            "play": {"name": "Distronode Ad-Hoc"},
            "tasks": [{"task": {"name": "adhoc"}, "hosts": results}]
        }],
        "stats": {}
    })
    .to_string()
}

// ============================================================================
// Scenario Trees
// ============================================================================

/// Write `PROJECT/molecule/NAME/molecule.yml` below `root`.
pub fn write_scenario(root: &Path, project: &str, name: &str, body: &str) -> PathBuf {
    let dir = root.join(project).join("molecule").join(name);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("molecule.yml");
    std::fs::write(&path, body).unwrap();
    path
}
