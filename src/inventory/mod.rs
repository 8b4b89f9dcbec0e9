//! Inventory model for distronode-test.
//!
//! The engine owns the inventory formats. This module holds what the engine
//! reports back about them:
//! - hosts and groups in declaration order
//! - the group hierarchy and the variables attached at each level
//! - host-list sources (`"web1,web2,"`), which are simple enough to read
//!   without asking the engine
//!
//! [`InventoryManager`] answers host pattern queries over one or more loaded
//! inventories using the engine's pattern grammar (see [`pattern`]).

pub mod group;
pub mod host;
pub mod manager;
pub mod pattern;

pub use group::{Group, ALL_GROUP, UNGROUPED_GROUP};
pub use host::Host;
pub use manager::InventoryManager;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;

/// Errors that can occur during inventory operations
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid inventory dump: {0}")]
    InvalidDump(String),

    #[error("invalid host pattern: {0}")]
    InvalidPattern(String),

    #[error("No hosts matched the subscripted pattern '{0}'")]
    SubscriptOutOfRange(String),
}

/// Result type for inventory operations
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Hosts and groups loaded from one or more inventory sources
#[derive(Debug, Clone)]
pub struct Inventory {
    /// All hosts indexed by name, in first-seen order
    hosts: IndexMap<String, Host>,

    /// All groups indexed by name, in first-seen order
    groups: IndexMap<String, Group>,

    /// Sources this inventory was built from
    sources: Vec<String>,
}

impl Default for Inventory {
    fn default() -> Self {
        Self::new()
    }
}

impl Inventory {
    /// Create a new empty inventory with default groups
    pub fn new() -> Self {
        let mut inventory = Self {
            hosts: IndexMap::new(),
            groups: IndexMap::new(),
            sources: Vec::new(),
        };

        inventory.groups.insert(ALL_GROUP.to_string(), Group::all());
        inventory
            .groups
            .insert(UNGROUPED_GROUP.to_string(), Group::ungrouped());

        inventory
    }

    /// Whether a source string is a comma separated host list rather than a
    /// path. Matches the engine: a comma is present and no such path exists.
    pub fn is_host_list(source: &str) -> bool {
        source.contains(',') && !std::path::Path::new(source).exists()
    }

    /// Build an inventory from a host-list source such as `"web1,web2:2222,"`.
    pub fn from_host_list(source: &str) -> Self {
        let mut inventory = Self::new();
        inventory.sources.push(source.to_string());

        for entry in source.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let host = Host::from_host_list_entry(entry);
            inventory.add_host(host, None);
        }

        inventory.reconcile();
        inventory
    }

    /// Build an inventory from bare host names, all ungrouped.
    pub fn from_host_names<I, S>(source: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inventory = Self::new();
        inventory.sources.push(source.to_string());
        for name in names {
            inventory.add_host(Host::new(name), None);
        }
        inventory.reconcile();
        inventory
    }

    /// Build an inventory from the engine's `--list` JSON dump:
    ///
    /// ```json
    /// {
    ///   "_meta": {"hostvars": {"web1": {"distronode_host": "10.0.0.1"}}},
    ///   "all": {"children": ["ungrouped", "web"]},
    ///   "web": {"hosts": ["web1"], "vars": {"port": 80}}
    /// }
    /// ```
    pub fn from_dump(source: &str, data: &Value) -> InventoryResult<Self> {
        let map = data
            .as_object()
            .ok_or_else(|| InventoryError::InvalidDump("expected a JSON object".to_string()))?;

        let mut inventory = Self::new();
        inventory.sources.push(source.to_string());

        // First pass: create groups
        for key in map.keys().filter(|k| *k != "_meta") {
            inventory
                .groups
                .entry(key.clone())
                .or_insert_with(|| Group::new(key.clone()));
        }

        // Second pass: populate groups and hosts
        for (key, value) in map.iter().filter(|(k, _)| *k != "_meta") {
            let (hosts, children, vars) = match value {
                Value::Object(group_data) => (
                    string_list(group_data.get("hosts")),
                    string_list(group_data.get("children")),
                    group_data.get("vars").and_then(Value::as_object),
                ),
                Value::Array(_) => (string_list(Some(value)), Vec::new(), None),
                _ => {
                    return Err(InventoryError::InvalidDump(format!(
                        "group '{}' must be an object or a list",
                        key
                    )))
                }
            };

            for child in children {
                inventory.add_child(key, &child);
            }
            for host in hosts {
                inventory.add_host(Host::new(host), Some(key));
            }
            if let (Some(vars), Some(group)) = (vars, inventory.groups.get_mut(key)) {
                for (var_key, var_value) in vars {
                    group.set_var(var_key.clone(), var_value.clone());
                }
            }
        }

        // Apply host variables from _meta
        if let Some(hostvars) = map
            .get("_meta")
            .and_then(|meta| meta.get("hostvars"))
            .and_then(Value::as_object)
        {
            for (host_name, vars) in hostvars {
                let Some(vars) = vars.as_object() else { continue };
                if let Some(host) = inventory.hosts.get_mut(host_name) {
                    for (var_key, var_value) in vars {
                        host.set_var(var_key.clone(), var_value.clone());
                    }
                }
            }
        }

        inventory.reconcile();
        Ok(inventory)
    }

    /// Fold another inventory into this one. Hosts and groups already present
    /// keep their position; variables from `other` win.
    pub fn merge(&mut self, other: Inventory) {
        for (name, host) in other.hosts {
            match self.hosts.get_mut(&name) {
                Some(existing) => {
                    existing.merge_vars(&host.vars);
                    existing.groups.extend(host.groups);
                }
                None => {
                    self.hosts.insert(name, host);
                }
            }
        }
        for (name, group) in other.groups {
            match self.groups.get_mut(&name) {
                Some(existing) => existing.merge(&group),
                None => {
                    self.groups.insert(name, group);
                }
            }
        }
        self.sources.extend(other.sources);
        self.reconcile();
    }

    /// Add a host, optionally as a direct member of `group`.
    pub fn add_host(&mut self, host: Host, group: Option<&str>) {
        let name = host.name.clone();
        let entry = self.hosts.entry(name.clone()).or_insert(host);
        entry.add_to_group(ALL_GROUP);
        if let Some(group_name) = group.filter(|g| *g != ALL_GROUP) {
            entry.add_to_group(group_name);
            self.groups
                .entry(group_name.to_string())
                .or_insert_with(|| Group::new(group_name))
                .add_host(name.clone());
        }
        if let Some(all) = self.groups.get_mut(ALL_GROUP) {
            all.add_host(name);
        }
    }

    /// Declare `child` as a child group of `parent`, creating both if needed.
    pub fn add_child(&mut self, parent: &str, child: &str) {
        self.groups
            .entry(parent.to_string())
            .or_insert_with(|| Group::new(parent))
            .add_child(child);
        self.groups
            .entry(child.to_string())
            .or_insert_with(|| Group::new(child))
            .add_parent(parent);
    }

    /// Compute parents, attach top-level groups to `all` and move hosts that
    /// belong to nothing else into `ungrouped`.
    fn reconcile(&mut self) {
        let edges: Vec<(String, String)> = self
            .groups
            .values()
            .flat_map(|g| g.children.iter().map(move |c| (g.name.clone(), c.clone())))
            .collect();
        for (parent, child) in edges {
            if let Some(group) = self.groups.get_mut(&child) {
                group.add_parent(parent);
            }
        }

        let orphans: Vec<String> = self
            .groups
            .values()
            .filter(|g| g.name != ALL_GROUP && g.parents.is_empty())
            .map(|g| g.name.clone())
            .collect();
        for name in orphans {
            self.add_child(ALL_GROUP, &name);
        }

        let ungrouped: Vec<String> = self
            .hosts
            .values()
            .filter(|h| h.groups.iter().all(|g| g == ALL_GROUP || g == UNGROUPED_GROUP))
            .map(|h| h.name.clone())
            .collect();
        for name in ungrouped {
            if let Some(host) = self.hosts.get_mut(&name) {
                host.add_to_group(UNGROUPED_GROUP);
            }
            if let Some(group) = self.groups.get_mut(UNGROUPED_GROUP) {
                group.add_host(name);
            }
        }
    }

    /// Get a host by name
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Get a group by name
    pub fn get_group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Get all hosts
    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    /// Get all groups
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Get all host names
    pub fn host_names(&self) -> impl Iterator<Item = &String> {
        self.hosts.keys()
    }

    /// Get all group names
    pub fn group_names(&self) -> impl Iterator<Item = &String> {
        self.groups.keys()
    }

    /// Sources this inventory was loaded from
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// `name` and every group below it, depth first in declaration order.
    pub fn descendants(&self, name: &str) -> Vec<&Group> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.collect_descendants(name, &mut visited, &mut out);
        out
    }

    fn collect_descendants<'a>(
        &'a self,
        name: &str,
        visited: &mut HashSet<String>,
        out: &mut Vec<&'a Group>,
    ) {
        if !visited.insert(name.to_string()) {
            return;
        }
        let Some(group) = self.groups.get(name) else { return };
        out.push(group);
        for child in &group.children {
            self.collect_descendants(child, visited, out);
        }
    }

    /// Hosts of a group including those of its child groups. `all` yields
    /// every host in inventory order.
    pub fn group_hosts(&self, name: &str) -> Vec<&Host> {
        if name == ALL_GROUP {
            return self.hosts.values().collect();
        }

        let mut names: IndexSet<&str> = IndexSet::new();
        for group in self.descendants(name) {
            names.extend(group.hosts.iter().map(String::as_str));
        }
        names
            .into_iter()
            .filter_map(|n| self.hosts.get(n))
            .collect()
    }

    /// Every group containing `host`, directly or through a child group.
    pub fn host_groups(&self, host: &Host) -> Vec<&Group> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<&str> = host.groups.iter().map(String::as_str).collect();

        while let Some(name) = stack.pop() {
            if !visited.insert(name) {
                continue;
            }
            if let Some(group) = self.groups.get(name) {
                out.push(group);
                stack.extend(group.parents.iter().map(String::as_str));
            }
        }
        out
    }

    /// Distance of a group from `all` along the longest parent chain.
    pub fn group_depth(&self, name: &str) -> usize {
        fn depth(inv: &Inventory, name: &str, seen: &mut Vec<String>) -> usize {
            if name == ALL_GROUP || seen.iter().any(|s| s == name) {
                return 0;
            }
            seen.push(name.to_string());
            let d = inv
                .groups
                .get(name)
                .map(|g| g.parents.iter().map(|p| depth(inv, p, seen)).max().unwrap_or(0))
                .unwrap_or(0);
            seen.pop();
            d + 1
        }
        depth(self, name, &mut Vec::new())
    }

    /// Count total hosts
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Count total groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl std::fmt::Display for Inventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Inventory ({} hosts, {} groups)", self.hosts.len(), self.groups.len())?;

        for group in self.groups.values() {
            if group.hosts.is_empty() && group.children.is_empty() {
                continue;
            }
            writeln!(f, "  [{}]", group.name)?;
            for host_name in &group.hosts {
                writeln!(f, "    {}", host_name)?;
            }
        }

        Ok(())
    }
}
