//! Host variable resolution.
//!
//! Variables are merged from the least to the most specific level: `all`,
//! then groups ordered by depth (ties broken by name), then the host itself,
//! then extra variables. Magic variables describing the host's place in the
//! inventory are added last but below extra variables.

use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::inventory::{Group, InventoryManager};

/// Merged variable view over an inventory.
#[derive(Debug, Clone, Default)]
pub struct VariableManager {
    inventory: Option<Arc<InventoryManager>>,
    extra_vars: IndexMap<String, Value>,
}

impl VariableManager {
    /// A manager with no inventory bound yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A manager bound to `inventory` from the start.
    pub fn with_inventory(inventory: Arc<InventoryManager>) -> Self {
        Self {
            inventory: Some(inventory),
            extra_vars: IndexMap::new(),
        }
    }

    /// Bind (or rebind) the inventory.
    pub fn set_inventory(&mut self, inventory: Arc<InventoryManager>) {
        self.inventory = Some(inventory);
    }

    pub fn inventory(&self) -> Option<&Arc<InventoryManager>> {
        self.inventory.as_ref()
    }

    /// Variables that override everything else.
    pub fn set_extra_vars(&mut self, vars: IndexMap<String, Value>) {
        self.extra_vars = vars;
    }

    pub fn extra_vars(&self) -> &IndexMap<String, Value> {
        &self.extra_vars
    }

    /// Fully merged variables for one host.
    pub fn get_vars(&self, host_name: &str) -> Result<IndexMap<String, Value>> {
        let manager = self.inventory.as_ref().ok_or_else(|| Error::Other {
            message: "no inventory bound to the variable manager".to_string(),
            source: None,
        })?;
        let inventory = manager.inventory();
        let host = inventory
            .get_host(host_name)
            .ok_or_else(|| Error::HostNotFound(host_name.to_string()))?;

        let mut groups: Vec<&Group> = inventory.host_groups(host);
        groups.sort_by(|a, b| {
            inventory
                .group_depth(&a.name)
                .cmp(&inventory.group_depth(&b.name))
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut vars = IndexMap::new();
        for group in &groups {
            for (key, value) in &group.vars {
                vars.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in &host.vars {
            vars.insert(key.clone(), value.clone());
        }

        vars.insert("inventory_hostname".to_string(), Value::from(host.name.clone()));
        vars.insert(
            "inventory_hostname_short".to_string(),
            Value::from(host.name.split('.').next().unwrap_or(&host.name)),
        );

        let mut group_names: Vec<&str> = groups
            .iter()
            .map(|g| g.name.as_str())
            .filter(|name| !Group::is_implicit(name))
            .collect();
        group_names.sort_unstable();
        vars.insert("group_names".to_string(), Value::from(group_names));
        vars.insert("groups".to_string(), groups_var(manager));

        for (key, value) in &self.extra_vars {
            vars.insert(key.clone(), value.clone());
        }

        Ok(vars)
    }
}

/// `groups` magic variable: every group mapped to its host names.
fn groups_var(manager: &InventoryManager) -> Value {
    let inventory = manager.inventory();
    let map: serde_json::Map<String, Value> = inventory
        .groups()
        .map(|g| {
            let hosts: Vec<Value> = inventory
                .group_hosts(&g.name)
                .iter()
                .map(|h| Value::from(h.name.clone()))
                .collect();
            (g.name.clone(), Value::Array(hosts))
        })
        .collect();
    Value::Object(map)
}
