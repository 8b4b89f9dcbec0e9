//! Pattern queries over a loaded inventory.

use indexmap::IndexMap;
use std::path::Path;
use tracing::{debug, trace};

use super::pattern::{matches_host_names, order_patterns, split_host_pattern, split_subscript, NameMatcher};
use super::{Group, Host, Inventory, InventoryError, InventoryResult};
use crate::error::Result;
use crate::loader::DataLoader;

/// An inventory plus the sources it was loaded from, answering host pattern
/// queries.
#[derive(Debug, Clone)]
pub struct InventoryManager {
    inventory: Inventory,
    sources: Vec<String>,
}

impl InventoryManager {
    /// Wrap an already loaded inventory.
    pub fn new(inventory: Inventory) -> Self {
        let sources = inventory.sources().to_vec();
        Self { inventory, sources }
    }

    /// Load and merge every source through `loader`.
    pub fn load(loader: &DataLoader, sources: &[String]) -> Result<Self> {
        let mut inventory = Inventory::new();
        for source in sources {
            let loaded = loader.load_inventory(source)?;
            debug!(
                source = %source,
                hosts = loaded.host_count(),
                groups = loaded.group_count(),
                "Loaded inventory source"
            );
            inventory.merge(loaded);
        }
        Ok(Self {
            inventory,
            sources: sources.to_vec(),
        })
    }

    /// The underlying inventory
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Sources as they are passed to the engine
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Look up a host by exact name
    pub fn get_host(&self, name: &str) -> Option<&Host> {
        self.inventory.get_host(name)
    }

    /// Whether a group of exactly this name exists
    pub fn has_group(&self, name: &str) -> bool {
        self.inventory.get_group(name).is_some()
    }

    /// All group names, sorted
    pub fn list_groups(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inventory.group_names().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Hosts selected by `pattern`, ignoring any limit. An empty pattern
    /// selects `all`.
    pub fn list_hosts(&self, pattern: &str) -> InventoryResult<Vec<&Host>> {
        self.get_hosts(pattern, None)
    }

    /// Hosts selected by `pattern`, restricted to those selected by `limit`.
    ///
    /// `limit` uses the same grammar; a term of the form `@path` reads one
    /// pattern per line from that file.
    pub fn get_hosts(&self, pattern: &str, limit: Option<&str>) -> InventoryResult<Vec<&Host>> {
        let pattern = if pattern.trim().is_empty() { "all" } else { pattern };
        let mut hosts = self.evaluate_patterns(split_host_pattern(pattern))?;

        if let Some(limit) = limit.filter(|l| !l.trim().is_empty()) {
            let subset = self.evaluate_patterns(expand_limit(limit)?)?;
            hosts.retain(|name, _| subset.contains_key(name));
        }

        trace!(pattern, count = hosts.len(), "Resolved host pattern");
        Ok(hosts.into_values().collect())
    }

    fn evaluate_patterns(&self, terms: Vec<String>) -> InventoryResult<IndexMap<&str, &Host>> {
        let mut hosts: IndexMap<&str, &Host> = IndexMap::new();

        for term in order_patterns(terms) {
            if let Some(expr) = term.strip_prefix('!') {
                let that = self.match_one_pattern(expr)?;
                hosts.retain(|name, _| !that.iter().any(|h| h.name == *name));
            } else if let Some(expr) = term.strip_prefix('&') {
                let that = self.match_one_pattern(expr)?;
                hosts.retain(|name, _| that.iter().any(|h| h.name == *name));
            } else {
                for host in self.match_one_pattern(&term)? {
                    hosts.entry(host.name.as_str()).or_insert(host);
                }
            }
        }

        Ok(hosts)
    }

    fn match_one_pattern(&self, term: &str) -> InventoryResult<Vec<&Host>> {
        let (expr, subscript) = split_subscript(term);
        let hosts = self.enumerate_matches(expr)?;
        match subscript {
            Some(subscript) => subscript
                .apply(&hosts)
                .ok_or_else(|| InventoryError::SubscriptOutOfRange(term.to_string())),
            None => Ok(hosts),
        }
    }

    /// Hosts of every matching group, then matching host names when no group
    /// matched or the expression is a glob or regex. May contain duplicates;
    /// subscripts index into this list as-is.
    fn enumerate_matches(&self, expr: &str) -> InventoryResult<Vec<&Host>> {
        let matcher = NameMatcher::compile(expr)?;
        let mut results = Vec::new();

        let groups: Vec<&Group> = self
            .inventory
            .groups()
            .filter(|g| matcher.is_match(&g.name))
            .collect();
        for group in &groups {
            results.extend(self.inventory.group_hosts(&group.name));
        }

        if groups.is_empty() || matches_host_names(expr) {
            results.extend(self.inventory.hosts().filter(|h| matcher.is_match(&h.name)));
        }

        Ok(results)
    }
}

fn expand_limit(limit: &str) -> InventoryResult<Vec<String>> {
    let mut terms = Vec::new();
    for term in split_host_pattern(limit) {
        match term.strip_prefix('@') {
            Some(path) => {
                let content = std::fs::read_to_string(Path::new(path))?;
                terms.extend(
                    content
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(str::to_string),
                );
            }
            None => terms.push(term),
        }
    }
    Ok(terms)
}
