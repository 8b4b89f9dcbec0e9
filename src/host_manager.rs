//! Host manager: keyed access to inventory hosts and groups.
//!
//! A [`HostManager`] owns one primary inventory tree and, with engines that
//! support it, an independently loaded extra tree. Each tree is a data
//! loader, an inventory manager and a variable manager built in the order
//! the engine generation expects. Lookups by host pattern return a
//! [`ModuleDispatcher`] bound to whichever tree resolved the pattern first.

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Options, MISSING_INVENTORY};
use crate::dispatcher::ModuleDispatcher;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::inventory::{Group, Host, InventoryManager, ALL_GROUP};
use crate::loader::DataLoader;
use crate::vars::VariableManager;
use crate::version::{self, AdapterStrategy};

/// Which inventory tree a dispatcher resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeKind {
    Primary,
    Extra,
}

/// Loader, inventory manager and variable manager for one inventory.
#[derive(Debug)]
pub struct InventoryTree {
    loader: DataLoader,
    inventory_manager: Arc<InventoryManager>,
    variable_manager: VariableManager,
}

impl InventoryTree {
    /// Build a tree from an `inventory` option value.
    fn build(strategy: AdapterStrategy, engine: Arc<dyn Engine>, raw: &str) -> Result<Self> {
        match strategy {
            AdapterStrategy::Legacy => {
                // Variables first, inventory bound afterwards.
                let loader = DataLoader::new(engine, strategy);
                let mut variable_manager = VariableManager::new();
                let inventory_manager =
                    Arc::new(InventoryManager::load(&loader, &[raw.to_string()])?);
                variable_manager.set_inventory(Arc::clone(&inventory_manager));
                Ok(Self {
                    loader,
                    inventory_manager,
                    variable_manager,
                })
            }
            AdapterStrategy::Managed | AdapterStrategy::ManagedWithExtra => {
                let loader = DataLoader::new(engine, strategy);
                let sources = loader.split_sources(raw);
                let inventory_manager = Arc::new(InventoryManager::load(&loader, &sources)?);
                let variable_manager = VariableManager::with_inventory(Arc::clone(&inventory_manager));
                Ok(Self {
                    loader,
                    inventory_manager,
                    variable_manager,
                })
            }
        }
    }

    pub fn loader(&self) -> &DataLoader {
        &self.loader
    }

    pub fn inventory_manager(&self) -> &InventoryManager {
        &self.inventory_manager
    }

    pub fn variable_manager(&self) -> &VariableManager {
        &self.variable_manager
    }
}

/// State shared by a host manager and the dispatchers it hands out.
pub(crate) struct HostManagerInner {
    pub(crate) options: Options,
    pub(crate) strategy: AdapterStrategy,
    pub(crate) engine: Arc<dyn Engine>,
    primary: InventoryTree,
    extra: Option<InventoryTree>,
}

impl HostManagerInner {
    pub(crate) fn tree(&self, kind: TreeKind) -> &InventoryTree {
        match (kind, &self.extra) {
            (TreeKind::Extra, Some(extra)) => extra,
            _ => &self.primary,
        }
    }

    fn trees(&self) -> impl Iterator<Item = (TreeKind, &InventoryTree)> {
        std::iter::once((TreeKind::Primary, &self.primary))
            .chain(self.extra.iter().map(|t| (TreeKind::Extra, t)))
    }
}

/// Keyed access to the hosts and groups of the configured inventories.
#[derive(Clone)]
pub struct HostManager {
    inner: Arc<HostManagerInner>,
}

impl fmt::Debug for HostManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostManager")
            .field("strategy", &self.inner.strategy)
            .field("options", &self.inner.options)
            .field("hosts", &self.len())
            .field("extra", &self.inner.extra.is_some())
            .finish()
    }
}

impl HostManager {
    /// Build a host manager using the strategy of the installed engine.
    pub fn initialize(options: Options, engine: Arc<dyn Engine>) -> Result<Self> {
        let strategy = version::active_strategy(engine.as_ref())?;
        Self::with_strategy(options, engine, strategy)
    }

    /// Build a host manager with an explicit strategy.
    pub fn with_strategy(
        options: Options,
        engine: Arc<dyn Engine>,
        strategy: AdapterStrategy,
    ) -> Result<Self> {
        let inventory = options
            .inventory
            .clone()
            .filter(|i| !i.is_empty())
            .ok_or_else(|| Error::usage([MISSING_INVENTORY]))?;

        let primary = InventoryTree::build(strategy, Arc::clone(&engine), &inventory)?;

        let extra = match options.extra_inventory.as_deref().filter(|i| !i.is_empty()) {
            Some(raw) if strategy.supports_extra_inventory() => {
                Some(InventoryTree::build(strategy, Arc::clone(&engine), raw)?)
            }
            Some(raw) => {
                warn!(
                    extra_inventory = raw,
                    %strategy,
                    "Extra inventory is not supported by this distronode version, ignoring it"
                );
                None
            }
            None => None,
        };

        info!(
            %strategy,
            inventory = %inventory,
            hosts = primary.inventory_manager.inventory().host_count(),
            extra = extra.is_some(),
            "Host manager initialized"
        );

        Ok(Self {
            inner: Arc::new(HostManagerInner {
                options,
                strategy,
                engine,
                primary,
                extra,
            }),
        })
    }

    /// Options this manager was built with
    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Adapter strategy in use
    pub fn strategy(&self) -> AdapterStrategy {
        self.inner.strategy
    }

    pub fn primary(&self) -> &InventoryTree {
        &self.inner.primary
    }

    pub fn extra(&self) -> Option<&InventoryTree> {
        self.inner.extra.as_ref()
    }

    /// Whether `pattern` selects at least one host, or names a group, in
    /// either tree.
    pub fn contains(&self, pattern: &str) -> bool {
        self.lookup(pattern).is_some()
    }

    /// Dispatcher for `pattern`; [`Error::HostNotFound`] when
    /// [`HostManager::contains`] would be false.
    pub fn get(&self, pattern: &str) -> Result<ModuleDispatcher> {
        self.lookup(pattern)
            .ok_or_else(|| Error::HostNotFound(pattern.to_string()))
    }

    /// Attribute-style lookup; [`Error::UnknownAttribute`] when nothing
    /// matches.
    pub fn attr(&self, name: &str) -> Result<ModuleDispatcher> {
        self.lookup(name)
            .ok_or_else(|| Error::UnknownAttribute(name.to_string()))
    }

    /// Dispatcher for `all[start-stop]`. Bounds are inclusive; a missing
    /// start with a stop selects one host counted from the end.
    pub fn slice(&self, start: Option<i64>, stop: Option<i64>) -> Result<ModuleDispatcher> {
        let bound = |b: Option<i64>| b.map(|v| v.to_string()).unwrap_or_default();
        self.get(&format!("{}[{}-{}]", ALL_GROUP, bound(start), bound(stop)))
    }

    fn lookup(&self, pattern: &str) -> Option<ModuleDispatcher> {
        if pattern.trim().is_empty() {
            return None;
        }

        for (kind, tree) in self.inner.trees() {
            let manager = tree.inventory_manager();
            match manager.list_hosts(pattern) {
                Ok(hosts) if !hosts.is_empty() => {
                    return Some(ModuleDispatcher::new(Arc::clone(&self.inner), pattern, kind));
                }
                Ok(_) => {}
                Err(e) => debug!(pattern, error = %e, "Pattern did not resolve"),
            }
            if manager.has_group(pattern) {
                return Some(ModuleDispatcher::new(Arc::clone(&self.inner), pattern, kind));
            }
        }
        None
    }

    /// Host names of both trees followed by explicitly declared groups.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: IndexSet<String> = IndexSet::new();
        for (_, tree) in self.inner.trees() {
            keys.extend(tree.inventory_manager().inventory().host_names().cloned());
        }
        for (_, tree) in self.inner.trees() {
            keys.extend(
                tree.inventory_manager()
                    .inventory()
                    .group_names()
                    .filter(|g| !Group::is_implicit(g))
                    .cloned(),
            );
        }
        keys.into_iter().collect()
    }

    /// Hosts the configured host pattern selects (all hosts when unset),
    /// in resolution order.
    pub fn host_names(&self) -> Vec<String> {
        let pattern = self.inner.options.host_pattern.as_deref().unwrap_or(ALL_GROUP);
        self.primary()
            .inventory_manager()
            .list_hosts(pattern)
            .map(|hosts| hosts.into_iter().map(|h| h.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of hosts in the primary inventory after `--limit`. A limit
    /// that fails to parse counts as matching nothing.
    pub fn len(&self) -> usize {
        self.primary()
            .inventory_manager()
            .get_hosts(ALL_GROUP, self.inner.options.subset.as_deref())
            .map_or(0, |hosts| hosts.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Group names of the primary inventory, sorted
    pub fn list_groups(&self) -> Vec<String> {
        self.primary()
            .inventory_manager()
            .list_groups()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Group names of the extra inventory, sorted; empty without one
    pub fn get_extra_inventory_groups(&self) -> Vec<String> {
        self.extra()
            .map(|tree| {
                tree.inventory_manager()
                    .list_groups()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Exact host lookup in either tree
    pub fn host(&self, name: &str) -> Option<&Host> {
        self.inner
            .trees()
            .find_map(|(_, tree)| tree.inventory_manager().get_host(name))
    }

    /// Merged variables of a host from the first tree that knows it
    pub fn host_vars(&self, name: &str) -> Result<IndexMap<String, Value>> {
        for (_, tree) in self.inner.trees() {
            if tree.inventory_manager().get_host(name).is_some() {
                return tree.variable_manager().get_vars(name);
            }
        }
        Err(Error::HostNotFound(name.to_string()))
    }
}
