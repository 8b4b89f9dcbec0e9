//! Inventory source loading.
//!
//! A [`DataLoader`] turns one inventory source string into an
//! [`Inventory`]. Host lists are read directly; file and directory sources
//! are handed to the engine, in whichever form the active
//! [`AdapterStrategy`] supports.

use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::version::AdapterStrategy;

/// Reads inventory sources through the engine.
#[derive(Debug, Clone)]
pub struct DataLoader {
    engine: Arc<dyn Engine>,
    strategy: AdapterStrategy,
}

impl DataLoader {
    pub fn new(engine: Arc<dyn Engine>, strategy: AdapterStrategy) -> Self {
        Self { engine, strategy }
    }

    pub fn strategy(&self) -> AdapterStrategy {
        self.strategy
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Split an `inventory` option value into sources.
    ///
    /// Strategies that accept several sources split a comma separated value
    /// when every element is an existing path; anything else is one source
    /// (usually a host list).
    pub fn split_sources(&self, raw: &str) -> Vec<String> {
        if self.strategy.supports_multiple_sources() && raw.contains(',') {
            let parts: Vec<&str> = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            if parts.len() > 1 && parts.iter().all(|p| Path::new(p).exists()) {
                return parts.into_iter().map(str::to_string).collect();
            }
        }
        vec![raw.to_string()]
    }

    /// Load one source.
    pub fn load_inventory(&self, source: &str) -> Result<Inventory> {
        if Inventory::is_host_list(source) {
            debug!(source, "Reading host list source");
            return Ok(Inventory::from_host_list(source));
        }

        if !Path::new(source).exists() {
            return Err(Error::configuration(source, "no such file or directory"));
        }

        match self.strategy {
            AdapterStrategy::Legacy => {
                let names = self
                    .engine
                    .list_hosts(source, "all")
                    .map_err(|e| Error::configuration(source, e.to_string()))?;
                Ok(Inventory::from_host_names(source, names))
            }
            AdapterStrategy::Managed | AdapterStrategy::ManagedWithExtra => {
                let dump = self
                    .engine
                    .inventory_dump(source)
                    .map_err(|e| Error::configuration(source, e.to_string()))?;
                Inventory::from_dump(source, &dump)
                    .map_err(|e| Error::configuration(source, e.to_string()))
            }
        }
    }
}
