//! Per-test fixtures.
//!
//! A [`Fixtures`] value is built for each test request. Nothing touches the
//! inventory until a fixture is asked for, and `module` / `facts` are
//! computed at most once per request.

use once_cell::unsync::OnceCell;
use serde_json::Value;

use crate::config::{ConfigResolver, Overrides};
use crate::dispatcher::{AdHocResult, ModuleDispatcher};
use crate::error::Result;
use crate::host_manager::HostManager;
use crate::plugin::{Plugin, TestRequest};

/// Fixtures available to one test.
#[derive(Debug)]
pub struct Fixtures<'a> {
    plugin: &'a Plugin,
    request: TestRequest,
    module: OnceCell<ModuleDispatcher>,
    facts: OnceCell<AdHocResult>,
}

impl<'a> Fixtures<'a> {
    pub fn new(plugin: &'a Plugin, request: TestRequest) -> Self {
        Self {
            plugin,
            request,
            module: OnceCell::new(),
            facts: OnceCell::new(),
        }
    }

    pub fn request(&self) -> &TestRequest {
        &self.request
    }

    /// `distronode_adhoc`: a host manager built from the command line, the
    /// request's marker and `overrides`.
    pub fn adhoc(&self, overrides: &Overrides) -> Result<HostManager> {
        self.plugin.initialize(Some(&self.request), overrides)
    }

    /// `distronode_module`: dispatcher for the configured host pattern. The
    /// merged options are validated before any host is resolved.
    pub fn module(&self) -> Result<&ModuleDispatcher> {
        self.module.get_or_try_init(|| {
            let options = self.plugin.resolve_options(Some(&self.request), &Overrides::new())?;
            ConfigResolver::validate(&options)?;
            let pattern = options.host_pattern.clone().unwrap_or_default();
            self.plugin.host_manager(options)?.attr(&pattern)
        })
    }

    /// `distronode_facts`: the `setup` module run through [`Fixtures::module`].
    pub fn facts(&self) -> Result<&AdHocResult> {
        self.facts.get_or_try_init(|| self.module()?.setup())
    }

    /// `localhost`: a local-connection dispatcher that needs no command-line
    /// parameters.
    pub fn localhost(&self) -> Result<ModuleDispatcher> {
        let mut overrides = Overrides::new();
        overrides.insert("inventory".into(), Value::from("localhost,"));
        overrides.insert("connection".into(), Value::from("local"));
        overrides.insert("host_pattern".into(), Value::from("localhost"));
        self.adhoc(&overrides)?.attr("localhost")
    }
}
