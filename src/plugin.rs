//! Test-runner integration.
//!
//! [`Plugin`] is what the runner talks to: it owns the parsed flags, the
//! engine handle and the option resolver, answers the report header,
//! validates parameters before a session starts and expands the
//! `distronode_host`, `distronode_group` and `molecule_scenario` fixtures into
//! parametrizations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::cli::PluginArgs;
use crate::config::{ConfigResolver, EngineDefaults, Options, Overrides};
use crate::dispatcher::ModuleDispatcher;
use crate::engine::{Engine, ProcessEngine};
use crate::error::{Error, Result};
use crate::host_manager::HostManager;
use crate::molecule::{self, DriverRegistry, MoleculeScenario, RunConfig, ScenarioDiscovery, ScenarioItem};
use crate::units;
use crate::version::{self, AdapterStrategy};

/// Fixtures that need a host pattern and an inventory.
pub const OUR_FIXTURES: [&str; 3] = ["distronode_adhoc", "distronode_module", "distronode_facts"];

pub const HOST_FIXTURE: &str = "distronode_host";
pub const GROUP_FIXTURE: &str = "distronode_group";
pub const SCENARIO_FIXTURE: &str = "molecule_scenario";
pub const LOCALHOST_FIXTURE: &str = "localhost";

/// A test asking for fixtures, with its `distronode(...)` marker overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestRequest {
    pub name: String,
    pub fixturenames: Vec<String>,
    pub marker: Option<Overrides>,
}

impl TestRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_fixtures<I, S>(mut self, fixtures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fixturenames = fixtures.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_marker(mut self, marker: Overrides) -> Self {
        self.marker = Some(marker);
        self
    }

    pub fn uses(&self, fixture: &str) -> bool {
        self.fixturenames.iter().any(|f| f == fixture)
    }
}

/// A collected test item as seen by `modify_items`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestItem {
    pub name: String,
    pub fixturenames: Vec<String>,
    /// Fixtures the test suite itself defines
    pub defined: Vec<String>,
}

impl TestItem {
    fn defines(&self, fixture: &str) -> bool {
        self.defined.iter().any(|f| f == fixture)
    }
}

/// One value of a parametrized fixture.
#[derive(Debug, Clone)]
pub enum ParamValue {
    Host(ModuleDispatcher),
    Group(ModuleDispatcher),
    Scenario(MoleculeScenario),
}

/// Values and ids for one fixture.
#[derive(Debug, Clone)]
pub struct Parametrization {
    pub fixture: String,
    pub ids: Vec<String>,
    pub values: Vec<ParamValue>,
}

impl Parametrization {
    fn new(fixture: &str) -> Self {
        Self {
            fixture: fixture.to_string(),
            ids: Vec::new(),
            values: Vec::new(),
        }
    }

    fn push(&mut self, id: impl Into<String>, value: ParamValue) {
        self.ids.push(id.into());
        self.values.push(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The registered plugin.
pub struct Plugin {
    args: PluginArgs,
    engine: Arc<dyn Engine>,
    resolver: ConfigResolver,
    strategy: Option<AdapterStrategy>,
    verbosity: u8,
    root: PathBuf,
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("args", &self.args)
            .field("strategy", &self.strategy)
            .field("verbosity", &self.verbosity)
            .field("root", &self.root)
            .finish()
    }
}

impl Plugin {
    /// Session start: load engine defaults, make the surrounding collection
    /// importable and build the engine with the resulting collections path.
    pub fn configure(args: PluginArgs, verbosity: u8, root: &Path) -> Result<Self> {
        let defaults = EngineDefaults::load()?;

        let roots = if args.unit_inject_only {
            units::inject_only()
        } else {
            units::inject(root)?
                .map(|collection| vec![collection.path])
                .unwrap_or_default()
        };

        let mut engine = ProcessEngine::new().with_verbosity(verbosity);
        if let Some(value) = units::collections_path_value(&roots) {
            debug!(path = %value, "Exporting collections path to engine commands");
            engine = engine.with_env(units::COLLECTIONS_PATH_ENV, value);
        }

        Ok(Self::with_engine(args, Arc::new(engine), defaults)
            .with_verbosity(verbosity)
            .with_root(root))
    }

    /// Plugin over an existing engine, without collection injection.
    pub fn with_engine(args: PluginArgs, engine: Arc<dyn Engine>, defaults: EngineDefaults) -> Self {
        Self {
            args,
            engine,
            resolver: ConfigResolver::new(defaults),
            strategy: None,
            verbosity: 0,
            root: PathBuf::from("."),
        }
    }

    /// Pin the inventory adapter instead of probing the engine version.
    pub fn with_strategy(mut self, strategy: AdapterStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Directory scenarios are collected from.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn args(&self) -> &PluginArgs {
        &self.args
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `distronode: VERSION` for the report header.
    pub fn report_header(&self) -> String {
        let version = version::detect(self.engine.as_ref())
            .map(ToString::to_string)
            .unwrap_or_else(|| "unknown".to_string());
        format!("distronode: {}", version)
    }

    /// The command-line layer with engine defaults filled in.
    pub fn cli_options(&self) -> Options {
        self.args.to_options(self.resolver.defaults())
    }

    /// Host manager for a test: command line, then the request's marker,
    /// then `explicit`.
    pub fn initialize(&self, request: Option<&TestRequest>, explicit: &Overrides) -> Result<HostManager> {
        let options = self.resolve_options(request, explicit)?;
        self.host_manager(options)
    }

    /// The merged option layers for a test, without building anything.
    pub fn resolve_options(&self, request: Option<&TestRequest>, explicit: &Overrides) -> Result<Options> {
        let cli = self.cli_options();
        let marker = request.and_then(|r| r.marker.as_ref());
        self.resolver.resolve(Some(&cli), marker, explicit)
    }

    /// Host manager over already resolved options.
    pub fn host_manager(&self, options: Options) -> Result<HostManager> {
        match self.strategy {
            Some(strategy) => HostManager::with_strategy(options, Arc::clone(&self.engine), strategy),
            None => HostManager::initialize(options, Arc::clone(&self.engine)),
        }
    }

    /// Fail with every missing mandatory parameter.
    pub fn assert_required_parameters(&self) -> Result<()> {
        ConfigResolver::validate(&self.cli_options())
    }

    /// Inspect collected items before the session runs. Parameters are only
    /// validated when some item uses a fixture that needs them.
    pub fn modify_items(&self, items: &[TestItem]) -> Result<()> {
        let mut uses_our_fixtures = false;

        for item in items {
            for fixture in &item.fixturenames {
                if OUR_FIXTURES.contains(&fixture.as_str()) {
                    uses_our_fixtures = true;
                    break;
                }
                if item.defines(fixture) || is_plugin_fixture(fixture) {
                    continue;
                }
                error!("Found {} fixture which seem to have no definition.", fixture);
            }
        }

        if uses_our_fixtures {
            self.assert_required_parameters()?;
        }
        Ok(())
    }

    /// Parametrizations for the fixtures in `fixturenames` this plugin
    /// generates.
    pub fn generate_tests(&self, fixturenames: &[String]) -> Result<Vec<Parametrization>> {
        let wants = |name: &str| fixturenames.iter().any(|f| f == name);
        let mut generated = Vec::new();

        if wants(HOST_FIXTURE) || wants(GROUP_FIXTURE) {
            self.assert_required_parameters()?;
            let manager = self
                .initialize(None, &Overrides::new())
                .map_err(into_usage)?;

            if wants(HOST_FIXTURE) {
                let mut hosts = Parametrization::new(HOST_FIXTURE);
                for name in manager.host_names() {
                    let dispatcher = manager.get(&name).map_err(into_usage)?;
                    hosts.push(name, ParamValue::Host(dispatcher));
                }
                generated.push(hosts);
            }

            if wants(GROUP_FIXTURE) {
                let mut groups = Parametrization::new(GROUP_FIXTURE);
                let names = manager
                    .list_groups()
                    .into_iter()
                    .chain(manager.get_extra_inventory_groups());
                for name in names {
                    let dispatcher = manager.get(&name).map_err(into_usage)?;
                    groups.push(name, ParamValue::Group(dispatcher));
                }
                generated.push(groups);
            }
        }

        if wants(SCENARIO_FIXTURE) {
            let items = self.scenario_items()?;
            if items.is_empty() {
                return Err(Error::NoScenarios(self.root.clone()));
            }
            let mut scenarios = Parametrization::new(SCENARIO_FIXTURE);
            for item in &items {
                scenarios.push(item.test_id.clone(), ParamValue::Scenario(item.as_scenario()));
            }
            generated.push(scenarios);
        }

        Ok(generated)
    }

    /// Scenario items below the root, with unavailable-driver markers when
    /// requested.
    pub fn scenario_items(&self) -> Result<Vec<ScenarioItem>> {
        if self.args.molecule && !molecule::molecule_available() {
            return Err(Error::MoleculeMissing);
        }

        let marker = self.args.molecule_unavailable_driver.clone();
        let registry = match marker {
            Some(_) => DriverRegistry::probe(Path::new("molecule")),
            None => DriverRegistry::unknown(),
        };

        ScenarioDiscovery::new(&self.root)
            .with_registry(registry)
            .with_unavailable_marker(marker)
            .discover()
    }

    /// Settings for running scenario items.
    pub fn run_config(&self) -> Result<RunConfig> {
        let config = RunConfig::from_args(&self.args)?;
        info!(enabled = config.enabled, "Molecule run configuration loaded");
        Ok(config)
    }
}

fn is_plugin_fixture(name: &str) -> bool {
    [HOST_FIXTURE, GROUP_FIXTURE, SCENARIO_FIXTURE, LOCALHOST_FIXTURE].contains(&name)
}

fn into_usage(err: Error) -> Error {
    if err.is_usage() {
        err
    } else {
        Error::usage([err.to_string()])
    }
}
