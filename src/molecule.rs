//! Molecule scenario discovery and execution.
//!
//! Every `molecule.yml` below the collection root becomes a [`ScenarioItem`]
//! carrying the markers its descriptor asks for. Running an item shells out
//! to `molecule test -s NAME` from the project directory (two levels above
//! the scenario) and streams the merged output to the caller.

use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cli::PluginArgs;
use crate::error::{Error, Result};

/// Scenario descriptor file name.
pub const DESCRIPTOR_FILE: &str = "molecule.yml";

/// Driver recorded for scenarios that do not name one.
pub const NO_DRIVER: &str = "no_driver";

/// Marker every scenario carries.
pub const MOLECULE_MARKER: &str = "molecule";

/// Extra arguments appended to every scenario run.
pub const MOLECULE_OPTS_ENV: &str = "MOLECULE_OPTS";

/// Environment variable prefixes worth showing in the report header.
pub const REPORT_ENV_PREFIXES: [&str; 7] = [
    "DISTRONODE",
    "MOLECULE",
    "DOCKER",
    "PODMAN",
    "VAGRANT",
    "VIRSH",
    "ZUUL",
];

const XFAIL_REASON: &str = "Marked as broken by scenario configuration.";
const SKIP_REASON: &str = "Disabled by scenario configuration.";

/// `molecule` is on the `PATH`.
pub fn molecule_available() -> bool {
    which::which("molecule").is_ok()
}

// ============================================================================
// Descriptor
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct Descriptor {
    #[serde(default)]
    driver: Option<DriverSection>,
    #[serde(default)]
    markers: Vec<String>,
    #[serde(default)]
    platforms: Vec<Platform>,
}

#[derive(Debug, Default, Deserialize)]
struct DriverSection {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    name: String,
}

impl Descriptor {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let invalid = |message: String| Error::Descriptor {
            path: path.to_path_buf(),
            message,
        };

        let value: serde_yaml::Value =
            serde_yaml::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value).map_err(|e| invalid(e.to_string()))
    }

    fn driver(&self) -> String {
        self.driver
            .as_ref()
            .and_then(|d| d.name.clone())
            .unwrap_or_else(|| NO_DRIVER.to_string())
    }
}

// ============================================================================
// Markers
// ============================================================================

/// A marker attached to a scenario item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub name: String,
    pub reason: Option<String>,
}

impl Marker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: None,
        }
    }

    pub fn xfail() -> Self {
        Self {
            name: "xfail".to_string(),
            reason: Some(XFAIL_REASON.to_string()),
        }
    }

    pub fn skip() -> Self {
        Self {
            name: "skip".to_string(),
            reason: Some(SKIP_REASON.to_string()),
        }
    }
}

/// Drivers molecule reports as installed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverRegistry {
    known: Option<IndexSet<String>>,
}

impl DriverRegistry {
    /// Registry listing exactly `drivers`.
    pub fn from_drivers<I, S>(drivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: Some(drivers.into_iter().map(Into::into).collect()),
        }
    }

    /// Registry that treats every driver as available.
    pub fn unknown() -> Self {
        Self { known: None }
    }

    /// Ask `molecule drivers --format plain` which drivers exist.
    pub fn probe(molecule: &Path) -> Self {
        let output = Command::new(molecule)
            .args(["drivers", "--format", "plain"])
            .stdin(Stdio::null())
            .output();

        match output {
            Ok(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let drivers: Vec<&str> = stdout
                    .lines()
                    .filter_map(|line| line.split_whitespace().next())
                    .collect();
                debug!(?drivers, "Probed molecule drivers");
                Self::from_drivers(drivers)
            }
            Ok(output) => {
                warn!(
                    exit_code = output.status.code().unwrap_or(-1),
                    "molecule drivers failed, assuming every driver is available"
                );
                Self::unknown()
            }
            Err(e) => {
                warn!(error = %e, "Unable to list molecule drivers, assuming every driver is available");
                Self::unknown()
            }
        }
    }

    /// Scenarios without a driver are always runnable.
    pub fn is_available(&self, driver: &str) -> bool {
        if driver == NO_DRIVER {
            return true;
        }
        self.known.as_ref().map_or(true, |known| known.contains(driver))
    }

    /// Known driver names; empty for an unknown registry.
    pub fn drivers(&self) -> Vec<&str> {
        self.known
            .iter()
            .flat_map(|known| known.iter().map(String::as_str))
            .collect()
    }
}

// ============================================================================
// Discovery
// ============================================================================

/// Finds scenario descriptors below a root directory.
#[derive(Debug, Clone)]
pub struct ScenarioDiscovery {
    root: PathBuf,
    registry: DriverRegistry,
    unavailable_marker: Option<String>,
}

impl ScenarioDiscovery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registry: DriverRegistry::unknown(),
            unavailable_marker: None,
        }
    }

    pub fn with_registry(mut self, registry: DriverRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Marker added to scenarios whose driver is not available.
    pub fn with_unavailable_marker(mut self, marker: Option<String>) -> Self {
        self.unavailable_marker = marker.filter(|m| !m.is_empty());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scenario items sorted by descriptor path. Git-ignored descriptors are
    /// dropped when git can tell.
    pub fn discover(&self) -> Result<Vec<ScenarioItem>> {
        let root = self
            .root
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());

        let mut candidates = Self::candidates(&root);
        let ignored = git_ignored(&root, &candidates);
        if !ignored.is_empty() {
            debug!(count = ignored.len(), "Dropping git-ignored scenarios");
            candidates.retain(|path| !ignored.contains(path));
        }

        let items = candidates
            .iter()
            .map(|path| ScenarioItem::load(path, &self.registry, self.unavailable_marker.as_deref()))
            .collect::<Result<Vec<_>>>()?;

        info!(root = %root.display(), scenarios = items.len(), "Collected molecule scenarios");
        Ok(items)
    }

    fn candidates(root: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.file_name() != ".git")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == DESCRIPTOR_FILE)
            .map(|entry| entry.into_path())
            .collect();
        found.sort();
        found
    }
}

/// Paths among `candidates` that `git check-ignore` reports. Missing git or
/// a directory outside a repository yields an empty set.
fn git_ignored(root: &Path, candidates: &[PathBuf]) -> HashSet<PathBuf> {
    if candidates.is_empty() {
        return HashSet::new();
    }

    let output = Command::new("git")
        .arg("check-ignore")
        .args(candidates)
        .current_dir(root)
        .stdin(Stdio::null())
        .output();

    match output {
        // Exit 1 means nothing is ignored; 128 means not a repository.
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(PathBuf::from)
            .collect(),
        Ok(_) => HashSet::new(),
        Err(e) => {
            debug!(error = %e, "git check-ignore unavailable");
            HashSet::new()
        }
    }
}

// ============================================================================
// Items
// ============================================================================

/// One collected scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioItem {
    pub descriptor: PathBuf,
    pub name: String,
    pub project_dir: PathBuf,
    pub test_id: String,
    pub driver: String,
    pub platforms: Vec<String>,
    pub markers: Vec<Marker>,
    /// Marker added because the driver is not installed
    pub unavailable_marker: Option<String>,
}

impl ScenarioItem {
    /// Build an item from a descriptor path.
    pub fn load(
        descriptor: &Path,
        registry: &DriverRegistry,
        unavailable_marker: Option<&str>,
    ) -> Result<Self> {
        let data = Descriptor::load(descriptor)?;

        let scenario_dir = descriptor.parent().unwrap_or(Path::new("."));
        let name = file_name(scenario_dir);
        let project_dir = scenario_dir
            .parent()
            .and_then(Path::parent)
            .unwrap_or(scenario_dir)
            .to_path_buf();
        let test_id = format!("{}-{}", file_name(&project_dir), name);

        let driver = data.driver();
        let platforms: Vec<String> = data.platforms.iter().map(|p| p.name.clone()).collect();

        let mut markers = vec![Marker::new(driver.as_str())];
        if data.markers.iter().any(|m| m == "xfail") {
            markers.push(Marker::xfail());
        }
        if data.markers.iter().any(|m| m == "skip") {
            markers.push(Marker::skip());
        }
        markers.extend(platforms.iter().map(Marker::new));
        markers.push(Marker::new(MOLECULE_MARKER));
        let unavailable_marker = unavailable_marker
            .filter(|_| !registry.is_available(&driver))
            .map(str::to_string);
        if let Some(marker) = &unavailable_marker {
            markers.push(Marker::new(marker.as_str()));
        }

        Ok(Self {
            descriptor: descriptor.to_path_buf(),
            name,
            project_dir,
            test_id,
            driver,
            platforms,
            markers,
            unavailable_marker,
        })
    }

    pub fn has_marker(&self, name: &str) -> bool {
        self.markers.iter().any(|m| m.name == name)
    }

    fn marker(&self, name: &str) -> Option<&Marker> {
        self.markers.iter().find(|m| m.name == name)
    }

    /// The form handed to tests requesting the `molecule_scenario` fixture.
    pub fn as_scenario(&self) -> MoleculeScenario {
        MoleculeScenario {
            name: self.name.clone(),
            parent_directory: self.project_dir.clone(),
            test_id: self.test_id.clone(),
        }
    }

    /// Run the scenario, streaming molecule's output to `out`.
    pub fn run(&self, config: &RunConfig, out: &mut dyn Write) -> ScenarioOutcome {
        let outcome = self.execute(config, out);
        let xfail = self.markers.contains(&Marker::xfail());
        match outcome {
            ScenarioOutcome::Failed(message) if xfail => {
                debug!(scenario = %self.test_id, %message, "Expected failure");
                ScenarioOutcome::XFailed(XFAIL_REASON.to_string())
            }
            ScenarioOutcome::Passed if xfail => ScenarioOutcome::XPassed,
            outcome => outcome,
        }
    }

    fn execute(&self, config: &RunConfig, out: &mut dyn Write) -> ScenarioOutcome {
        if self.markers.contains(&Marker::skip()) {
            return ScenarioOutcome::skipped(SKIP_REASON);
        }
        if let Some(marker) = &self.unavailable_marker {
            return ScenarioOutcome::Skipped {
                reason: format!("Driver {} is not available", self.driver),
                marker: Some(marker.clone()),
            };
        }
        if !config.enabled {
            return ScenarioOutcome::skipped("Molecule tests are disabled");
        }

        if let Some(reference) = &config.skip_no_git_change {
            match role_changed(&config.git, reference, &self.project_dir) {
                Ok(Some(false)) => return ScenarioOutcome::skipped("No change in role"),
                Ok(_) => {}
                Err(message) => return ScenarioOutcome::Failed(message),
            }
        }

        let args = config.molecule_args(&self.name);
        let mut command_line = vec![config.program.to_string_lossy().into_owned()];
        command_line.extend(args.iter().cloned());
        let rendered = shell_words::join(&command_line);

        info!(scenario = %self.test_id, command = %rendered, "Running molecule scenario");
        match stream_command(&config.program, &args, &self.project_dir, out) {
            Ok(status) if status.success() => ScenarioOutcome::Passed,
            Ok(status) => ScenarioOutcome::Failed(format!(
                "Error code {} returned by: {}",
                status.code().unwrap_or(-1),
                rendered
            )),
            Err(e) => ScenarioOutcome::Failed(format!("Exception {} returned by: {}", e, rendered)),
        }
    }
}

impl fmt::Display for ScenarioItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.test_id, self.driver)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `Some(changed)` from `git diff REF -- ./`; `None` when git is missing.
fn role_changed(
    git: &Path,
    reference: &str,
    project_dir: &Path,
) -> std::result::Result<Option<bool>, String> {
    let output = Command::new(git)
        .args(["diff", reference, "--", "./"])
        .current_dir(project_dir)
        .stdin(Stdio::null())
        .output();

    match output {
        Ok(output) if output.status.success() => Ok(Some(!output.stdout.is_empty())),
        Ok(output) => Err(format!(
            "Error checking git diff. Error code was: {}\nError output was: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim_end()
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("git not found, running scenario without change detection");
            Ok(None)
        }
        Err(e) => Err(format!("Error checking git diff: {}", e)),
    }
}

/// Run `program`, forwarding stdout and stderr lines to `out` as they
/// arrive.
fn stream_command(
    program: &Path,
    args: &[String],
    cwd: &Path,
    out: &mut dyn Write,
) -> std::io::Result<ExitStatus> {
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let (tx, rx) = mpsc::channel::<String>();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    if let Err(e) = forward_to(rx, out) {
        warn!(error = %e, "Output closed, stopping molecule");
        if let Err(kill) = child.kill() {
            debug!(error = %kill, "molecule already exited");
        }
        child.wait()?;
        join_readers(readers)?;
        return Err(e);
    }

    let status = child.wait()?;
    join_readers(readers)?;
    Ok(status)
}

fn forward_to(lines: mpsc::Receiver<String>, out: &mut dyn Write) -> std::io::Result<()> {
    for line in lines {
        writeln!(out, "{}", line)?;
    }
    out.flush()
}

fn join_readers(readers: Vec<thread::JoinHandle<()>>) -> std::io::Result<()> {
    let mut panicked = false;
    for reader in readers {
        panicked |= reader.join().is_err();
    }
    if panicked {
        return Err(std::io::Error::other("output reader thread panicked"));
    }
    Ok(())
}

fn forward_lines<R>(source: R, tx: mpsc::Sender<String>) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(source).lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    })
}

// ============================================================================
// Running
// ============================================================================

/// Settings shared by every scenario run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// `--molecule`
    pub enabled: bool,
    pub base_config: Option<PathBuf>,
    /// Reference for `--skip-no-git-change`
    pub skip_no_git_change: Option<String>,
    pub program: PathBuf,
    pub git: PathBuf,
    /// Arguments from `MOLECULE_OPTS`
    pub extra_opts: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_config: None,
            skip_no_git_change: None,
            program: PathBuf::from("molecule"),
            git: PathBuf::from("git"),
            extra_opts: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Settings from the plugin flags and `MOLECULE_OPTS`.
    pub fn from_args(args: &PluginArgs) -> Result<Self> {
        Ok(Self {
            enabled: args.molecule,
            base_config: args.molecule_base_config.clone(),
            skip_no_git_change: args.skip_no_git_change.clone().filter(|r| !r.is_empty()),
            extra_opts: molecule_opts()?,
            ..Self::default()
        })
    }

    /// Arguments after the program name for scenario `name`.
    pub fn molecule_args(&self, name: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(base) = &self.base_config {
            args.push("--base-config".to_string());
            args.push(base.to_string_lossy().into_owned());
        }
        args.extend(["test".to_string(), "-s".to_string(), name.to_string()]);
        args.extend(self.extra_opts.iter().cloned());
        args
    }
}

/// `MOLECULE_OPTS` split into words.
pub fn molecule_opts() -> Result<Vec<String>> {
    match std::env::var(MOLECULE_OPTS_ENV) {
        Ok(raw) if !raw.trim().is_empty() => shell_words::split(&raw)
            .map_err(|e| Error::invalid_option(MOLECULE_OPTS_ENV, e.to_string())),
        _ => Ok(Vec::new()),
    }
}

/// How a scenario run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutcome {
    Passed,
    Failed(String),
    Skipped {
        reason: String,
        /// Marker that caused the skip, when it was not `skip` itself
        marker: Option<String>,
    },
    /// Failed as the descriptor predicted
    XFailed(String),
    /// Passed despite an `xfail` marker
    XPassed,
}

impl ScenarioOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
            marker: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// Short status word for reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed(_) => "FAILED",
            Self::Skipped { .. } => "SKIPPED",
            Self::XFailed(_) => "XFAIL",
            Self::XPassed => "XPASS",
        }
    }
}

impl fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(message) | Self::XFailed(message) => {
                write!(f, "{} ({})", self.label(), message)
            }
            Self::Skipped { reason, .. } => write!(f, "{} ({})", self.label(), reason),
            _ => f.write_str(self.label()),
        }
    }
}

/// Scenario handle given to tests through the `molecule_scenario` fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoleculeScenario {
    pub name: String,
    pub parent_directory: PathBuf,
    pub test_id: String,
}

impl MoleculeScenario {
    /// Run `molecule test -s NAME` with inherited output.
    pub fn test(&self) -> Result<ExitStatus> {
        self.test_with(Path::new("molecule"))
    }

    pub fn test_with(&self, program: &Path) -> Result<ExitStatus> {
        let status = Command::new(program)
            .args(["test", "-s", &self.name])
            .current_dir(&self.parent_directory)
            .status()?;
        Ok(status)
    }
}

impl fmt::Display for MoleculeScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.test_id)
    }
}

/// Report header entries: the engine version and the environment variables
/// that usually explain scenario failures.
pub fn report_metadata(engine_version: Option<&str>) -> IndexMap<String, String> {
    let mut env: Vec<(String, String)> = std::env::vars()
        .filter(|(key, _)| REPORT_ENV_PREFIXES.iter().any(|p| key.starts_with(p)))
        .collect();
    env.sort();

    let mut metadata = IndexMap::new();
    metadata.insert(
        "distronode".to_string(),
        engine_version.unwrap_or("unknown").to_string(),
    );
    metadata.insert(
        "env".to_string(),
        env.iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(" "),
    );
    metadata
}
