//! Ad-hoc module dispatch and result decoding.
//!
//! A [`ModuleDispatcher`] is bound to one host pattern in one inventory tree.
//! Invoking a module resolves the pattern, hands the run to the engine and
//! decodes the engine's report into an [`AdHocResult`] keyed by host, in the
//! order the pattern resolved.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::{AdHocRequest, OutputFormat};
use crate::error::{Error, Result};
use crate::host_manager::{HostManagerInner, TreeKind};
use crate::inventory::Host;

static ONE_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<host>\S+) \| (?P<status>SUCCESS|CHANGED|FAILED!?|UNREACHABLE!|SKIPPED)(?:(?::| =>) (?P<rest>.*)| \| (?P<cmd>rc=.*))?$",
    )
    .expect("one-line regex is valid")
});

/// Engine exit codes whose output still carries per-host results.
const RESULT_EXIT_CODES: [i32; 3] = [0, 2, 4];

static COMMAND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^rc=(?P<rc>-?\d+) \| \(stdout\) ?(?P<stdout>.*?)(?: \(stderr\) (?P<stderr>.*))?$")
        .expect("command regex is valid")
});

/// What one module run reported for one host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    /// Whether the module changed anything
    #[serde(default)]
    pub changed: bool,
    /// Whether the module failed
    #[serde(default)]
    pub failed: bool,
    /// Whether the host was skipped
    #[serde(default)]
    pub skipped: bool,
    /// Whether the host could not be reached
    #[serde(default)]
    pub unreachable: bool,
    /// Human readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Command return code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rc: Option<i64>,
    /// Command standard output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Command standard error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Every other key the module returned
    #[serde(flatten)]
    pub data: IndexMap<String, Value>,
}

impl ModuleResult {
    /// Interpret one host's JSON payload. Unknown keys are kept in `data`;
    /// keys of an unexpected type are kept there too instead of failing.
    pub fn from_value(value: Value) -> Self {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Self {
                    msg: Some(other.to_string()),
                    ..Self::default()
                }
            }
        };

        let mut result = Self::default();
        for (key, value) in map {
            match (key.as_str(), value) {
                ("changed", Value::Bool(b)) => result.changed = b,
                ("failed", Value::Bool(b)) => result.failed = b,
                ("skipped", Value::Bool(b)) => result.skipped = b,
                ("unreachable", Value::Bool(b)) => result.unreachable = b,
                ("msg", Value::String(s)) => result.msg = Some(s),
                ("rc", Value::Number(n)) if n.is_i64() => result.rc = n.as_i64(),
                ("stdout", Value::String(s)) => result.stdout = Some(s),
                ("stderr", Value::String(s)) => result.stderr = Some(s),
                (_, value) => {
                    result.data.insert(key, value);
                }
            }
        }
        result
    }

    /// Placeholder for a host the engine never reported on.
    fn not_reported() -> Self {
        Self {
            unreachable: true,
            msg: Some("host was targeted but no result was reported".to_string()),
            ..Self::default()
        }
    }

    /// Facts gathered by `setup`, if present.
    pub fn facts(&self) -> Option<&Map<String, Value>> {
        self.data.get("distronode_facts").and_then(Value::as_object)
    }

    /// Any returned key, typed or not.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "changed" => Some(Value::Bool(self.changed)),
            "failed" => Some(Value::Bool(self.failed)),
            "skipped" => Some(Value::Bool(self.skipped)),
            "unreachable" => Some(Value::Bool(self.unreachable)),
            "msg" => self.msg.clone().map(Value::from),
            "rc" => self.rc.map(Value::from),
            "stdout" => self.stdout.clone().map(Value::from),
            "stderr" => self.stderr.clone().map(Value::from),
            other => self.data.get(other).cloned(),
        }
    }
}

/// Outcome of one host in one run.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOutcome {
    Ok(ModuleResult),
    Failed(ModuleResult),
    Unreachable(ModuleResult),
}

impl HostOutcome {
    /// Classify a payload by its `unreachable` and `failed` flags.
    pub fn classify(result: ModuleResult) -> Self {
        if result.unreachable {
            HostOutcome::Unreachable(result)
        } else if result.failed {
            HostOutcome::Failed(result)
        } else {
            HostOutcome::Ok(result)
        }
    }

    pub fn result(&self) -> &ModuleResult {
        match self {
            HostOutcome::Ok(r) | HostOutcome::Failed(r) | HostOutcome::Unreachable(r) => r,
        }
    }

    pub fn into_result(self) -> ModuleResult {
        match self {
            HostOutcome::Ok(r) | HostOutcome::Failed(r) | HostOutcome::Unreachable(r) => r,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, HostOutcome::Ok(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, HostOutcome::Failed(_))
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, HostOutcome::Unreachable(_))
    }
}

/// Per-host results of one ad-hoc run, in pattern resolution order.
#[derive(Debug, Clone, PartialEq)]
pub struct AdHocResult {
    module: String,
    outcomes: IndexMap<String, HostOutcome>,
}

impl AdHocResult {
    pub fn new(module: impl Into<String>, outcomes: IndexMap<String, HostOutcome>) -> Self {
        Self {
            module: module.into(),
            outcomes,
        }
    }

    /// Arrange decoded outcomes in `order`. Hosts in `order` missing from
    /// `decoded` are recorded as unreachable; extra decoded hosts follow.
    pub fn ordered(
        module: impl Into<String>,
        mut decoded: IndexMap<String, HostOutcome>,
        order: &[String],
    ) -> Self {
        let mut outcomes = IndexMap::with_capacity(order.len());
        for name in order {
            let outcome = decoded
                .shift_remove(name)
                .unwrap_or_else(|| HostOutcome::Unreachable(ModuleResult::not_reported()));
            outcomes.insert(name.clone(), outcome);
        }
        outcomes.extend(decoded);
        Self::new(module, outcomes)
    }

    /// Module that produced these results
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, host: &str) -> Option<&HostOutcome> {
        self.outcomes.get(host)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.outcomes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostOutcome)> {
        self.outcomes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Hosts that responded, whether or not the module succeeded.
    pub fn contacted(&self) -> IndexMap<String, ModuleResult> {
        self.select(|o| !o.is_unreachable())
    }

    /// Hosts that could not be reached.
    pub fn dark(&self) -> IndexMap<String, ModuleResult> {
        self.select(HostOutcome::is_unreachable)
    }

    /// Hosts where the module reported failure.
    pub fn failed(&self) -> IndexMap<String, ModuleResult> {
        self.select(HostOutcome::is_failed)
    }

    fn select(&self, keep: impl Fn(&HostOutcome) -> bool) -> IndexMap<String, ModuleResult> {
        self.outcomes
            .iter()
            .filter(|(_, o)| keep(o))
            .map(|(k, o)| (k.clone(), o.result().clone()))
            .collect()
    }

    /// True when every host was reached and none failed.
    pub fn is_success(&self) -> bool {
        self.outcomes.values().all(HostOutcome::is_ok)
    }

    /// Fails with [`Error::ConnectionFailure`] if any host was unreachable.
    pub fn ensure_reachable(self) -> Result<Self> {
        let dark = self.dark();
        if dark.is_empty() {
            return Ok(self);
        }
        let names: Vec<&str> = dark.keys().map(String::as_str).collect();
        Err(Error::ConnectionFailure {
            message: format!("Host unreachable in the inventory: {}", names.join(", ")),
            contacted: self.contacted(),
            dark,
        })
    }

    /// Fails with [`Error::ModuleExecution`] if any host reported failure.
    pub fn ensure_success(self) -> Result<Self> {
        let failed = self.failed();
        if failed.is_empty() {
            return Ok(self);
        }
        let message = failed
            .iter()
            .map(|(host, r)| format!("{}: {}", host, r.msg.as_deref().unwrap_or("failed")))
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::ModuleExecution {
            module: self.module,
            message,
            failed,
        })
    }

    /// `distronode_facts` per reached host.
    pub fn facts(&self) -> IndexMap<String, Map<String, Value>> {
        self.outcomes
            .iter()
            .filter_map(|(host, o)| o.result().facts().map(|f| (host.clone(), f.clone())))
            .collect()
    }

    pub fn into_outcomes(self) -> IndexMap<String, HostOutcome> {
        self.outcomes
    }
}

impl IntoIterator for AdHocResult {
    type Item = (String, HostOutcome);
    type IntoIter = indexmap::map::IntoIter<String, HostOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

/// Arguments for one module invocation: optional free-form text followed by
/// `key=value` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleArgs {
    free_form: Option<String>,
    params: IndexMap<String, String>,
}

impl ModuleArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Free-form text, e.g. the command for `command`/`shell`.
    pub fn free_form(mut self, text: impl Into<String>) -> Self {
        self.free_form = Some(text.into());
        self
    }

    /// A `key=value` parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.free_form.as_deref().map_or(true, str::is_empty) && self.params.is_empty()
    }

    /// The `-a` string. Values are shell-quoted when needed.
    pub fn render(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut parts: Vec<String> = Vec::new();
        if let Some(text) = self.free_form.as_deref().filter(|t| !t.is_empty()) {
            parts.push(text.to_string());
        }
        for (key, value) in &self.params {
            parts.push(format!("{}={}", key, shell_words::quote(value)));
        }
        Some(parts.join(" "))
    }
}

impl From<&str> for ModuleArgs {
    fn from(text: &str) -> Self {
        ModuleArgs::new().free_form(text)
    }
}

impl From<String> for ModuleArgs {
    fn from(text: String) -> Self {
        ModuleArgs::new().free_form(text)
    }
}

/// Decode the `json` stdout callback's document.
///
/// Anything printed before the document (warnings, deprecation notices) is
/// skipped. Results of later tasks overwrite earlier ones for the same host.
pub fn decode_json(stdout: &str) -> Result<IndexMap<String, HostOutcome>> {
    let start = if stdout.starts_with('{') {
        Some(0)
    } else {
        stdout.find("\n{").map(|i| i + 1)
    };
    let start = start.ok_or_else(|| Error::Other {
        message: "engine output contains no JSON document".to_string(),
        source: None,
    })?;

    let document: Value = serde_json::from_str(stdout[start..].trim_end())?;
    let mut outcomes = IndexMap::new();

    let plays = document.get("plays").and_then(Value::as_array);
    for play in plays.into_iter().flatten() {
        let tasks = play.get("tasks").and_then(Value::as_array);
        for task in tasks.into_iter().flatten() {
            let Some(hosts) = task.get("hosts").and_then(Value::as_object) else {
                continue;
            };
            for (host, payload) in hosts {
                let result = ModuleResult::from_value(payload.clone());
                outcomes.insert(host.clone(), HostOutcome::classify(result));
            }
        }
    }

    Ok(outcomes)
}

/// Decode one-line output (`host | STATUS => {...}`).
pub fn decode_one_line(stdout: &str) -> Result<IndexMap<String, HostOutcome>> {
    let mut outcomes = IndexMap::new();

    for line in stdout.lines().map(str::trim_end) {
        let Some(caps) = ONE_LINE_RE.captures(line) else {
            continue;
        };
        let host = caps["host"].to_string();
        let status = &caps["status"];

        let mut result = if let Some(rest) = caps.name("rest") {
            let rest = rest.as_str();
            if rest.starts_with('{') {
                match serde_json::from_str(rest) {
                    Ok(value) => ModuleResult::from_value(value),
                    Err(e) => {
                        warn!(%host, error = %e, "Undecodable result line, keeping it as the message");
                        ModuleResult {
                            msg: Some(rest.to_string()),
                            ..ModuleResult::default()
                        }
                    }
                }
            } else {
                ModuleResult {
                    msg: Some(rest.to_string()),
                    ..ModuleResult::default()
                }
            }
        } else if let Some(cmd) = caps.name("cmd") {
            decode_command_line(cmd.as_str())
        } else {
            ModuleResult::default()
        };

        match status {
            "CHANGED" => result.changed = true,
            "FAILED" | "FAILED!" => result.failed = true,
            "UNREACHABLE!" => result.unreachable = true,
            "SKIPPED" => result.skipped = true,
            _ => {}
        }
        outcomes.insert(host, HostOutcome::classify(result));
    }

    Ok(outcomes)
}

fn decode_command_line(text: &str) -> ModuleResult {
    let unescape = |s: &str| s.replace("\\n", "\n").replace("\\r", "\r");
    match COMMAND_RE.captures(text) {
        Some(caps) => ModuleResult {
            rc: caps["rc"].parse().ok(),
            stdout: Some(unescape(&caps["stdout"])),
            stderr: caps.name("stderr").map(|m| unescape(m.as_str())),
            ..ModuleResult::default()
        },
        None => ModuleResult {
            msg: Some(text.to_string()),
            ..ModuleResult::default()
        },
    }
}

/// Runs modules against the hosts one pattern selects.
#[derive(Clone)]
pub struct ModuleDispatcher {
    manager: Arc<HostManagerInner>,
    pattern: String,
    tree: TreeKind,
}

impl fmt::Debug for ModuleDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDispatcher")
            .field("pattern", &self.pattern)
            .field("tree", &self.tree)
            .finish()
    }
}

impl ModuleDispatcher {
    pub(crate) fn new(manager: Arc<HostManagerInner>, pattern: impl Into<String>, tree: TreeKind) -> Self {
        Self {
            manager,
            pattern: pattern.into(),
            tree,
        }
    }

    /// The host pattern this dispatcher targets
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Inventory tree the pattern resolved in
    pub fn tree(&self) -> TreeKind {
        self.tree
    }

    /// Hosts selected by the pattern, ignoring `--limit`.
    pub fn hosts(&self) -> Vec<Host> {
        self.manager
            .tree(self.tree)
            .inventory_manager()
            .list_hosts(&self.pattern)
            .map(|hosts| hosts.into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of the hosts a run would target, `--limit` applied.
    pub fn target_hosts(&self) -> Result<Vec<String>> {
        let hosts = self
            .manager
            .tree(self.tree)
            .inventory_manager()
            .get_hosts(&self.pattern, self.manager.options.subset.as_deref())
            .map_err(|e| Error::InvalidPattern(e.to_string()))?;
        Ok(hosts.into_iter().map(|h| h.name.clone()).collect())
    }

    pub fn len(&self) -> usize {
        self.hosts().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `name` is among the selected hosts.
    pub fn has_host(&self, name: &str) -> bool {
        self.hosts().iter().any(|h| h.name == name)
    }

    /// Run `module` with `args` on every targeted host.
    pub fn invoke(&self, module: &str, args: impl Into<ModuleArgs>) -> Result<AdHocResult> {
        let args = args.into();
        let order = self.target_hosts()?;
        if order.is_empty() {
            return Err(Error::NoHostsMatched {
                pattern: self.pattern.clone(),
            });
        }

        let options = &self.manager.options;
        let format = self.manager.strategy.output_format();
        let request = AdHocRequest {
            pattern: self.pattern.clone(),
            sources: self.manager.tree(self.tree).inventory_manager().sources().to_vec(),
            module: module.to_string(),
            args: args.render(),
            subset: options.subset.clone(),
            connection: options.connection.clone(),
            user: options.user.clone(),
            module_path: options.module_path.clone(),
            r#become: options.r#become,
            become_method: options.become_method.clone(),
            become_user: options.become_user.clone(),
            ask_become_pass: options.ask_become_pass,
            check: options.check,
            format,
        };

        info!(module, pattern = %self.pattern, hosts = order.len(), "Dispatching module");
        let output = self.manager.engine.run_adhoc(&request)?;

        let decoded = match format {
            OutputFormat::Json => decode_json(&output.stdout),
            OutputFormat::OneLine => decode_one_line(&output.stdout),
        };

        let per_host_exit = RESULT_EXIT_CODES.contains(&output.exit_code);
        let decoded = match decoded {
            Ok(decoded) if output.success() || (per_host_exit && !decoded.is_empty()) => decoded,
            Ok(_) => {
                return Err(Error::engine(output.command, output.exit_code, output.stderr.trim()));
            }
            Err(e) => {
                warn!(error = %e, exit_code = output.exit_code, "Unable to decode engine output");
                return Err(Error::engine(output.command, output.exit_code, output.stderr.trim()));
            }
        };

        let result = AdHocResult::ordered(module, decoded, &order);
        debug!(
            module,
            contacted = result.contacted().len(),
            dark = result.dark().len(),
            "Module run finished"
        );
        Ok(result)
    }

    /// Gather facts (`setup`).
    pub fn setup(&self) -> Result<AdHocResult> {
        self.invoke("setup", ModuleArgs::new())
    }
}
