//! Configuration module for distronode-test
//!
//! Options reach a host manager from up to four places, later ones winning:
//! - Engine defaults (`distronode.cfg` plus `DISTRONODE_*` environment
//!   variables), folded into the command-line layer
//! - Command-line arguments
//! - Per-test marker overrides
//! - Call-time overrides
//!
//! Overrides are loose key/value maps. They are merged over the serialized
//! form of [`Options`] and deserialized back, so an override may name any
//! engine option, known to this crate or not.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Loose option overrides from markers or call sites.
pub type Overrides = IndexMap<String, Value>;

/// Reported when no host pattern was configured.
pub const MISSING_HOST_PATTERN: &str =
    "Missing required parameter --distronode-host-pattern/--host-pattern";

/// Reported when no inventory was configured.
pub const MISSING_INVENTORY: &str = "Unable to find an inventory file, specify one with the --distronode-inventory/--inventory parameter.";

/// Fully resolved options for one host manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Inventory source: a path, a comma separated host list, or several
    /// comma separated paths
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub inventory: Option<String>,

    /// Independently loaded second inventory
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub extra_inventory: Option<String>,

    /// Default target pattern
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub host_pattern: Option<String>,

    /// Further restriction applied at dispatch (`--limit`)
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub subset: Option<String>,

    /// Connection plugin
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub connection: Option<String>,

    /// Remote user
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub user: Option<String>,

    /// Module search path
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub module_path: Option<String>,

    /// Privilege escalation
    #[serde(deserialize_with = "lenient_bool")]
    pub r#become: bool,

    /// Escalation method
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub become_method: Option<String>,

    /// Escalation user
    #[serde(skip_serializing_if = "Option::is_none", deserialize_with = "lenient_string")]
    pub become_user: Option<String>,

    /// Prompt for the escalation password
    #[serde(deserialize_with = "lenient_bool")]
    pub ask_become_pass: bool,

    /// Check mode
    #[serde(deserialize_with = "lenient_bool")]
    pub check: bool,

    /// Options this crate passes through without interpreting
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl Options {
    /// Serialized form, one entry per set option.
    pub fn to_map(&self) -> Result<Overrides> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Err(Error::invalid_option("options", "did not serialize to a map")),
        }
    }

    /// Rebuild options from a key/value map.
    pub fn from_map(map: Overrides) -> Result<Self> {
        let object: serde_json::Map<String, Value> = map.into_iter().collect();
        serde_json::from_value(Value::Object(object))
            .map_err(|e| Error::invalid_option("options", e.to_string()))
    }

    /// These options with `overrides` applied on top; last writer wins.
    pub fn overlay(&self, overrides: &Overrides) -> Result<Self> {
        if overrides.is_empty() {
            return Ok(self.clone());
        }
        let mut map = self.to_map()?;
        for (key, value) in overrides {
            map.insert(canonical_key(key).to_string(), value.clone());
        }
        Self::from_map(map)
    }

    /// Look up any option by key, including pass-through ones.
    pub fn get(&self, key: &str) -> Option<Value> {
        let key = canonical_key(key);
        self.to_map().ok()?.shift_remove(key).filter(|v| !v.is_null())
    }
}

/// `limit` is accepted as a spelling of `subset`.
fn canonical_key(key: &str) -> &str {
    match key {
        "limit" => "subset",
        other => other,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => {
            return Err(serde::de::Error::custom("expected a string, found a map"));
        }
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => false,
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => parse_bool(&s).unwrap_or(true),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    })
}

/// Boolean spellings accepted in configuration files and the environment.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" | "t" => Some(true),
        "" | "0" | "false" | "no" | "off" | "n" | "f" => Some(false),
        _ => None,
    }
}

/// Engine-wide defaults read from `distronode.cfg` and the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDefaults {
    /// Default inventory (`[defaults] inventory`)
    pub host_list: String,
    /// Default limit
    pub subset: Option<String>,
    /// Default connection (`[defaults] transport`)
    pub transport: String,
    /// Default remote user
    pub remote_user: Option<String>,
    /// Default module search path (`[defaults] library`)
    pub module_path: Option<String>,
    /// Escalate by default
    pub r#become: bool,
    /// Default escalation method
    pub become_method: String,
    /// Default escalation user
    pub become_user: String,
    /// Prompt for the escalation password by default
    pub become_ask_pass: bool,
    /// File the values were read from, if any
    #[serde(skip)]
    pub config_file: Option<PathBuf>,
}

impl Default for EngineDefaults {
    fn default() -> Self {
        Self {
            host_list: "/etc/distronode/hosts".to_string(),
            subset: None,
            transport: "smart".to_string(),
            remote_user: None,
            module_path: None,
            r#become: false,
            become_method: "sudo".to_string(),
            become_user: "root".to_string(),
            become_ask_pass: false,
            config_file: None,
        }
    }
}

impl EngineDefaults {
    /// Load from the first configuration file found, then apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`EngineDefaults::load`], reading `explicit` instead of searching.
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let mut defaults = Self::default();

        if let Some(path) = Self::get_config_paths(explicit)
            .into_iter()
            .find(|p| p.is_file())
        {
            defaults.merge_from_file(&path)?;
        }

        defaults.apply_env_overrides();
        Ok(defaults)
    }

    /// Candidate configuration files, most specific first. Only the first
    /// existing one is read.
    fn get_config_paths(explicit_path: Option<&Path>) -> Vec<PathBuf> {
        if let Some(path) = explicit_path {
            return vec![path.to_path_buf()];
        }

        let mut paths = Vec::new();

        if let Ok(env_config) = std::env::var("DISTRONODE_CONFIG") {
            if !env_config.is_empty() {
                paths.push(PathBuf::from(env_config));
            }
        }

        paths.push(PathBuf::from("distronode.cfg"));

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".distronode.cfg"));
        }

        paths.push(PathBuf::from("/etc/distronode/distronode.cfg"));
        paths
    }

    /// Merge values from an INI configuration file
    fn merge_from_file(&mut self, path: &Path) -> Result<()> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Ini))
            .build()
            .map_err(|e| Error::configuration(path.display().to_string(), e.to_string()))?;

        let text = |key: &str| settings.get_string(key).ok().filter(|v| !v.is_empty());
        let flag = |key: &str| settings.get_string(key).ok().and_then(|v| parse_bool(&v));

        if let Some(inventory) = text("defaults.inventory").or_else(|| text("defaults.hostfile")) {
            self.host_list = inventory;
        }
        if let Some(transport) = text("defaults.transport") {
            self.transport = transport;
        }
        if let Some(user) = text("defaults.remote_user") {
            self.remote_user = Some(user);
        }
        if let Some(library) = text("defaults.library") {
            self.module_path = Some(library);
        }
        if let Some(enabled) = flag("privilege_escalation.become") {
            self.r#become = enabled;
        }
        if let Some(method) = text("privilege_escalation.become_method") {
            self.become_method = method;
        }
        if let Some(user) = text("privilege_escalation.become_user") {
            self.become_user = user;
        }
        if let Some(ask) = flag("privilege_escalation.become_ask_pass") {
            self.become_ask_pass = ask;
        }

        debug!(path = %path.display(), "Loaded distronode configuration file");
        self.config_file = Some(path.to_path_buf());
        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        // DISTRONODE_INVENTORY
        if let Some(inventory) = var("DISTRONODE_INVENTORY").or_else(|| var("DISTRONODE_HOSTS")) {
            self.host_list = inventory;
        }

        // DISTRONODE_TRANSPORT
        if let Some(transport) = var("DISTRONODE_TRANSPORT") {
            self.transport = transport;
        }

        // DISTRONODE_REMOTE_USER
        if let Some(user) = var("DISTRONODE_REMOTE_USER") {
            self.remote_user = Some(user);
        }

        // DISTRONODE_LIBRARY
        if let Some(library) = var("DISTRONODE_LIBRARY") {
            self.module_path = Some(library);
        }

        // DISTRONODE_BECOME
        if let Some(enabled) = var("DISTRONODE_BECOME").and_then(|v| parse_bool(&v)) {
            self.r#become = enabled;
        }

        // DISTRONODE_BECOME_METHOD
        if let Some(method) = var("DISTRONODE_BECOME_METHOD") {
            self.become_method = method;
        }

        // DISTRONODE_BECOME_USER
        if let Some(user) = var("DISTRONODE_BECOME_USER") {
            self.become_user = user;
        }

        // DISTRONODE_BECOME_ASK_PASS
        if let Some(ask) = var("DISTRONODE_BECOME_ASK_PASS").and_then(|v| parse_bool(&v)) {
            self.become_ask_pass = ask;
        }
    }
}

/// Merges option layers and applies engine defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    defaults: EngineDefaults,
}

impl ConfigResolver {
    pub fn new(defaults: EngineDefaults) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> &EngineDefaults {
        &self.defaults
    }

    /// Merge the command-line layer, a marker's overrides and call-time
    /// overrides, then fill escalation settings left unset from the engine
    /// defaults.
    pub fn resolve(
        &self,
        cli: Option<&Options>,
        marker: Option<&Overrides>,
        explicit: &Overrides,
    ) -> Result<Options> {
        let mut options = cli.cloned().unwrap_or_default();
        if let Some(marker) = marker {
            options = options.overlay(marker)?;
        }
        options = options.overlay(explicit)?;

        if !options.r#become {
            options.r#become = self.defaults.r#become;
        }
        if options.become_user.as_deref().map_or(true, str::is_empty) {
            options.become_user = Some(self.defaults.become_user.clone());
        }
        if !options.ask_become_pass {
            options.ask_become_pass = self.defaults.become_ask_pass;
        }

        debug!(
            inventory = options.inventory.as_deref().unwrap_or(""),
            host_pattern = options.host_pattern.as_deref().unwrap_or(""),
            connection = options.connection.as_deref().unwrap_or(""),
            "Resolved host manager options"
        );
        Ok(options)
    }

    /// Check the parameters every run needs, reporting all violations at
    /// once.
    pub fn validate(options: &Options) -> Result<()> {
        let mut violations = Vec::new();

        if options.host_pattern.as_deref().map_or(true, str::is_empty) {
            violations.push(MISSING_HOST_PATTERN);
        }
        if options.inventory.as_deref().map_or(true, str::is_empty) {
            violations.push(MISSING_INVENTORY);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::usage(violations))
        }
    }
}
