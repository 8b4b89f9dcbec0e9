//! Host definition for the distronode-test inventory model.
//!
//! A [`Host`] is a name, the variables the engine reported for it, and the
//! groups it is a direct member of. Connection details stay in the variables;
//! the engine interprets them, this crate only exposes them.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Variable carrying the address to connect to.
pub const HOST_ADDRESS_VAR: &str = "distronode_host";
/// Variable carrying the connection plugin.
pub const HOST_CONNECTION_VAR: &str = "distronode_connection";
/// Variable carrying the connection port.
pub const HOST_PORT_VAR: &str = "distronode_port";
/// Variable carrying the remote user.
pub const HOST_USER_VAR: &str = "distronode_user";

/// A managed host in the inventory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Host name (can be hostname, IP, or alias)
    pub name: String,

    /// Host-specific variables, as reported by the engine
    #[serde(default)]
    pub vars: IndexMap<String, Value>,

    /// Groups this host is a direct member of, in the order it joined them
    #[serde(skip)]
    pub groups: IndexSet<String>,
}

impl Host {
    /// Create a new host with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: IndexMap::new(),
            groups: IndexSet::new(),
        }
    }

    /// Parse one element of a host-list source: `name` or `name:port`.
    ///
    /// Bracketed IPv6 literals keep their port (`[::1]:2222`); bare IPv6
    /// addresses are taken verbatim.
    pub fn from_host_list_entry(entry: &str) -> Self {
        let entry = entry.trim();

        if let Some(rest) = entry.strip_prefix('[') {
            if let Some((addr, tail)) = rest.split_once(']') {
                let mut host = Host::new(addr);
                if let Some(port) = tail.strip_prefix(':').and_then(parse_port) {
                    host.set_var(HOST_PORT_VAR, Value::from(port));
                }
                return host;
            }
        }

        match entry.split_once(':') {
            Some((name, port)) if !name.is_empty() && !port.contains(':') => {
                match parse_port(port) {
                    Some(port) => {
                        let mut host = Host::new(name);
                        host.set_var(HOST_PORT_VAR, Value::from(port));
                        host
                    }
                    None => Host::new(entry),
                }
            }
            _ => Host::new(entry),
        }
    }

    /// Get the actual address to connect to
    pub fn address(&self) -> &str {
        self.vars
            .get(HOST_ADDRESS_VAR)
            .and_then(Value::as_str)
            .unwrap_or(&self.name)
    }

    /// Connection plugin recorded for this host, if any
    pub fn connection(&self) -> Option<&str> {
        self.vars.get(HOST_CONNECTION_VAR).and_then(Value::as_str)
    }

    /// Connection port recorded for this host, if any
    pub fn port(&self) -> Option<u16> {
        match self.vars.get(HOST_PORT_VAR)? {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => parse_port(s),
            _ => None,
        }
    }

    /// Set a variable on this host
    pub fn set_var(&mut self, key: impl Into<String>, value: Value) {
        self.vars.insert(key.into(), value);
    }

    /// Get a variable from this host
    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Check if host has a specific variable
    pub fn has_var(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Add this host to a group
    pub fn add_to_group(&mut self, group: impl Into<String>) {
        self.groups.insert(group.into());
    }

    /// Check if host belongs to a specific group
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Merge variables from another source (other takes precedence)
    pub fn merge_vars(&mut self, other: &IndexMap<String, Value>) {
        for (key, value) in other {
            self.vars.insert(key.clone(), value.clone());
        }
    }
}

fn parse_port(raw: &str) -> Option<u16> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Host {}

impl std::hash::Hash for Host {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}
