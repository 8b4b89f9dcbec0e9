//! Command-line interface for distronode-test
//!
//! [`PluginArgs`] is the option group the plugin registers with the test
//! runner. Every long option also answers to a `--distronode-` prefixed
//! spelling. [`Cli`] wraps it into the standalone `distronode-test` binary.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{parse_bool, EngineDefaults, Options};
use crate::logging::LogFormat;

/// Options registered by the plugin.
#[derive(Args, Debug, Clone, Default, PartialEq)]
#[command(next_help_heading = "distronode")]
pub struct PluginArgs {
    /// Inventory file URI or comma separated host list (default: engine
    /// default inventory)
    #[arg(
        long = "inventory",
        visible_alias = "distronode-inventory",
        value_name = "DISTRONODE_INVENTORY"
    )]
    pub inventory: Option<String>,

    /// Second inventory, loaded independently of the first
    #[arg(
        long = "extra-inventory",
        visible_alias = "distronode-extra-inventory",
        value_name = "DISTRONODE_EXTRA_INVENTORY"
    )]
    pub extra_inventory: Option<String>,

    /// Host pattern targeted by the module fixtures
    #[arg(
        long = "host-pattern",
        visible_alias = "distronode-host-pattern",
        value_name = "DISTRONODE_HOST_PATTERN"
    )]
    pub host_pattern: Option<String>,

    /// Further limit selected hosts to an additional pattern
    #[arg(long = "limit", visible_alias = "distronode-limit", value_name = "DISTRONODE_SUBSET")]
    pub limit: Option<String>,

    /// Connection type to use (default: engine default transport)
    #[arg(
        long = "connection",
        visible_alias = "distronode-connection",
        value_name = "DISTRONODE_CONNECTION"
    )]
    pub connection: Option<String>,

    /// Connect as this user (default: engine default remote user)
    #[arg(long = "user", visible_alias = "distronode-user", value_name = "DISTRONODE_USER")]
    pub user: Option<String>,

    /// Don't make any changes; predict some of the changes that may occur
    #[arg(long = "check", visible_alias = "distronode-check")]
    pub check: bool,

    /// Prepend colon-separated path(s) to the module library
    #[arg(
        long = "module-path",
        visible_alias = "distronode-module-path",
        value_name = "DISTRONODE_MODULE_PATH"
    )]
    pub module_path: Option<String>,

    /// Run operations with become
    #[arg(long = "become", visible_alias = "distronode-become")]
    pub become_enabled: bool,

    /// Privilege escalation method (default: engine default)
    #[arg(
        long = "become-method",
        visible_alias = "distronode-become-method",
        value_name = "DISTRONODE_BECOME_METHOD"
    )]
    pub become_method: Option<String>,

    /// Run operations as this user (default: engine default)
    #[arg(
        long = "become-user",
        visible_alias = "distronode-become-user",
        value_name = "DISTRONODE_BECOME_USER"
    )]
    pub become_user: Option<String>,

    /// Ask for privilege escalation password
    #[arg(
        long = "ask-become-pass",
        visible_alias = "distronode-ask-become-pass",
        value_name = "DISTRONODE_ASK_BECOME_PASS"
    )]
    pub ask_become_pass: Option<String>,

    /// Enable support for distronode collection unit tests by only injecting
    /// the existing collections path
    #[arg(long = "distronode-unit-inject-only")]
    pub unit_inject_only: bool,

    /// Enable collection of molecule scenarios
    #[arg(long = "molecule")]
    pub molecule: bool,

    /// What to do with scenarios whose driver is unavailable: skip or xfail
    #[arg(
        long = "molecule-unavailable-driver",
        alias = "molecule_unavailable_driver",
        value_name = "MARKER"
    )]
    pub molecule_unavailable_driver: Option<String>,

    /// Path to the molecule base config file
    #[arg(
        long = "molecule-base-config",
        alias = "molecule_base_config",
        value_name = "PATH"
    )]
    pub molecule_base_config: Option<PathBuf>,

    /// Skip scenarios when there is no change in the role relative to REF
    #[arg(
        long = "skip-no-git-change",
        alias = "skip_no_git_change",
        value_name = "REF"
    )]
    pub skip_no_git_change: Option<String>,
}

impl PluginArgs {
    /// The command-line option layer, engine defaults filling unset values.
    pub fn to_options(&self, defaults: &EngineDefaults) -> Options {
        Options {
            inventory: self.inventory.clone().or_else(|| Some(defaults.host_list.clone())),
            extra_inventory: self.extra_inventory.clone(),
            host_pattern: self.host_pattern.clone(),
            subset: self.limit.clone().or_else(|| defaults.subset.clone()),
            connection: self
                .connection
                .clone()
                .or_else(|| Some(defaults.transport.clone())),
            user: self.user.clone().or_else(|| defaults.remote_user.clone()),
            module_path: self.module_path.clone().or_else(|| defaults.module_path.clone()),
            r#become: self.become_enabled || defaults.r#become,
            become_method: self
                .become_method
                .clone()
                .or_else(|| Some(defaults.become_method.clone())),
            become_user: self
                .become_user
                .clone()
                .or_else(|| Some(defaults.become_user.clone())),
            ask_become_pass: self
                .ask_become_pass
                .as_deref()
                .and_then(parse_bool)
                .unwrap_or(defaults.become_ask_pass),
            check: self.check,
            extra: Default::default(),
        }
    }
}

/// distronode-test - run distronode-backed infrastructure tests
#[derive(Parser, Debug, Clone)]
#[command(name = "distronode-test")]
#[command(version)]
#[command(about = "Inventory-backed host fixtures, ad-hoc module dispatch and molecule scenarios", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub plugin: PluginArgs,

    /// Verbosity level (-v, -vv, -vvv, -vvvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log output format (compact, pretty, json)
    #[arg(long, global = true, default_value = "compact")]
    pub log_format: LogFormat,

    /// Directory scenarios are collected from
    #[arg(long, global = true, default_value = ".")]
    pub rootdir: PathBuf,
}

impl Cli {
    /// Get verbosity level as a number
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// List parametrized test items without running them
    Collect {
        /// Fixtures to parametrize: distronode_host, distronode_group,
        /// molecule_scenario
        #[arg(long = "fixture", default_value = "molecule_scenario")]
        fixtures: Vec<String>,
    },

    /// Collect and run molecule scenarios
    Run {
        /// Only run scenarios whose test id contains this text
        #[arg(short = 'k', long)]
        keyword: Option<String>,
    },

    /// Print the hosts the host pattern selects
    Hosts,

    /// Run a module against the host pattern
    Adhoc {
        /// Module name
        module: String,

        /// Free-form module arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Gather facts from the hosts the host pattern selects
    Facts,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["distronode-test", "hosts"]).unwrap();
        assert_eq!(cli.command, Commands::Hosts);
        assert_eq!(cli.rootdir, PathBuf::from("."));
    }

    #[test]
    fn test_prefixed_aliases() {
        let cli = Cli::try_parse_from([
            "distronode-test",
            "--distronode-inventory",
            "hosts.ini",
            "--distronode-host-pattern",
            "web",
            "--distronode-become",
            "--limit",
            "web1",
            "hosts",
        ])
        .unwrap();
        assert_eq!(cli.plugin.inventory.as_deref(), Some("hosts.ini"));
        assert_eq!(cli.plugin.host_pattern.as_deref(), Some("web"));
        assert_eq!(cli.plugin.limit.as_deref(), Some("web1"));
        assert!(cli.plugin.become_enabled);
    }

    #[test]
    fn test_verbosity() {
        let cli = Cli::try_parse_from(["distronode-test", "-vvv", "facts"]).unwrap();
        assert_eq!(cli.verbosity(), 3);
    }

    #[test]
    fn test_adhoc_arguments() {
        let cli = Cli::try_parse_from([
            "distronode-test",
            "adhoc",
            "command",
            "ls",
            "-la",
            "/tmp",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Commands::Adhoc {
                module: "command".into(),
                args: vec!["ls".into(), "-la".into(), "/tmp".into()],
            }
        );
    }

    #[test]
    fn test_collect_fixtures() {
        let cli = Cli::try_parse_from([
            "distronode-test",
            "collect",
            "--fixture",
            "distronode_host",
            "--fixture",
            "distronode_group",
        ])
        .unwrap();
        assert_eq!(
            cli.command,
            Commands::Collect {
                fixtures: vec!["distronode_host".into(), "distronode_group".into()],
            }
        );
    }

    #[test]
    fn test_to_options_applies_engine_defaults() {
        let defaults = EngineDefaults::default();
        let options = PluginArgs::default().to_options(&defaults);
        assert_eq!(options.inventory.as_deref(), Some("/etc/distronode/hosts"));
        assert_eq!(options.connection.as_deref(), Some("smart"));
        assert_eq!(options.become_method.as_deref(), Some("sudo"));
        assert_eq!(options.become_user.as_deref(), Some("root"));
        assert!(!options.r#become);
        assert_eq!(options.host_pattern, None);
    }

    #[test]
    fn test_to_options_prefers_arguments() {
        let args = PluginArgs {
            inventory: Some("local,".into()),
            connection: Some("local".into()),
            ask_become_pass: Some("yes".into()),
            check: true,
            ..PluginArgs::default()
        };
        let options = args.to_options(&EngineDefaults::default());
        assert_eq!(options.inventory.as_deref(), Some("local,"));
        assert_eq!(options.connection.as_deref(), Some("local"));
        assert!(options.ask_become_pass);
        assert!(options.check);
    }
}
