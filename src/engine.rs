//! The boundary to the external automation engine.
//!
//! Everything this crate knows about the engine goes through the [`Engine`]
//! trait: the version banner, inventory dumps, host listings and ad-hoc runs.
//! [`ProcessEngine`] implements it by spawning the engine's command-line
//! tools; tests substitute canned implementations.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// How the engine reports ad-hoc results on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// The `json` stdout callback: a single JSON document.
    #[default]
    Json,
    /// One line per host: `host | STATUS => {...}`.
    OneLine,
}

/// A single ad-hoc invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdHocRequest {
    /// Host pattern to run against
    pub pattern: String,
    /// Inventory sources, in order
    pub sources: Vec<String>,
    /// Module name
    pub module: String,
    /// Rendered module arguments
    pub args: Option<String>,
    /// `--limit` pattern
    pub subset: Option<String>,
    /// Connection plugin
    pub connection: Option<String>,
    /// Remote user
    pub user: Option<String>,
    /// Module search path
    pub module_path: Option<String>,
    /// Privilege escalation
    pub r#become: bool,
    /// Escalation method
    pub become_method: Option<String>,
    /// Escalation user
    pub become_user: Option<String>,
    /// Prompt for the escalation password
    pub ask_become_pass: bool,
    /// Check mode
    pub check: bool,
    /// Requested output format
    pub format: OutputFormat,
}

impl AdHocRequest {
    /// Command-line arguments for the engine's ad-hoc tool.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![self.pattern.clone()];

        for source in &self.sources {
            args.push("-i".to_string());
            args.push(source.clone());
        }

        args.push("-m".to_string());
        args.push(self.module.clone());

        if let Some(module_args) = self.args.as_deref().filter(|a| !a.is_empty()) {
            args.push("-a".to_string());
            args.push(module_args.to_string());
        }

        push_opt_into(&mut args, "--limit", &self.subset);
        push_opt_into(&mut args, "--connection", &self.connection);
        push_opt_into(&mut args, "--user", &self.user);
        push_opt_into(&mut args, "--module-path", &self.module_path);

        if self.r#become {
            args.push("--become".to_string());
            push_opt_into(&mut args, "--become-method", &self.become_method);
            push_opt_into(&mut args, "--become-user", &self.become_user);
        }
        if self.ask_become_pass {
            args.push("--ask-become-pass".to_string());
        }
        if self.check {
            args.push("--check".to_string());
        }
        if self.format == OutputFormat::OneLine {
            args.push("--one-line".to_string());
        }

        args
    }
}

fn push_opt_into(args: &mut Vec<String>, flag: &str, value: &Option<String>) {
    if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
        args.push(flag.to_string());
        args.push(v.to_string());
    }
}

/// Captured result of an engine command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Shell-quoted command line
    pub command: String,
    /// Exit code, -1 when terminated by a signal
    pub exit_code: i32,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited with status 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Converts a non-zero exit into [`Error::Engine`].
    pub fn into_success(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::engine(self.command, self.exit_code, self.stderr.trim()))
        }
    }
}

/// The operations the crate needs from the automation engine.
pub trait Engine: fmt::Debug + Send + Sync {
    /// Raw `--version` banner.
    fn version(&self) -> Result<String>;

    /// JSON inventory dump of one source (`{"_meta": {...}, "group": {...}}`).
    fn inventory_dump(&self, source: &str) -> Result<serde_json::Value>;

    /// Host names matched by `pattern` in one source.
    fn list_hosts(&self, source: &str, pattern: &str) -> Result<Vec<String>>;

    /// Runs one ad-hoc operation and captures its output.
    fn run_adhoc(&self, request: &AdHocRequest) -> Result<CommandOutput>;
}

/// [`Engine`] backed by the engine's command-line tools.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: PathBuf,
    inventory_program: PathBuf,
    verbosity: u8,
    env: Vec<(String, String)>,
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessEngine {
    /// Uses `distronode` and `distronode-inventory` from `PATH`.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("distronode"),
            inventory_program: PathBuf::from("distronode-inventory"),
            verbosity: 0,
            env: Vec::new(),
        }
    }

    /// Overrides the ad-hoc executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Overrides the inventory executable.
    pub fn with_inventory_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.inventory_program = program.into();
        self
    }

    /// Engine verbosity passed to ad-hoc runs as `-v…`.
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Adds an environment variable to every spawned command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Whether the ad-hoc executable can be found.
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    fn command(&self, program: &Path, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd
    }

    fn run(&self, program: &Path, args: &[String], mut cmd: Command) -> Result<CommandOutput> {
        let rendered = render_command(program, args);
        debug!(command = %rendered, "Running engine command");

        let output = cmd
            .output()
            .map_err(|e| Error::engine(rendered.clone(), -1, e.to_string()))?;

        let result = CommandOutput {
            command: rendered,
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!(exit_code = result.exit_code, "Engine command finished");
        Ok(result)
    }
}

impl Engine for ProcessEngine {
    fn version(&self) -> Result<String> {
        let args = vec!["--version".to_string()];
        let cmd = self.command(&self.program, &args);
        let output = self.run(&self.program, &args, cmd)?.into_success()?;
        Ok(output.stdout)
    }

    fn inventory_dump(&self, source: &str) -> Result<serde_json::Value> {
        let args = vec!["-i".to_string(), source.to_string(), "--list".to_string()];
        let cmd = self.command(&self.inventory_program, &args);
        let output = self.run(&self.inventory_program, &args, cmd)?.into_success()?;
        Ok(serde_json::from_str(&output.stdout)?)
    }

    fn list_hosts(&self, source: &str, pattern: &str) -> Result<Vec<String>> {
        let args = vec![
            pattern.to_string(),
            "-i".to_string(),
            source.to_string(),
            "--list-hosts".to_string(),
        ];
        let cmd = self.command(&self.program, &args);
        let output = self.run(&self.program, &args, cmd)?.into_success()?;
        Ok(parse_list_hosts(&output.stdout))
    }

    fn run_adhoc(&self, request: &AdHocRequest) -> Result<CommandOutput> {
        let mut args = request.to_args();
        if self.verbosity > 0 {
            args.push(format!("-{}", "v".repeat(usize::from(self.verbosity))));
        }

        let mut cmd = self.command(&self.program, &args);
        if request.format == OutputFormat::Json {
            cmd.env("DISTRONODE_LOAD_CALLBACK_PLUGINS", "1")
                .env("DISTRONODE_STDOUT_CALLBACK", "json");
        }
        self.run(&self.program, &args, cmd)
    }
}

/// Parses `--list-hosts` output:
///
/// ```text
///   hosts (2):
///     web1
///     web2
/// ```
pub fn parse_list_hosts(stdout: &str) -> Vec<String> {
    let mut in_listing = false;
    let mut hosts = Vec::new();

    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("[WARNING]") {
            continue;
        }
        if trimmed.starts_with("hosts (") && trimmed.ends_with("):") {
            in_listing = true;
            continue;
        }
        if in_listing {
            hosts.push(trimmed.to_string());
        }
    }

    hosts
}

fn render_command(program: &Path, args: &[String]) -> String {
    let mut words = vec![program.display().to_string()];
    words.extend(args.iter().cloned());
    shell_words::join(words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_adhoc_args_minimal() {
        let request = AdHocRequest {
            pattern: "all".into(),
            sources: vec!["hosts.ini".into()],
            module: "ping".into(),
            ..Default::default()
        };
        assert_eq!(
            request.to_args(),
            vec!["all", "-i", "hosts.ini", "-m", "ping"]
        );
    }

    #[test]
    fn test_adhoc_args_full() {
        let request = AdHocRequest {
            pattern: "web".into(),
            sources: vec!["a.ini".into(), "b.ini".into()],
            module: "command".into(),
            args: Some("uptime".into()),
            subset: Some("web1".into()),
            connection: Some("local".into()),
            user: Some("deploy".into()),
            module_path: Some("/opt/modules".into()),
            r#become: true,
            become_method: Some("sudo".into()),
            become_user: Some("root".into()),
            ask_become_pass: false,
            check: true,
            format: OutputFormat::OneLine,
        };
        assert_eq!(
            request.to_args(),
            vec![
                "web",
                "-i",
                "a.ini",
                "-i",
                "b.ini",
                "-m",
                "command",
                "-a",
                "uptime",
                "--limit",
                "web1",
                "--connection",
                "local",
                "--user",
                "deploy",
                "--module-path",
                "/opt/modules",
                "--become",
                "--become-method",
                "sudo",
                "--become-user",
                "root",
                "--check",
                "--one-line",
            ]
        );
    }

    #[test]
    fn test_become_options_need_become() {
        let request = AdHocRequest {
            pattern: "all".into(),
            module: "ping".into(),
            become_user: Some("root".into()),
            ..Default::default()
        };
        assert!(!request.to_args().contains(&"--become-user".to_string()));
    }

    #[test]
    fn test_parse_list_hosts() {
        let out = "[WARNING]: something\n  hosts (2):\n    web1\n    web2\n";
        assert_eq!(parse_list_hosts(out), vec!["web1", "web2"]);
        assert!(parse_list_hosts("  hosts (0):\n").is_empty());
    }

    #[test]
    fn test_into_success() {
        let failed = CommandOutput {
            command: "distronode all".into(),
            exit_code: 5,
            stdout: String::new(),
            stderr: "bad option\n".into(),
        };
        match failed.into_success() {
            Err(Error::Engine {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, 5);
                assert_eq!(stderr, "bad option");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
