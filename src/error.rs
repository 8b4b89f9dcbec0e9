//! Error types for distronode-test.
//!
//! Errors are reserved for precondition violations (missing configuration,
//! unmatched patterns, broken inventories, failing external tools). Per-host
//! failures during an ad-hoc run are data inside
//! [`AdHocResult`](crate::dispatcher::AdHocResult) and only become errors when
//! a caller asks for it.

use indexmap::IndexMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::dispatcher::ModuleResult;

/// Result type alias for distronode-test operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Exit statuses understood by the test framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// All tests passed.
    Ok = 0,
    /// At least one test failed.
    TestsFailed = 1,
    /// The run was interrupted.
    Interrupted = 2,
    /// An internal error occurred.
    InternalError = 3,
    /// The command line or configuration was unusable.
    UsageError = 4,
    /// Nothing was collected.
    NoTestsCollected = 5,
}

impl ExitCode {
    /// Numeric process exit status.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// The main error type for distronode-test.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Mandatory parameters are missing; every violated rule is listed.
    #[error("{}", .violations.join("\n"))]
    Usage {
        /// One message per violated rule
        violations: Vec<String>,
    },

    /// The inventory could not be loaded by the engine.
    #[error("Unable to load inventory '{source_name}': {message}")]
    Configuration {
        /// Inventory source as given in the options
        source_name: String,
        /// Error message
        message: String,
    },

    /// Invalid option value supplied through a marker or call-time override.
    #[error("Invalid value for option '{key}': {message}")]
    InvalidOption {
        /// Option key
        key: String,
        /// Error message
        message: String,
    },

    /// Engine version is older than any supported generation.
    #[error("Unsupported distronode version: {0}")]
    UnsupportedEngine(String),

    // ========================================================================
    // Host Resolution Errors
    // ========================================================================
    /// No host or group matches the key.
    #[error("No hosts or groups match '{0}'")]
    HostNotFound(String),

    /// Attribute-style lookup found no host or group.
    #[error("Host manager has no attribute '{0}'")]
    UnknownAttribute(String),

    /// A `~regex` pattern failed to compile.
    #[error("Invalid host list pattern: {0}")]
    InvalidPattern(String),

    /// A dispatch pattern resolved to zero hosts.
    #[error("Specified hosts and/or --limit does not match any hosts: '{pattern}'")]
    NoHostsMatched {
        /// The pattern that matched nothing
        pattern: String,
    },

    // ========================================================================
    // Dispatch Errors
    // ========================================================================
    /// One or more hosts were unreachable.
    #[error("{message}")]
    ConnectionFailure {
        /// Error message
        message: String,
        /// Hosts that could not be reached
        dark: IndexMap<String, ModuleResult>,
        /// Hosts that responded
        contacted: IndexMap<String, ModuleResult>,
    },

    /// The remote operation reported failure on one or more hosts.
    #[error("Module '{module}' failed: {message}")]
    ModuleExecution {
        /// Module name
        module: String,
        /// Error message
        message: String,
        /// Failed hosts with their payloads
        failed: IndexMap<String, ModuleResult>,
    },

    /// An external command failed or produced unusable output.
    #[error("Command '{command}' failed with exit code {exit_code}: {stderr}")]
    Engine {
        /// Command line that was run
        command: String,
        /// Process exit code (-1 when killed by a signal)
        exit_code: i32,
        /// Captured standard error
        stderr: String,
    },

    // ========================================================================
    // Scenario Errors
    // ========================================================================
    /// Scenario collection found nothing.
    #[error("No molecule scenarios found in: {}", .0.display())]
    NoScenarios(PathBuf),

    /// `--molecule` was requested but molecule is not installed.
    #[error("molecule not installed or found, unable to collect scenarios")]
    MoleculeMissing,

    /// A scenario descriptor could not be parsed.
    #[error("Failed to parse scenario descriptor '{}': {message}", .path.display())]
    Descriptor {
        /// Descriptor path
        path: PathBuf,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Library Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// Configuration file error.
    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    /// Generic error with source.
    #[error("{message}")]
    Other {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a usage error from the list of violated rules.
    pub fn usage<I, S>(violations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Usage {
            violations: violations.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates a new configuration error.
    pub fn configuration(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Creates a new invalid option error.
    pub fn invalid_option(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a new external command error.
    pub fn engine(command: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::Engine {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Returns true if this error is a key-style lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::HostNotFound(_) | Error::UnknownAttribute(_))
    }

    /// Returns true if this error should be reported as a usage error.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::Usage { .. }
                | Error::Configuration { .. }
                | Error::InvalidOption { .. }
                | Error::UnsupportedEngine(_)
                | Error::MoleculeMissing
        )
    }

    /// Returns the exit status the runner reports for this error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            e if e.is_usage() => ExitCode::UsageError,
            Error::NoScenarios(_) => ExitCode::Interrupted,
            Error::Io(_) | Error::JsonParse(_) | Error::YamlParse(_) | Error::ConfigFile(_) => {
                ExitCode::InternalError
            }
            _ => ExitCode::TestsFailed,
        }
    }
}

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Adds context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Adds context with a closure that is only evaluated on error.
    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Other {
            message: message.into(),
            source: Some(Box::new(e)),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::Other {
            message: f().into(),
            source: Some(Box::new(e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_error_lists_every_violation() {
        let err = Error::usage(["first rule", "second rule"]);
        assert_eq!(err.to_string(), "first rule\nsecond rule");
        assert_eq!(err.exit_code(), ExitCode::UsageError);
        assert_eq!(err.exit_code().code(), 4);
    }

    #[test]
    fn test_not_found_kinds() {
        assert!(Error::HostNotFound("none".into()).is_not_found());
        assert!(Error::UnknownAttribute("none".into()).is_not_found());
        assert!(!Error::NoHostsMatched {
            pattern: "none".into()
        }
        .is_not_found());
    }

    #[test]
    fn test_configuration_error_is_usage() {
        let err = Error::configuration("missing.ini", "no such file");
        assert!(err.is_usage());
        assert!(err.to_string().contains("missing.ini"));
    }

    #[test]
    fn test_context() {
        let io: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "gone",
        ));
        let err = io.context("reading descriptor").unwrap_err();
        assert_eq!(err.to_string(), "reading descriptor");
        assert_eq!(err.exit_code(), ExitCode::TestsFailed);
    }
}
