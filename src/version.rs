//! Engine version detection and adapter strategy selection.
//!
//! The inventory API of the engine changed shape twice. The installed version
//! is probed once per process and mapped to one [`AdapterStrategy`]; every
//! later caller reads the cached answer.

use once_cell::sync::{Lazy, OnceCell};
use regex::Regex;
use semver::{Prerelease, Version};
use std::fmt;
use tracing::{debug, warn};

use crate::engine::{Engine, OutputFormat};
use crate::error::{Error, Result};

static DETECTED: OnceCell<Option<EngineVersion>> = OnceCell::new();

static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?(?:[.\-]?(dev|alpha|beta|a|b|rc)\.?(\d*))?")
        .expect("version regex is valid")
});

/// A parsed engine version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineVersion(Version);

impl EngineVersion {
    /// Builds a release version.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// Extracts the first version number from `distronode --version` style
    /// output, e.g. `distronode [core 2.15.3]`, `distronode 2.9.27` or
    /// `2.8.0.dev0`.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(text)?;
        let number = |i: usize| -> Option<u64> {
            caps.get(i)
                .map_or(Some(0), |m| m.as_str().parse::<u64>().ok())
        };

        let mut version = Version::new(number(1)?, number(2)?, number(3)?);
        if let Some(tag) = caps.get(4) {
            let serial = caps.get(5).map_or("", |m| m.as_str());
            let serial = if serial.is_empty() { "0" } else { serial };
            version.pre = Prerelease::new(&format!("{}{}", tag.as_str(), serial)).ok()?;
        }
        Some(Self(version))
    }

    /// The underlying semantic version.
    pub fn as_semver(&self) -> &Version {
        &self.0
    }

    /// True when this version is at or above `major.minor.0`.
    pub fn at_least(&self, major: u64, minor: u64) -> bool {
        self.0 >= Version::new(major, minor, 0)
    }

    pub fn has_v2(&self) -> bool {
        self.at_least(2, 0)
    }

    pub fn has_v24(&self) -> bool {
        self.at_least(2, 4)
    }

    /// 2.8 development snapshots already carry the 2.8 inventory layout.
    pub fn has_v28(&self) -> bool {
        let mut dev = Version::new(2, 8, 0);
        dev.pre = Prerelease::new("dev0").unwrap_or(Prerelease::EMPTY);
        self.0 >= dev
    }

    pub fn has_v29(&self) -> bool {
        self.at_least(2, 9)
    }

    pub fn has_v212(&self) -> bool {
        self.at_least(2, 12)
    }

    pub fn has_v213(&self) -> bool {
        self.at_least(2, 13)
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The inventory adapter generation used for one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterStrategy {
    /// Single inventory object built from one host list, variables bound after
    /// construction.
    Legacy,
    /// Inventory manager over a list of sources plus a variable manager built
    /// on top of it.
    Managed,
    /// `Managed`, plus an optional second inventory tree loaded independently.
    ManagedWithExtra,
}

impl AdapterStrategy {
    /// Strategy used when the engine version cannot be determined.
    pub const NEWEST: AdapterStrategy = AdapterStrategy::ManagedWithExtra;

    /// Picks the strategy with the greatest threshold met by `version`.
    pub fn for_version(version: &EngineVersion) -> Result<Self> {
        if version.has_v212() {
            Ok(AdapterStrategy::ManagedWithExtra)
        } else if version.has_v24() {
            Ok(AdapterStrategy::Managed)
        } else if version.has_v2() {
            Ok(AdapterStrategy::Legacy)
        } else {
            Err(Error::UnsupportedEngine(version.to_string()))
        }
    }

    /// Whether an `extra_inventory` tree is honoured.
    pub fn supports_extra_inventory(self) -> bool {
        matches!(self, AdapterStrategy::ManagedWithExtra)
    }

    /// Whether a comma separated list of inventory paths is split into several
    /// sources.
    pub fn supports_multiple_sources(self) -> bool {
        !matches!(self, AdapterStrategy::Legacy)
    }

    /// How ad-hoc results are read back from the engine.
    pub fn output_format(self) -> OutputFormat {
        match self {
            AdapterStrategy::Legacy => OutputFormat::OneLine,
            AdapterStrategy::Managed | AdapterStrategy::ManagedWithExtra => OutputFormat::Json,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AdapterStrategy::Legacy => "legacy",
            AdapterStrategy::Managed => "managed",
            AdapterStrategy::ManagedWithExtra => "managed+extra",
        }
    }
}

impl fmt::Display for AdapterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Probes the engine version on first call and caches the answer for the
/// lifetime of the process.
pub fn detect(engine: &dyn Engine) -> Option<&'static EngineVersion> {
    DETECTED
        .get_or_init(|| match engine.version() {
            Ok(raw) => {
                let parsed = EngineVersion::parse(&raw);
                match &parsed {
                    Some(version) => debug!(%version, "Detected distronode version"),
                    None => warn!(output = %raw.trim(), "Unrecognised distronode version output"),
                }
                parsed
            }
            Err(e) => {
                warn!(error = %e, "Unable to probe distronode version");
                None
            }
        })
        .as_ref()
}

/// The cached version, without probing.
pub fn detected() -> Option<&'static EngineVersion> {
    DETECTED.get().and_then(Option::as_ref)
}

/// Strategy for the current process.
pub fn active_strategy(engine: &dyn Engine) -> Result<AdapterStrategy> {
    match detect(engine) {
        Some(version) => AdapterStrategy::for_version(version),
        None => {
            warn!(
                strategy = %AdapterStrategy::NEWEST,
                "Falling back to the newest inventory adapter"
            );
            Ok(AdapterStrategy::NEWEST)
        }
    }
}
