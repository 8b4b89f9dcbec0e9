//! # distronode-test - infrastructure tests against a distronode inventory
//!
//! distronode-test plugs the distronode automation engine into a test runner.
//! Tests get keyed access to the hosts and groups of an inventory, run
//! engine modules against them in ad-hoc mode and receive per-host results.
//! Molecule scenarios found below the project root are collected as test
//! items of their own.
//!
//! ## Core Concepts
//!
//! - **HostManager**: hosts and groups of the primary inventory (and an
//!   optional extra inventory), addressed by host pattern
//! - **ModuleDispatcher**: runs one module against the hosts a pattern selects
//! - **AdHocResult**: per-host outcomes split into contacted and unreachable
//! - **ConfigResolver**: command line, test marker and call-time overrides
//!   merged into one set of [`Options`](config::Options)
//! - **AdapterStrategy**: the inventory adapter matching the installed engine
//! - **ScenarioItem**: one `molecule.yml` scenario with its markers
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │            Plugin (flags, fixtures, parametrization)         │
//! └──────────────────────────────────────────────────────────────┘
//!            │                                   │
//!            ▼                                   ▼
//! ┌─────────────────────────┐        ┌───────────────────────────┐
//! │ ConfigResolver          │        │ ScenarioDiscovery         │
//! │ HostManager             │        │ (molecule.yml → items)    │
//! │  └─ ModuleDispatcher    │        └───────────────────────────┘
//! └─────────────────────────┘                    │
//!            │                                   ▼
//!            ▼                           molecule subprocess
//! ┌─────────────────────────┐
//! │ Engine (distronode CLI) │
//! └─────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use distronode_test::prelude::*;
//! use std::path::Path;
//!
//! let plugin = Plugin::configure(PluginArgs::default(), 0, Path::new("."))?;
//! let fixtures = Fixtures::new(&plugin, TestRequest::new("test_ping"));
//!
//! let result = fixtures.module()?.invoke("ping", "")?;
//! for (host, outcome) in result.iter() {
//!     assert!(outcome.is_ok(), "{} did not answer", host);
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cli::PluginArgs;
    pub use crate::config::{ConfigResolver, EngineDefaults, Options, Overrides};
    pub use crate::dispatcher::{AdHocResult, HostOutcome, ModuleArgs, ModuleDispatcher, ModuleResult};
    pub use crate::engine::{Engine, ProcessEngine};
    pub use crate::error::{Error, ExitCode, Result};
    pub use crate::fixtures::Fixtures;
    pub use crate::host_manager::HostManager;
    pub use crate::inventory::{Group, Host, Inventory};
    pub use crate::molecule::{MoleculeScenario, RunConfig, ScenarioItem, ScenarioOutcome};
    pub use crate::plugin::{Plugin, TestItem, TestRequest};
    pub use crate::version::{AdapterStrategy, EngineVersion};
}

// ============================================================================
// Core
// ============================================================================

pub mod error;

pub mod config;

pub mod version;

pub mod engine;

// ============================================================================
// Inventory
// ============================================================================

pub mod inventory;

pub mod loader;

pub mod vars;

pub mod host_manager;

pub mod dispatcher;

// ============================================================================
// Runner Integration
// ============================================================================

pub mod cli;

pub mod logging;

pub mod plugin;

pub mod fixtures;

pub mod molecule;

pub mod units;
