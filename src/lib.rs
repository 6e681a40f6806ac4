//! # Moduleguard
//!
//! Module dependency ordering, versioned SQL schema upgrades and startup
//! gating for pluggable applications.
//!
//! A host application registers its modules (or discovers them from
//! `module.toml` descriptors on disk), hands [`ModuleGuard`] a
//! [`ModuleStore`] and a [`ScriptExecutor`], and bootstraps:
//!
//! 1. modules are sorted so every module follows its dependencies;
//! 2. the core module is upgraded synchronously;
//! 3. the remaining modules are upgraded in the foreground, on a background
//!    `may` coroutine, or when an operator asks;
//! 4. [`StartupGate`] defers requests until the upgrade is complete, then runs
//!    every module's startup hook exactly once.
//!
//! Upgrade progress is checkpointed after every script, so an interrupted
//! upgrade resumes where it stopped.

pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod lifecycle;
pub mod metrics;
pub mod module;
pub mod postgres;
pub mod registry;
pub mod script;
pub mod upgrade;
pub mod version;

pub use config::{GateConfig, GuardConfig, UpgradeMode, UpgradeSettings};
pub use error::{
    DiscoveryError, HookError, NoMigrationPath, ScriptError, SortError, SqlError, StoreError,
    UpgradeError,
};
pub use executor::{ExecutedStatement, RecordingExecutor, ScriptExecutor};
pub use gate::{DeferredResponse, GateDecision, GateRequest, StartupGate};
pub use lifecycle::{MemoryModuleStore, ModuleRecord, ModuleState, ModuleStore, UpgradeState};
pub use module::{discover, DiscoveredModules, Module, ModuleDescriptor, ResourceLoader, SimpleModule};
pub use registry::ModuleRegistry;
pub use script::{FileScriptSource, Script, ScriptKind, ScriptSource, StaticScriptSource};
pub use upgrade::{
    ModuleGuard, ModuleGuardBuilder, ModuleStatus, StatusReport, UpgradeJob, UpgradeOutcome,
    UpgradeReport,
};
pub use version::Version;
