//! Error types for module ordering, script handling and upgrades
//!
//! Errors raised while the mandatory core module is being upgraded are fatal to
//! the whole bootstrap. Errors raised for any other module are recorded against
//! that module only and surface through the status report.

use crate::lifecycle::UpgradeState;
use crate::version::{ParseVersionError, Version};
use std::path::PathBuf;

/// Failure raised by a module's `initialize()` or `startup()` hook
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while ordering modules by their declared dependencies
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SortError {
    /// The dependency graph contains a cycle; the listed modules could not be ordered
    #[error("circular module dependency detected between: {}", modules.join(", "))]
    Cycle { modules: Vec<String> },

    /// A module declares a dependency on a module that was not discovered
    #[error("module '{module}' depends on '{dependency}', which was not found")]
    MissingDependency { module: String, dependency: String },

    /// No discovered module is flagged as the core module
    #[error("could not find the core module; exactly one module must be flagged as core")]
    MissingCore,

    /// More than one discovered module is flagged as the core module
    #[error("more than one module is flagged as core: {}", modules.join(", "))]
    MultipleCore { modules: Vec<String> },

    /// The core module must sort first, so it cannot depend on anything
    #[error("core module '{module}' cannot declare dependencies (found '{dependency}')")]
    CoreHasDependencies { module: String, dependency: String },

    /// Two modules share a name (names are case-insensitive)
    #[error("module name '{name}' is declared more than once")]
    DuplicateModule { name: String },
}

/// Errors raised while reading or parsing SQL script files
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("script file name '{filename}' does not match <schema>-<from>-<to>.sql, <schema>-create.sql or <schema>-drop.sql")]
    InvalidFilename { filename: String },

    #[error("script '{filename}' has an invalid version: {source}")]
    InvalidVersion {
        filename: String,
        #[source]
        source: ParseVersionError,
    },

    #[error("script '{filename}' must move forward: {from} -> {to}")]
    InvalidRange {
        filename: String,
        from: Version,
        to: Version,
    },

    #[error("failed to read script {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("module '{module}' has no directory to read scripts from")]
    NoModuleDirectory { module: String },

    #[error("script file name pattern failed to compile: {0}")]
    Pattern(#[source] regex::Error),
}

/// No gap-free chain of scripts connects the installed version to the target
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no migration path for schema '{schema}' from {from} to {target}; last reachable version is {reached}")]
pub struct NoMigrationPath {
    pub schema: String,
    pub from: Version,
    pub reached: Version,
    pub target: Version,
}

/// Error reported by the script executor collaborator
#[derive(Debug, thiserror::Error)]
#[error("SQL error: {message}")]
pub struct SqlError {
    pub message: String,
    #[source]
    pub source: Option<HookError>,
}

impl SqlError {
    /// Create an error carrying only a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

impl From<may_postgres::Error> for SqlError {
    fn from(err: may_postgres::Error) -> Self {
        Self {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Errors from the module lifecycle store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("module store query failed: {0}")]
    Sql(#[from] SqlError),

    #[error("corrupt module record '{name}': {reason}")]
    Corrupt { name: String, reason: String },

    #[error("module store lock poisoned")]
    Poisoned,
}

impl From<may_postgres::Error> for StoreError {
    fn from(err: may_postgres::Error) -> Self {
        StoreError::Sql(SqlError::from(err))
    }
}

/// Errors raised while discovering modules on disk
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("modules directory {} does not exist", path.display())]
    MissingDirectory { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid module descriptor {}: {source}", path.display())]
    InvalidDescriptor {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("module in {} has an empty name", path.display())]
    EmptyName { path: PathBuf },
}

/// Errors raised by the upgrade orchestrator
#[derive(Debug, thiserror::Error)]
pub enum UpgradeError {
    #[error(transparent)]
    Sort(#[from] SortError),

    #[error("can't upgrade core module '{module}' from version {installed}; installed version must be {earliest} or greater")]
    UnsupportedUpgradePath {
        module: String,
        installed: Version,
        earliest: Version,
    },

    #[error(transparent)]
    NoMigrationPath(#[from] NoMigrationPath),

    #[error("script '{script}' failed for module '{module}': {source}")]
    Sql {
        module: String,
        script: String,
        #[source]
        source: SqlError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("module '{module}' failed to initialize: {message}")]
    Initialize { module: String, message: String },

    #[error("module '{module}' was skipped because its dependency '{dependency}' failed")]
    DependencyFailed { module: String, dependency: String },

    #[error("module '{module}' was disabled because its dependency '{dependency}' is disabled")]
    DependencyDisabled { module: String, dependency: String },

    #[error("unknown module '{0}'")]
    UnknownModule(String),

    #[error("module '{0}' is still present on disk and cannot be removed")]
    ModuleInUse(String),

    #[error("an upgrade cannot start while the upgrade state is {0}")]
    NotRequired(UpgradeState),

    #[error("the background upgrade worker stopped without reporting a result")]
    WorkerLost,

    #[error("failed to spawn the background upgrade worker: {0}")]
    Spawn(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_error_lists_modules() {
        let err = SortError::Cycle {
            modules: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "circular module dependency detected between: a, b");
    }

    #[test]
    fn test_no_migration_path_mentions_reached_version() {
        let err = NoMigrationPath {
            schema: "core".to_string(),
            from: Version::ZERO,
            reached: Version::new(1030, 2),
            target: Version::new(1100, 2),
        };
        let display = err.to_string();
        assert!(display.contains("core"));
        assert!(display.contains("10.30"));
        assert!(display.contains("11.00"));
    }

    #[test]
    fn test_unsupported_upgrade_path_display() {
        let err = UpgradeError::UnsupportedUpgradePath {
            module: "Core".to_string(),
            installed: Version::new(92, 1),
            earliest: Version::new(103, 1),
        };
        assert!(err.to_string().contains("9.20"));
        assert!(err.to_string().contains("10.30"));
    }
}
