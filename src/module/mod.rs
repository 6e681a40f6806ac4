//! Modules: descriptors, lifecycle hooks and discovery
//!
//! A module is an independently versioned unit owning zero or more database
//! schemas. Its static description ([`ModuleDescriptor`]) is discovered once at
//! process start and never changes afterwards. Behaviour is attached through
//! the [`Module`] trait, whose hooks run in dependency order.

pub mod discovery;

pub use discovery::{discover, DiscoveredModules, DESCRIPTOR_FILE};

use crate::error::HookError;
use crate::lifecycle::ModuleRecord;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Static description of a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Unique, compared case-insensitively
    pub name: String,
    /// Schema version the module's code expects
    pub version: Version,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub schemas: Vec<String>,
    /// Exactly one module is the core module; it is ordered and upgraded first
    #[serde(default, rename = "core")]
    pub is_core: bool,
    /// Remove the module's schemas automatically once it disappears from disk
    #[serde(default)]
    pub auto_uninstall: bool,
    /// Module root directory, when the module was discovered on disk
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            dependencies: Vec::new(),
            schemas: Vec::new(),
            is_core: false,
            auto_uninstall: false,
            path: None,
        }
    }

    #[must_use]
    pub fn core(mut self) -> Self {
        self.is_core = true;
        self
    }

    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_schemas<I, S>(mut self, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schemas = schemas.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn auto_uninstall(mut self, auto_uninstall: bool) -> Self {
        self.auto_uninstall = auto_uninstall;
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Lowercased name used as the registry key
    #[must_use]
    pub fn key(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Behaviour attached to a module
///
/// Hooks report failures through `Err`; panics are caught by the orchestrator
/// and recorded the same way. A failure in one module never stops the others.
pub trait Module: Send + Sync {
    fn descriptor(&self) -> &ModuleDescriptor;

    /// Called once, in dependency order, before any non-core schema upgrade
    fn initialize(&self) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once after every schema is at its target version
    fn startup(&self, _record: &ModuleRecord) -> Result<(), HookError> {
        Ok(())
    }
}

/// A module with no hooks, described only by its descriptor
#[derive(Debug, Clone)]
pub struct SimpleModule {
    descriptor: ModuleDescriptor,
}

impl SimpleModule {
    pub fn new(descriptor: ModuleDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn shared(descriptor: ModuleDescriptor) -> Arc<dyn Module> {
        Arc::new(Self::new(descriptor))
    }
}

impl Module for SimpleModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }
}

/// Registers a module's non-SQL resources once startup completes
pub trait ResourceLoader: Send + Sync {
    fn register(&self, modules: &[ModuleDescriptor]) -> Result<(), HookError>;
}
