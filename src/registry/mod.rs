//! Module registry
//!
//! The registry is built once at bootstrap from the discovered modules and
//! holds them in dependency order. Every per-module pass (initialize, upgrade,
//! startup) iterates it in that order.

pub mod ordering;

pub use ordering::{build_dependency_graph, sort, topological_sort, validate_dependencies};

use crate::error::SortError;
use crate::module::{Module, ModuleDescriptor, SimpleModule};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Sorted, name-indexed set of modules
#[derive(Clone)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn Module>>,
    index: HashMap<String, usize>,
}

impl ModuleRegistry {
    /// Sort `modules` by dependency and index them by name
    ///
    /// # Errors
    ///
    /// Returns `SortError` on cycles, unknown dependencies, duplicate names or
    /// anything other than exactly one core module.
    pub fn new(modules: Vec<Arc<dyn Module>>) -> Result<Self, SortError> {
        let descriptors: Vec<ModuleDescriptor> =
            modules.iter().map(|m| m.descriptor().clone()).collect();
        let order = topological_sort(&descriptors)?;

        let mut slots: Vec<Option<Arc<dyn Module>>> = modules.into_iter().map(Some).collect();
        let sorted: Vec<Arc<dyn Module>> = order
            .into_iter()
            .filter_map(|i| slots.get_mut(i).and_then(Option::take))
            .collect();

        let index = sorted
            .iter()
            .enumerate()
            .map(|(i, m)| (m.descriptor().key(), i))
            .collect();

        log::debug!(
            "Module order: {}",
            sorted
                .iter()
                .map(|m| m.descriptor().name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            modules: sorted,
            index,
        })
    }

    /// Build a registry of hook-less modules
    ///
    /// # Errors
    ///
    /// See [`ModuleRegistry::new`].
    pub fn from_descriptors(descriptors: Vec<ModuleDescriptor>) -> Result<Self, SortError> {
        Self::new(descriptors.into_iter().map(SimpleModule::shared).collect())
    }

    /// Modules in dependency order, core first
    pub fn modules(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.iter().map(|m| m.descriptor())
    }

    /// Case-insensitive lookup
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Module>> {
        self.index
            .get(&name.to_lowercase())
            .and_then(|&i| self.modules.get(i))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&name.to_lowercase())
    }

    /// The core module; always present in a successfully built registry
    pub fn core(&self) -> Option<&Arc<dyn Module>> {
        self.modules.first().filter(|m| m.descriptor().is_core)
    }

    /// Position of a module in the dependency order
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(&name.to_lowercase()).copied()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.modules.iter().map(|m| &m.descriptor().name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    #[test]
    fn test_registry_orders_and_indexes() {
        let registry = ModuleRegistry::from_descriptors(vec![
            ModuleDescriptor::new("Wiki", Version::new(100, 2)).with_dependencies(["Search"]),
            ModuleDescriptor::new("Search", Version::new(100, 2)),
            ModuleDescriptor::new("Core", Version::new(100, 2)).core(),
        ])
        .unwrap();

        let names: Vec<&str> = registry.descriptors().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Core", "Search", "Wiki"]);
        assert_eq!(registry.core().unwrap().descriptor().name, "Core");
        assert_eq!(registry.get("WIKI").unwrap().descriptor().name, "Wiki");
        assert_eq!(registry.position("search"), Some(1));
        assert!(!registry.contains("issues"));
        assert_eq!(registry.len(), 3);
    }
}
