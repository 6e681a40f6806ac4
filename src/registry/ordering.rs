//! Dependency ordering and validation for modules
//!
//! This module provides functionality to:
//! - Build the module dependency graph
//! - Validate that every declared dependency exists
//! - Topologically sort modules, core first, ties broken by discovery order

use crate::error::SortError;
use crate::module::ModuleDescriptor;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Build a dependency graph keyed by lowercased module name
///
/// Each entry lists the (lowercased, de-duplicated) modules it depends on.
pub fn build_dependency_graph(modules: &[ModuleDescriptor]) -> HashMap<String, Vec<String>> {
    modules
        .iter()
        .map(|m| (m.key(), dependency_keys(m)))
        .collect()
}

fn dependency_keys(module: &ModuleDescriptor) -> Vec<String> {
    let mut seen = HashSet::new();
    module
        .dependencies
        .iter()
        .map(|d| d.to_lowercase())
        .filter(|d| seen.insert(d.clone()))
        .collect()
}

/// Validate names, the core flag and dependency references
///
/// # Errors
///
/// - `SortError::DuplicateModule` if two modules share a name
/// - `SortError::MissingCore` / `SortError::MultipleCore` unless exactly one module is core
/// - `SortError::CoreHasDependencies` if the core module depends on anything
/// - `SortError::MissingDependency` for the first unknown dependency found
pub fn validate_dependencies(modules: &[ModuleDescriptor]) -> Result<(), SortError> {
    let mut names = HashSet::new();
    for module in modules {
        if !names.insert(module.key()) {
            return Err(SortError::DuplicateModule {
                name: module.name.clone(),
            });
        }
    }

    let cores: Vec<&ModuleDescriptor> = modules.iter().filter(|m| m.is_core).collect();
    match cores.as_slice() {
        [] => return Err(SortError::MissingCore),
        [core] => {
            if let Some(dependency) = core.dependencies.first() {
                return Err(SortError::CoreHasDependencies {
                    module: core.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        _ => {
            return Err(SortError::MultipleCore {
                modules: cores.iter().map(|m| m.name.clone()).collect(),
            })
        }
    }

    for module in modules {
        for dependency in &module.dependencies {
            if !names.contains(&dependency.to_lowercase()) {
                return Err(SortError::MissingDependency {
                    module: module.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Topologically sort modules by their dependencies
///
/// Returns indexes into `modules`: the core module first, then dependencies
/// before dependents. Among modules that are ready at the same time the one
/// discovered first wins, so the order is identical on every run.
///
/// # Errors
///
/// Any validation error from [`validate_dependencies`], or `SortError::Cycle`
/// naming the modules that could not be ordered.
pub fn topological_sort(modules: &[ModuleDescriptor]) -> Result<Vec<usize>, SortError> {
    validate_dependencies(modules)?;

    let position: HashMap<String, usize> = modules
        .iter()
        .enumerate()
        .map(|(i, m)| (m.key(), i))
        .collect();

    // For each module, the modules that depend on it
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); modules.len()];
    let mut in_degree: Vec<usize> = vec![0; modules.len()];

    for (i, module) in modules.iter().enumerate() {
        for dependency in dependency_keys(module) {
            if let Some(&dep) = position.get(&dependency) {
                dependents[dep].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut ready: BTreeSet<usize> = BTreeSet::new();
    if let Some(core) = modules.iter().position(|m| m.is_core) {
        ready.insert(core);
    }

    let mut result = Vec::with_capacity(modules.len());
    let mut emitted = vec![false; modules.len()];

    // Only core is ready at first; it has no dependencies
    while let Some(current) = ready.pop_first() {
        emitted[current] = true;
        result.push(current);

        for &dependent in &dependents[current] {
            in_degree[dependent] -= 1;
        }

        if result.len() == 1 {
            // Core is out; every root module becomes ready in discovery order
            for (i, degree) in in_degree.iter().enumerate() {
                if *degree == 0 && !emitted[i] {
                    ready.insert(i);
                }
            }
        } else {
            for &dependent in &dependents[current] {
                if in_degree[dependent] == 0 && !emitted[dependent] {
                    ready.insert(dependent);
                }
            }
        }
    }

    if result.len() != modules.len() {
        let stuck = modules
            .iter()
            .enumerate()
            .filter(|(i, _)| !emitted[*i])
            .map(|(_, m)| m.name.clone())
            .collect();
        return Err(SortError::Cycle { modules: stuck });
    }

    Ok(result)
}

/// Sort module descriptors, returning them in dependency order
///
/// # Errors
///
/// See [`topological_sort`].
pub fn sort(modules: &[ModuleDescriptor]) -> Result<Vec<ModuleDescriptor>, SortError> {
    Ok(topological_sort(modules)?
        .into_iter()
        .map(|i| modules[i].clone())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    fn module(name: &str, deps: &[&str]) -> ModuleDescriptor {
        ModuleDescriptor::new(name, Version::new(100, 2)).with_dependencies(deps.iter().copied())
    }

    fn core() -> ModuleDescriptor {
        ModuleDescriptor::new("Core", Version::new(1430, 2)).core()
    }

    fn names(sorted: &[ModuleDescriptor]) -> Vec<&str> {
        sorted.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn test_topological_sort_simple() {
        let modules = vec![
            module("Study", &["Experiment"]),
            module("Experiment", &["Core"]),
            core(),
        ];
        let sorted = sort(&modules).unwrap();
        assert_eq!(names(&sorted), vec!["Core", "Experiment", "Study"]);
    }

    #[test]
    fn test_core_first_even_when_discovered_last() {
        let modules = vec![module("Wiki", &[]), module("Issues", &[]), core()];
        let sorted = sort(&modules).unwrap();
        assert_eq!(names(&sorted), vec!["Core", "Wiki", "Issues"]);
    }

    #[test]
    fn test_ties_keep_discovery_order() {
        let modules = vec![
            core(),
            module("Zeta", &["Core"]),
            module("Alpha", &["Core"]),
            module("Mid", &["Alpha"]),
            module("Beta", &[]),
        ];
        let first = sort(&modules).unwrap();
        assert_eq!(names(&first), vec!["Core", "Zeta", "Alpha", "Mid", "Beta"]);
        for _ in 0..10 {
            assert_eq!(sort(&modules).unwrap(), first);
        }
    }

    #[test]
    fn test_dependency_names_are_case_insensitive() {
        let modules = vec![core(), module("Wiki", &["CORE", "core"])];
        let sorted = sort(&modules).unwrap();
        assert_eq!(names(&sorted), vec!["Core", "Wiki"]);
    }

    #[test]
    fn test_cycle_detected() {
        let modules = vec![core(), module("A", &["B"]), module("B", &["A"]), module("C", &[])];
        match sort(&modules) {
            Err(SortError::Cycle { modules }) => assert_eq!(modules, vec!["A", "B"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let modules = vec![core(), module("A", &["A"])];
        assert!(matches!(sort(&modules), Err(SortError::Cycle { .. })));
    }

    #[test]
    fn test_missing_dependency() {
        let modules = vec![core(), module("Wiki", &["Search"])];
        assert_eq!(
            sort(&modules),
            Err(SortError::MissingDependency {
                module: "Wiki".to_string(),
                dependency: "Search".to_string(),
            })
        );
    }

    #[test]
    fn test_core_validation() {
        assert_eq!(sort(&[module("Wiki", &[])]), Err(SortError::MissingCore));

        let two = vec![core(), ModuleDescriptor::new("Other", Version::ZERO).core()];
        assert!(matches!(sort(&two), Err(SortError::MultipleCore { .. })));

        let dependent_core = vec![core().with_dependencies(["Wiki"]), module("Wiki", &[])];
        assert!(matches!(
            sort(&dependent_core),
            Err(SortError::CoreHasDependencies { .. })
        ));

        let dup = vec![core(), module("Wiki", &[]), module("wiki", &[])];
        assert!(matches!(sort(&dup), Err(SortError::DuplicateModule { .. })));
    }

    #[test]
    fn test_build_dependency_graph() {
        let graph = build_dependency_graph(&[core(), module("Wiki", &["Core", "CORE"])]);
        assert_eq!(graph["wiki"], vec!["core"]);
        assert!(graph["core"].is_empty());
    }
}
