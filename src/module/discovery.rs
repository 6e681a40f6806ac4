//! On-disk module discovery
//!
//! Every subdirectory of the modules directory holding a `module.toml` file is
//! a module. Directories are visited in name order so discovery order, and
//! therefore the registry's tie-breaks, are stable across restarts.

use crate::error::DiscoveryError;
use crate::module::ModuleDescriptor;
use crate::version::Version;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the descriptor file inside each module directory
pub const DESCRIPTOR_FILE: &str = "module.toml";

#[derive(Debug, Deserialize)]
struct ModuleToml {
    name: Option<String>,
    version: Version,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    schemas: Vec<String>,
    #[serde(default)]
    core: bool,
    #[serde(default)]
    auto_uninstall: bool,
}

/// Result of scanning a modules directory
#[derive(Debug, Default)]
pub struct DiscoveredModules {
    /// Modules in discovery order
    pub modules: Vec<ModuleDescriptor>,
    /// Directories whose descriptor could not be loaded, keyed by directory name
    pub failures: Vec<(String, DiscoveryError)>,
}

/// Scan `dir` for module directories
///
/// A module whose name (case-insensitive) was already seen is skipped with a
/// warning. A directory whose descriptor cannot be read or parsed is recorded
/// in `failures` and the scan continues.
///
/// # Errors
///
/// Returns `DiscoveryError` if `dir` itself is missing or unreadable.
pub fn discover(dir: &Path) -> Result<DiscoveredModules, DiscoveryError> {
    if !dir.is_dir() {
        return Err(DiscoveryError::MissingDirectory {
            path: dir.to_path_buf(),
        });
    }

    let entries = fs::read_dir(dir).map_err(|source| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut module_dirs: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| DiscoveryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() && path.join(DESCRIPTOR_FILE).is_file() {
            module_dirs.push(path);
        }
    }
    module_dirs.sort();

    let mut discovered = DiscoveredModules::default();
    let mut seen: HashSet<String> = HashSet::new();

    for module_dir in module_dirs {
        let dir_name = module_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        match load_descriptor(&module_dir) {
            Ok(descriptor) => {
                if !seen.insert(descriptor.key()) {
                    log::warn!(
                        "Skipping module {} in {}: a module with that name was already loaded",
                        descriptor.name,
                        module_dir.display()
                    );
                    continue;
                }
                log::debug!("Discovered module {} {}", descriptor.name, descriptor.version);
                discovered.modules.push(descriptor);
            }
            Err(e) => {
                log::error!("Unable to load module in {}: {}", module_dir.display(), e);
                discovered.failures.push((dir_name, e));
            }
        }
    }

    log::info!("Discovered {} module(s) in {}", discovered.modules.len(), dir.display());
    Ok(discovered)
}

/// Load `<module_dir>/module.toml`
///
/// The module name defaults to the directory name.
///
/// # Errors
///
/// Returns `DiscoveryError` if the file cannot be read or parsed.
pub fn load_descriptor(module_dir: &Path) -> Result<ModuleDescriptor, DiscoveryError> {
    let path = module_dir.join(DESCRIPTOR_FILE);
    let text = fs::read_to_string(&path).map_err(|source| DiscoveryError::Io {
        path: path.clone(),
        source,
    })?;
    let raw: ModuleToml = toml::from_str(&text).map_err(|source| DiscoveryError::InvalidDescriptor {
        path: path.clone(),
        source,
    })?;

    let name = raw
        .name
        .or_else(|| module_dir.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default();
    if name.trim().is_empty() {
        return Err(DiscoveryError::EmptyName { path });
    }

    Ok(ModuleDescriptor {
        name,
        version: raw.version,
        dependencies: raw.dependencies,
        schemas: raw.schemas,
        is_core: raw.core,
        auto_uninstall: raw.auto_uninstall,
        path: Some(module_dir.to_path_buf()),
    })
}
