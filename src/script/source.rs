//! Script stores: where a module's SQL scripts come from

use crate::error::ScriptError;
use crate::module::ModuleDescriptor;
use crate::script::{Script, ScriptKind};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory, relative to a module's root, holding its SQL scripts
pub const SCRIPTS_DIR: &str = "scripts";

/// Supplies the scripts declared for one schema of one module
pub trait ScriptSource: Send + Sync {
    /// Every script (upgrade, create and drop) for `schema`, sorted
    ///
    /// # Errors
    ///
    /// Returns `ScriptError` if the scripts cannot be read or parsed.
    fn scripts(&self, module: &ModuleDescriptor, schema: &str) -> Result<Vec<Script>, ScriptError>;

    /// Only the versioned upgrade scripts for `schema`
    fn upgrade_scripts(
        &self,
        module: &ModuleDescriptor,
        schema: &str,
    ) -> Result<Vec<Script>, ScriptError> {
        Ok(self
            .scripts(module, schema)?
            .into_iter()
            .filter(Script::is_upgrade)
            .collect())
    }

    /// The `<schema>-create.sql` script, if the module ships one
    fn create_script(
        &self,
        module: &ModuleDescriptor,
        schema: &str,
    ) -> Result<Option<Script>, ScriptError> {
        Ok(self
            .scripts(module, schema)?
            .into_iter()
            .find(|s| s.kind == ScriptKind::Create))
    }

    /// The `<schema>-drop.sql` script, if the module ships one
    fn drop_script(
        &self,
        module: &ModuleDescriptor,
        schema: &str,
    ) -> Result<Option<Script>, ScriptError> {
        Ok(self
            .scripts(module, schema)?
            .into_iter()
            .find(|s| s.kind == ScriptKind::Drop))
    }
}

/// Reads scripts from `<module dir>/scripts/`
///
/// Files that do not belong to the requested schema are ignored; files that
/// look like `.sql` scripts but whose names cannot be parsed are logged and
/// skipped so one stray file does not block an upgrade.
#[derive(Debug, Clone, Default)]
pub struct FileScriptSource;

impl FileScriptSource {
    pub fn new() -> Self {
        Self
    }

    fn scripts_dir(module: &ModuleDescriptor) -> Result<PathBuf, ScriptError> {
        module
            .path
            .as_ref()
            .map(|p| p.join(SCRIPTS_DIR))
            .ok_or_else(|| ScriptError::NoModuleDirectory {
                module: module.name.clone(),
            })
    }
}

impl ScriptSource for FileScriptSource {
    fn scripts(&self, module: &ModuleDescriptor, schema: &str) -> Result<Vec<Script>, ScriptError> {
        let dir = Self::scripts_dir(module)?;
        read_scripts(&module.name, &dir, schema)
    }
}

/// Read every script for `schema` from `dir`
///
/// A missing directory yields no scripts.
///
/// # Errors
///
/// Returns `ScriptError::Io` if the directory or a script cannot be read.
pub fn read_scripts(module: &str, dir: &Path, schema: &str) -> Result<Vec<Script>, ScriptError> {
    if !dir.is_dir() {
        log::debug!("No scripts directory for module {} at {}", module, dir.display());
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir).map_err(|source| ScriptError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let prefix = format!("{}-", schema.to_lowercase());
    let mut scripts = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|source| ScriptError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        if path.extension().and_then(|s| s.to_str()) != Some("sql") {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !filename.to_lowercase().starts_with(&prefix) {
            continue;
        }

        let contents = fs::read_to_string(&path).map_err(|source| ScriptError::Io {
            path: path.clone(),
            source,
        })?;

        match Script::from_file(module, filename, contents) {
            Ok(script) if script.schema.eq_ignore_ascii_case(schema) => scripts.push(script),
            Ok(_) => {}
            Err(e) => log::warn!("Ignoring script {}: {}", path.display(), e),
        }
    }

    scripts.sort();
    Ok(scripts)
}

/// In-memory scripts keyed by module, for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticScriptSource {
    scripts: HashMap<String, Vec<Script>>,
}

impl StaticScriptSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a script by file name, builder style
    ///
    /// # Errors
    ///
    /// Returns `ScriptError` if the file name cannot be parsed.
    pub fn with_script(
        mut self,
        module: &str,
        filename: &str,
        contents: &str,
    ) -> Result<Self, ScriptError> {
        self.add(Script::from_file(module, filename, contents)?);
        Ok(self)
    }

    pub fn add(&mut self, script: Script) {
        self.scripts
            .entry(script.module.to_lowercase())
            .or_default()
            .push(script);
    }
}

impl ScriptSource for StaticScriptSource {
    fn scripts(&self, module: &ModuleDescriptor, schema: &str) -> Result<Vec<Script>, ScriptError> {
        let mut scripts: Vec<Script> = self
            .scripts
            .get(&module.name.to_lowercase())
            .map(|all| {
                all.iter()
                    .filter(|s| s.schema.eq_ignore_ascii_case(schema))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        scripts.sort();
        Ok(scripts)
    }
}
