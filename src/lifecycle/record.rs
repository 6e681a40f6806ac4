//! `ModuleRecord` - one persisted row per module in `core.modules`

use crate::lifecycle::ModuleState;
use crate::module::ModuleDescriptor;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Durable lifecycle state of one module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub name: String,

    /// `to_version` of the last script applied; only ever increases
    pub installed_version: Version,

    /// Installed version when this process first saw the record (0 for a new install).
    /// Captured once and never updated by the store.
    pub original_version: Version,

    pub schemas: Vec<String>,

    pub auto_uninstall: bool,

    pub state: ModuleState,

    pub message: Option<String>,

    /// Version reached by each owned schema, keyed by lowercased schema name
    #[serde(default)]
    pub schema_versions: BTreeMap<String, Version>,

    /// True when the record was created by this process; not persisted
    #[serde(skip)]
    pub new_install: bool,
}

impl ModuleRecord {
    /// Record for a module that has never been installed
    #[must_use]
    pub fn new_install(descriptor: &ModuleDescriptor) -> Self {
        Self {
            name: descriptor.name.clone(),
            installed_version: Version::ZERO,
            original_version: Version::ZERO,
            schemas: descriptor.schemas.clone(),
            auto_uninstall: descriptor.auto_uninstall,
            state: ModuleState::Loading,
            message: None,
            schema_versions: BTreeMap::new(),
            new_install: true,
        }
    }

    /// Version reached by `schema`
    ///
    /// Schemas without a checkpoint are assumed to be at the module's installed version.
    #[must_use]
    pub fn schema_version(&self, schema: &str) -> Version {
        self.schema_versions
            .get(&schema.to_lowercase())
            .copied()
            .unwrap_or(self.installed_version)
    }

    /// Checkpoint a schema after a script reached `version`
    ///
    /// The module's installed version becomes the lowest version reached by
    /// any of its schemas, and never moves backwards.
    pub fn record_schema_version(&mut self, schema: &str, version: Version) {
        self.schema_versions.insert(schema.to_lowercase(), version);

        let lowest = self
            .schemas
            .iter()
            .map(|s| self.schema_version(s))
            .min()
            .unwrap_or(version);
        self.set_installed_version(lowest);
    }

    /// Raise the installed version; lower values are ignored
    pub fn set_installed_version(&mut self, version: Version) {
        if version > self.installed_version {
            self.installed_version = version;
        }
    }

    /// Copy the descriptor's schema list and auto-uninstall flag onto the record
    ///
    /// Returns true when anything changed.
    pub fn refresh_from(&mut self, descriptor: &ModuleDescriptor) -> bool {
        let changed =
            self.schemas != descriptor.schemas || self.auto_uninstall != descriptor.auto_uninstall;
        self.schemas = descriptor.schemas.clone();
        self.auto_uninstall = descriptor.auto_uninstall;
        changed
    }

    /// Description of the current state against `target`
    #[must_use]
    pub fn describe(&self, target: Version) -> String {
        self.state.describe(self.installed_version, target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn record() -> ModuleRecord {
        ModuleRecord::new_install(
            &ModuleDescriptor::new("Study", v("12.3")).with_schemas(["study", "studydataset"]),
        )
    }

    #[test]
    fn test_new_install_defaults() {
        let record = record();
        assert!(record.new_install);
        assert!(record.installed_version.is_zero());
        assert!(record.original_version.is_zero());
        assert_eq!(record.state, ModuleState::Loading);
    }

    #[test]
    fn test_installed_version_tracks_slowest_schema() {
        let mut record = record();
        record.record_schema_version("study", v("12.1"));
        assert!(record.installed_version.is_zero());

        record.record_schema_version("StudyDataset", v("12.3"));
        assert_eq!(record.installed_version, v("12.1"));

        record.record_schema_version("study", v("12.3"));
        assert_eq!(record.installed_version, v("12.3"));
        assert_eq!(record.schema_version("STUDY"), v("12.3"));
    }

    #[test]
    fn test_installed_version_never_decreases() {
        let mut record = record();
        record.set_installed_version(v("12.3"));
        record.set_installed_version(v("11.1"));
        assert_eq!(record.installed_version, v("12.3"));
    }

    #[test]
    fn test_unknown_schema_falls_back_to_installed_version() {
        let mut record = record();
        record.set_installed_version(v("11.2"));
        assert_eq!(record.schema_version("study"), v("11.2"));
    }

    #[test]
    fn test_refresh_from_descriptor() {
        let mut record = record();
        let descriptor = ModuleDescriptor::new("Study", v("12.3"))
            .with_schemas(["study"])
            .auto_uninstall(true);
        assert!(record.refresh_from(&descriptor));
        assert!(!record.refresh_from(&descriptor));
        assert_eq!(record.schemas, vec!["study"]);
        assert!(record.auto_uninstall);
    }
}
