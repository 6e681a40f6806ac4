//! Upgrade status reporting
//!
//! The status report is the externally observable shape of upgrade progress.
//! It is built from live in-memory state, so it shows scripts that are running
//! right now, not just what has been persisted.

use crate::lifecycle::{ModuleState, UpgradeState};
use crate::script::Script;
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A script currently being executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningScript {
    pub schema: String,
    pub filename: String,
    pub from_version: Version,
    pub to_version: Version,
    pub started_at: DateTime<Utc>,
}

impl RunningScript {
    pub fn from_script(script: &Script) -> Self {
        Self {
            schema: script.schema.clone(),
            filename: script.filename.clone(),
            from_version: script.from_version,
            to_version: script.to_version,
            started_at: Utc::now(),
        }
    }
}

/// Status of one module
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    pub name: String,
    pub state: ModuleState,
    pub state_description: String,
    pub message: Option<String>,
    pub original_version: Version,
    pub installed_version: Version,
    /// Version the module's code expects
    pub version: Version,
    pub schemas: Vec<String>,
    pub running_scripts: Vec<RunningScript>,
    pub failure: Option<String>,
}

/// Snapshot of the whole upgrade
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub state: UpgradeState,
    pub upgrade_required: bool,
    pub upgrade_in_progress: bool,
    pub startup_complete: bool,
    pub new_install: bool,
    pub currently_upgrading_module: Option<String>,
    /// Modules in dependency order
    pub modules: Vec<ModuleStatus>,
    /// Failures keyed by module name, in the order they happened
    pub failures: Vec<(String, String)>,
    /// Set when an upgrade batch could not bring every module to its target
    pub startup_failure: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl StatusReport {
    pub fn module(&self, name: &str) -> Option<&ModuleStatus> {
        self.modules.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    /// Pretty JSON rendering
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Outcome of one upgrade batch
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeReport {
    /// Modules brought to their target version, in the order they were upgraded
    pub upgraded: Vec<String>,
    /// Modules whose upgrade failed or was skipped, with the reason
    pub failed: Vec<(String, String)>,
    pub scripts_run: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl UpgradeReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}
