//! Per-module lifecycle states and the process-wide upgrade state

use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of one module
///
/// `Disabled -> Loading -> InstallRequired -> Installing -> InstallComplete -> ReadyToRun -> Running`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModuleState {
    Disabled,
    Loading,
    InstallRequired,
    Installing,
    InstallComplete,
    ReadyToRun,
    Running,
}

impl ModuleState {
    pub const ALL: [ModuleState; 7] = [
        ModuleState::Disabled,
        ModuleState::Loading,
        ModuleState::InstallRequired,
        ModuleState::Installing,
        ModuleState::InstallComplete,
        ModuleState::ReadyToRun,
        ModuleState::Running,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleState::Disabled => "Disabled",
            ModuleState::Loading => "Loading",
            ModuleState::InstallRequired => "InstallRequired",
            ModuleState::Installing => "Installing",
            ModuleState::InstallComplete => "InstallComplete",
            ModuleState::ReadyToRun => "ReadyToRun",
            ModuleState::Running => "Running",
        }
    }

    /// Operator-facing description shown on the status page
    pub fn describe(&self, installed: Version, target: Version) -> String {
        match self {
            ModuleState::InstallRequired if installed.is_zero() => "Not Installed.".to_string(),
            ModuleState::InstallRequired => format!("Upgrade Required: {installed} -> {target}"),
            ModuleState::ReadyToRun => format!("Version {installed} ready to run."),
            ModuleState::Running => format!("Version {installed} running."),
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModuleState::ALL
            .iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown module state '{s}'"))
    }
}

/// Process-wide upgrade state
///
/// `UpgradeComplete` is terminal for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpgradeState {
    UpgradeRequired,
    UpgradeInProgress,
    UpgradeComplete,
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpgradeState::UpgradeRequired => "UpgradeRequired",
            UpgradeState::UpgradeInProgress => "UpgradeInProgress",
            UpgradeState::UpgradeComplete => "UpgradeComplete",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_install_required() {
        let state = ModuleState::InstallRequired;
        assert_eq!(state.describe(Version::ZERO, Version::new(123, 1)), "Not Installed.");
        assert_eq!(
            state.describe(Version::new(121, 1), Version::new(123, 1)),
            "Upgrade Required: 12.10 -> 12.30"
        );
    }

    #[test]
    fn test_describe_ready_and_running() {
        let v = Version::new(1430, 2);
        assert_eq!(ModuleState::ReadyToRun.describe(v, v), "Version 14.30 ready to run.");
        assert_eq!(ModuleState::Running.describe(v, v), "Version 14.30 running.");
        assert_eq!(ModuleState::Installing.describe(v, v), "Installing");
    }

    #[test]
    fn test_states_round_trip_through_strings() {
        for state in ModuleState::ALL {
            assert_eq!(state.as_str().parse::<ModuleState>().unwrap(), state);
        }
        assert!("Sleeping".parse::<ModuleState>().is_err());
    }
}
