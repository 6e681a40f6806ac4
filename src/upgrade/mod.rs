//! Upgrade orchestration

pub mod guard;
pub mod job;
pub mod status;
pub mod upgrader;

pub use guard::{ModuleGuard, ModuleGuardBuilder, UpgradeOutcome};
pub use job::UpgradeJob;
pub use status::{ModuleStatus, RunningScript, StatusReport, UpgradeReport};
pub use upgrader::{ModuleUpgrader, SchemaPlan, UpgradeEvent};
