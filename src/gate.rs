//! Startup gate
//!
//! Consulted on every inbound request. Until the global upgrade state reaches
//! `UpgradeComplete`, only allow-listed requests get through; everything else
//! receives a fixed "upgrade in progress" response straight away. Nothing is
//! queued and no request waits for the upgrade.
//!
//! The first request that finds the upgrade complete triggers the one-time
//! module startup pass before it proceeds.

use crate::config::GateConfig;
use crate::upgrade::ModuleGuard;
use std::sync::Arc;

/// HTTP status used for deferred requests
pub const SERVICE_UNAVAILABLE: u16 = 503;

/// What the gate needs to know about a request
pub trait GateRequest {
    fn path(&self) -> &str;

    /// Explicitly marked as safe to serve during an upgrade
    fn allowed_during_upgrade(&self) -> bool {
        false
    }
}

impl GateRequest for str {
    fn path(&self) -> &str {
        self
    }
}

impl GateRequest for String {
    fn path(&self) -> &str {
        self.as_str()
    }
}

/// Fixed response for a deferred request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredResponse {
    pub status: u16,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Defer(DeferredResponse),
}

pub struct StartupGate {
    guard: Arc<ModuleGuard>,
    allowed_paths: Vec<String>,
    deferred_message: String,
}

impl StartupGate {
    pub fn new(guard: Arc<ModuleGuard>, config: &GateConfig) -> Self {
        Self {
            guard,
            allowed_paths: config.allowed_paths.clone(),
            deferred_message: config.deferred_message.clone(),
        }
    }

    pub fn guard(&self) -> &Arc<ModuleGuard> {
        &self.guard
    }

    /// Whether `request` may be served while an upgrade is pending or running
    ///
    /// Allow-list entries match the path exactly or as a prefix ending at a
    /// path segment or query boundary.
    pub fn is_allowed<R: GateRequest + ?Sized>(&self, request: &R) -> bool {
        if request.allowed_during_upgrade() {
            return true;
        }
        let path = request.path();
        self.allowed_paths.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'))
        })
    }

    /// True if `request` must get the deferred response
    ///
    /// Once the upgrade is complete this also runs the one-time startup pass.
    pub fn should_defer<R: GateRequest + ?Sized>(&self, request: &R) -> bool {
        if self.guard.is_upgrade_complete() {
            self.guard.ensure_startup_complete();
            return false;
        }
        !self.is_allowed(request)
    }

    pub fn admit<R: GateRequest + ?Sized>(&self, request: &R) -> GateDecision {
        if self.should_defer(request) {
            log::debug!("Deferring {} until the upgrade completes", request.path());
            GateDecision::Defer(DeferredResponse {
                status: SERVICE_UNAVAILABLE,
                message: self.deferred_message.clone(),
            })
        } else {
            GateDecision::Proceed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RecordingExecutor;
    use crate::lifecycle::{MemoryModuleStore, ModuleRecord, UpgradeState};
    use crate::module::ModuleDescriptor;
    use crate::script::StaticScriptSource;
    use crate::version::Version;

    fn guard(wiki_installed: Version) -> Arc<ModuleGuard> {
        let core = ModuleDescriptor::new("Core", Version::new(1200, 2)).core();
        let wiki = ModuleDescriptor::new("Wiki", Version::new(1200, 2))
            .with_dependencies(["Core"])
            .with_schemas(["wiki"]);
        let mut core_record = ModuleRecord::new_install(&core);
        core_record.set_installed_version(core.version);
        let mut wiki_record = ModuleRecord::new_install(&wiki);
        wiki_record.set_installed_version(wiki_installed);

        let scripts = StaticScriptSource::new()
            .with_script("Wiki", "wiki-0.00-12.00.sql", "CREATE SCHEMA wiki;")
            .unwrap();
        ModuleGuard::builder(
            Arc::new(MemoryModuleStore::with_records([core_record, wiki_record])),
            Arc::new(RecordingExecutor::new()),
        )
        .descriptors([core, wiki])
        .scripts(Arc::new(scripts))
        .bootstrap()
        .unwrap()
    }

    #[test]
    fn test_defers_until_upgrade_complete() {
        let guard = guard(Version::ZERO);
        assert_eq!(guard.upgrade_state(), UpgradeState::UpgradeRequired);
        let gate = StartupGate::new(Arc::clone(&guard), &GateConfig::default());

        match gate.admit("/wiki/page") {
            GateDecision::Defer(response) => {
                assert_eq!(response.status, SERVICE_UNAVAILABLE);
                assert!(response.message.contains("being upgraded"));
            }
            GateDecision::Proceed => panic!("request should be deferred"),
        }
        assert!(!guard.is_startup_complete());

        guard.upgrade_in_foreground().unwrap();
        assert_eq!(gate.admit("/wiki/page"), GateDecision::Proceed);
        assert!(guard.is_startup_complete());
    }

    #[test]
    fn test_allow_list_matches_path_boundaries() {
        let guard = guard(Version::ZERO);
        let gate = StartupGate::new(guard, &GateConfig::default());

        assert!(gate.is_allowed("/admin/status"));
        assert!(gate.is_allowed("/admin/status?format=json"));
        assert!(gate.is_allowed("/admin/upgrade/start"));
        assert!(!gate.is_allowed("/admin/statusx"));
        assert!(!gate.is_allowed("/wiki"));
        assert!(!gate.should_defer("/admin/status"));
    }

    struct Flagged;

    impl GateRequest for Flagged {
        fn path(&self) -> &str {
            "/assets/logo.png"
        }

        fn allowed_during_upgrade(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_flagged_request_is_allowed() {
        let gate = StartupGate::new(guard(Version::ZERO), &GateConfig::default());
        assert_eq!(gate.admit(&Flagged), GateDecision::Proceed);
    }

    #[test]
    fn test_nothing_to_upgrade_proceeds_and_starts_once() {
        let guard = guard(Version::new(1200, 2));
        assert!(guard.is_upgrade_complete());
        let gate = StartupGate::new(Arc::clone(&guard), &GateConfig::default());

        assert_eq!(gate.admit("/wiki"), GateDecision::Proceed);
        assert!(guard.is_startup_complete());
        assert!(!guard.ensure_startup_complete());
    }
}
