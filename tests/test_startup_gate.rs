//! Startup gate tests across threads

use moduleguard::error::HookError;
use moduleguard::{
    GateConfig, GateDecision, MemoryModuleStore, Module, ModuleDescriptor, ModuleGuard,
    ModuleRecord, RecordingExecutor, StartupGate, StaticScriptSource, UpgradeMode,
    UpgradeOutcome, Version,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn v(s: &str) -> Version {
    s.parse().unwrap()
}

struct CountingModule {
    descriptor: ModuleDescriptor,
    startups: Arc<AtomicUsize>,
}

impl Module for CountingModule {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn startup(&self, _record: &ModuleRecord) -> Result<(), HookError> {
        self.startups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn gate(wiki_installed: &str) -> (StartupGate, Arc<AtomicUsize>) {
    let core = ModuleDescriptor::new("Core", v("12.30")).core();
    let wiki = ModuleDescriptor::new("Wiki", v("12.30"))
        .with_dependencies(["Core"])
        .with_schemas(["wiki"]);

    let mut core_record = ModuleRecord::new_install(&core);
    core_record.set_installed_version(v("12.30"));
    let mut wiki_record = ModuleRecord::new_install(&wiki);
    wiki_record.set_installed_version(v(wiki_installed));

    let startups = Arc::new(AtomicUsize::new(0));
    let scripts = StaticScriptSource::new()
        .with_script("Wiki", "wiki-0.00-12.30.sql", "CREATE SCHEMA wiki;")
        .unwrap();

    let guard = ModuleGuard::builder(
        Arc::new(MemoryModuleStore::with_records([core_record, wiki_record])),
        Arc::new(RecordingExecutor::new()),
    )
    .descriptors([core])
    .module(Arc::new(CountingModule {
        descriptor: wiki,
        startups: Arc::clone(&startups),
    }))
    .scripts(Arc::new(scripts))
    .bootstrap()
    .unwrap();

    (StartupGate::new(guard, &GateConfig::default()), startups)
}

#[test]
fn test_concurrent_requests_start_modules_exactly_once() {
    let (gate, startups) = gate("12.30");
    let gate = Arc::new(gate);
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let gate = Arc::clone(&gate);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                gate.admit(format!("/wiki/page/{i}").as_str())
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), GateDecision::Proceed);
    }
    assert_eq!(startups.load(Ordering::SeqCst), 1);
    assert!(gate.guard().is_startup_complete());
}

#[test]
fn test_requests_deferred_during_background_upgrade_then_proceed() {
    let (gate, startups) = gate("0.00");

    assert!(gate.should_defer("/wiki"));
    assert!(!gate.should_defer("/admin/status"));

    let job = match gate.guard().start(UpgradeMode::Background).unwrap() {
        UpgradeOutcome::Started(job) => job,
        _ => panic!("expected a background job"),
    };
    job.wait().unwrap();

    assert_eq!(gate.admit("/wiki"), GateDecision::Proceed);
    assert_eq!(gate.admit("/wiki"), GateDecision::Proceed);
    assert_eq!(startups.load(Ordering::SeqCst), 1);
}
