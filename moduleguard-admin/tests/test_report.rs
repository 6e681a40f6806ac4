//! Report rendering over modules and scripts on disk

use moduleguard::lifecycle::ModuleState;
use moduleguard::{
    discover, FileScriptSource, GuardConfig, MemoryModuleStore, ModuleRecord, ModuleRegistry,
    UpgradeReport, Version,
};
use moduleguard_admin::{report, resolve_database_url};
use std::fs;
use std::path::Path;

fn v(s: &str) -> Version {
    s.parse().unwrap()
}

fn write_module(root: &Path, dir: &str, descriptor: &str, scripts: &[&str]) {
    let module_dir = root.join(dir);
    fs::create_dir_all(module_dir.join("scripts")).unwrap();
    fs::write(module_dir.join("module.toml"), descriptor).unwrap();
    for name in scripts {
        fs::write(module_dir.join("scripts").join(name), "-- sql").unwrap();
    }
}

fn registry(root: &Path) -> ModuleRegistry {
    colored::control::set_override(false);
    ModuleRegistry::from_descriptors(discover(root).unwrap().modules).unwrap()
}

fn fixture() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    write_module(
        root.path(),
        "core",
        "name = \"Core\"\nversion = \"11.00\"\ncore = true\nschemas = [\"core\"]",
        &["core-0.00-10.30.sql", "core-10.30-11.00.sql", "core-10.30-10.31.sql"],
    );
    write_module(
        root.path(),
        "wiki",
        "name = \"Wiki\"\nversion = \"11.00\"\ndependencies = [\"Core\"]\nschemas = [\"wiki\"]",
        &["wiki-0.00-11.00.sql", "wiki-create.sql"],
    );
    root
}

#[test]
fn test_render_order() {
    let root = fixture();
    let rendered = report::render_order(&registry(root.path()));
    assert_eq!(rendered, "  1. Core 11.00 (core)\n  2. Wiki 11.00 <- Core\n");
}

#[test]
fn test_orphaned_and_unreachable_reports() {
    let root = fixture();
    let registry = registry(root.path());
    let scripts = FileScriptSource::new();

    let orphans = report::collect_orphaned(&registry, &scripts).unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(
        report::render_orphaned(&orphans),
        "Core/core-10.30-10.31.sql superseded by core-10.30-11.00.sql\n"
    );

    let stranded =
        report::collect_unreachable(&registry, &scripts, &[Version::ZERO, v("10.30")]).unwrap();
    assert_eq!(report::render_unreachable(&stranded), "Core/core-10.30-10.31.sql\n");
}

#[test]
fn test_dry_run_plan_on_new_install() {
    let root = fixture();
    let registry = registry(root.path());
    let store = MemoryModuleStore::uninitialized();

    let plans = report::dry_run_plan(&registry, &store, &FileScriptSource::new()).unwrap();
    assert_eq!(plans.len(), 2);
    assert_eq!(
        report::render_plan(&plans),
        "Core\n  core 0.00 -> 11.00:\n    core-0.00-10.30.sql\n    core-10.30-11.00.sql\n\
         Wiki\n  wiki 0.00 -> 11.00:\n    wiki-0.00-11.00.sql\n    wiki-create.sql\n"
    );
}

#[test]
fn test_dry_run_plan_when_current() {
    let root = fixture();
    let registry = registry(root.path());
    let records: Vec<ModuleRecord> = registry
        .descriptors()
        .map(|d| {
            let mut record = ModuleRecord::new_install(d);
            record.set_installed_version(d.version);
            record
        })
        .collect();
    let store = MemoryModuleStore::with_records(records);

    let plans = report::dry_run_plan(&registry, &store, &FileScriptSource::new()).unwrap();
    assert!(plans.is_empty());
    assert_eq!(report::render_plan(&plans), "All modules are up to date\n");
}

#[test]
fn test_render_store() {
    let root = fixture();
    let registry = registry(root.path());
    let core = registry.get("Core").unwrap().descriptor().clone();
    let mut core_record = ModuleRecord::new_install(&core);
    core_record.set_installed_version(v("10.30"));
    core_record.state = ModuleState::ReadyToRun;
    let mut gone = ModuleRecord::new_install(&moduleguard::ModuleDescriptor::new("Gone", v("1.0")));
    gone.set_installed_version(v("1.0"));

    assert_eq!(
        report::render_store(&registry, &[core_record, gone]),
        "Core Upgrade Required: 10.30 -> 11.00\nWiki not installed\nGone 1.00 not found on disk\n"
    );
}

#[test]
fn test_render_report() {
    colored::control::set_override(false);
    let report = UpgradeReport {
        upgraded: vec!["Wiki".to_string()],
        failed: vec![("Issues".to_string(), "boom".to_string())],
        scripts_run: 3,
        ..UpgradeReport::default()
    };
    assert_eq!(
        report::render_report(&report),
        "upgraded Wiki\nfailed Issues: boom\n1 module(s) upgraded, 1 failed, 3 script(s) run\n"
    );
}

#[test]
fn test_database_url_prefers_command_line() {
    let config = GuardConfig::default();
    assert_eq!(
        resolve_database_url(Some("postgres://cli@db/app".to_string()), &config),
        "postgres://cli@db/app"
    );
}
