//! Modules and scripts read from disk, upgraded end to end

use moduleguard::script::{orphaned, unreachable};
use moduleguard::{
    discover, MemoryModuleStore, ModuleGuard, ModuleStore, RecordingExecutor, ScriptSource,
    Version,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;

fn v(s: &str) -> Version {
    s.parse().unwrap()
}

fn write_module(root: &Path, dir: &str, descriptor: &str, scripts: &[(&str, &str)]) {
    let module_dir = root.join(dir);
    fs::create_dir_all(module_dir.join("scripts")).unwrap();
    fs::write(module_dir.join("module.toml"), descriptor).unwrap();
    for (name, sql) in scripts {
        fs::write(module_dir.join("scripts").join(name), sql).unwrap();
    }
}

#[test]
fn test_discovered_modules_upgrade_from_disk() {
    let root = tempfile::tempdir().unwrap();
    write_module(
        root.path(),
        "core",
        "name = \"Core\"\nversion = \"12.30\"\ncore = true\nschemas = [\"core\"]",
        &[
            ("core-0.00-12.10.sql", "-- core base"),
            ("core-12.10-12.30.sql", "-- core 12.30"),
        ],
    );
    write_module(
        root.path(),
        "wiki",
        "name = \"Wiki\"\nversion = \"12.30\"\ndependencies = [\"Core\"]\nschemas = [\"wiki\"]",
        &[
            ("wiki-0.00-12.30.sql", "-- wiki base"),
            ("wiki-create.sql", "-- wiki views"),
            ("README.txt", "not a script"),
        ],
    );
    write_module(root.path(), "broken", "version = [1]", &[]);

    let discovered = discover(root.path()).unwrap();
    assert_eq!(discovered.modules.len(), 2);

    let store = Arc::new(MemoryModuleStore::uninitialized());
    let executor = Arc::new(RecordingExecutor::new());
    let guard = ModuleGuard::builder(store.clone(), executor.clone())
        .discovered(discovered)
        .bootstrap()
        .unwrap();

    assert_eq!(guard.failures().len(), 1);
    assert_eq!(guard.failures()[0].0, "broken");

    guard.upgrade_in_foreground().unwrap();
    assert_eq!(
        executor.scripts(),
        vec!["-- core base", "-- core 12.30", "-- wiki base", "-- wiki views"]
    );
    assert_eq!(store.get("Wiki").unwrap().unwrap().installed_version, v("12.30"));
    assert!(store.exists().unwrap());
}

#[test]
fn test_orphaned_and_unreachable_scripts_on_disk() {
    let root = tempfile::tempdir().unwrap();
    write_module(
        root.path(),
        "core",
        "name = \"Core\"\nversion = \"11.00\"\ncore = true\nschemas = [\"core\"]",
        &[
            ("core-0.00-10.30.sql", ""),
            ("core-10.30-11.00.sql", ""),
            ("core-10.30-10.31.sql", ""),
        ],
    );
    let discovered = discover(root.path()).unwrap();
    let core = &discovered.modules[0];

    let guard = ModuleGuard::builder(
        Arc::new(MemoryModuleStore::new()),
        Arc::new(RecordingExecutor::new()),
    )
    .discovered(discover(root.path()).unwrap())
    .bootstrap()
    .unwrap();

    let scripts = guard.scripts().upgrade_scripts(core, "core").unwrap();
    let orphans = orphaned(&scripts);
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].script.filename, "core-10.30-10.31.sql");

    let stranded = unreachable(&scripts, &[Version::ZERO], core.version);
    let names: Vec<&str> = stranded.iter().map(|s| s.filename.as_str()).collect();
    assert_eq!(names, vec!["core-10.30-10.31.sql"]);
}
