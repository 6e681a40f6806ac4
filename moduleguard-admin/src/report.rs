//! Read-only reports over discovered modules, their scripts and the store

use colored::Colorize;
use moduleguard::lifecycle::ModuleState;
use moduleguard::script::{orphaned, unreachable, OrphanedScript};
use moduleguard::upgrade::{ModuleUpgrader, SchemaPlan};
use moduleguard::{
    ModuleRecord, ModuleRegistry, ModuleStore, RecordingExecutor, Script, ScriptError,
    ScriptSource, StatusReport, UpgradeError, UpgradeReport, Version,
};
use std::fmt::Write;

/// Plans for every module behind its code version, without touching the database
///
/// # Errors
///
/// Returns the first store, script or migration-path error.
pub fn dry_run_plan(
    registry: &ModuleRegistry,
    store: &dyn ModuleStore,
    scripts: &dyn ScriptSource,
) -> Result<Vec<(String, Vec<SchemaPlan>)>, UpgradeError> {
    // Planning never executes anything
    let executor = RecordingExecutor::new();
    let upgrader = ModuleUpgrader::new(scripts, &executor, store);
    let exists = store.exists()?;

    let mut plans = Vec::new();
    for descriptor in registry.descriptors() {
        let stored = if exists { store.get(&descriptor.name)? } else { None };
        let record = stored.unwrap_or_else(|| ModuleRecord::new_install(descriptor));

        if record.installed_version < descriptor.version {
            plans.push((descriptor.name.clone(), upgrader.plan(descriptor, &record)?));
        }
    }
    Ok(plans)
}

/// Orphaned upgrade scripts of every module
///
/// # Errors
///
/// Returns `ScriptError` if a module's scripts cannot be read.
pub fn collect_orphaned(
    registry: &ModuleRegistry,
    scripts: &dyn ScriptSource,
) -> Result<Vec<(String, OrphanedScript)>, ScriptError> {
    let mut found = Vec::new();
    for descriptor in registry.descriptors() {
        for schema in &descriptor.schemas {
            let upgrades = scripts.upgrade_scripts(descriptor, schema)?;
            found.extend(
                orphaned(&upgrades)
                    .into_iter()
                    .map(|o| (descriptor.name.clone(), o)),
            );
        }
    }
    Ok(found)
}

/// Upgrade scripts no chain from `origins` to each module's code version selects
///
/// # Errors
///
/// Returns `ScriptError` if a module's scripts cannot be read.
pub fn collect_unreachable(
    registry: &ModuleRegistry,
    scripts: &dyn ScriptSource,
    origins: &[Version],
) -> Result<Vec<(String, Script)>, ScriptError> {
    let mut found = Vec::new();
    for descriptor in registry.descriptors() {
        for schema in &descriptor.schemas {
            let upgrades = scripts.upgrade_scripts(descriptor, schema)?;
            found.extend(
                unreachable(&upgrades, origins, descriptor.version)
                    .into_iter()
                    .map(|s| (descriptor.name.clone(), s)),
            );
        }
    }
    Ok(found)
}

pub fn render_order(registry: &ModuleRegistry) -> String {
    let mut out = String::new();
    for (i, descriptor) in registry.descriptors().enumerate() {
        let _ = write!(out, "{:>3}. {} {}", i + 1, descriptor.name.bold(), descriptor.version);
        if descriptor.is_core {
            let _ = write!(out, " {}", "(core)".cyan());
        } else if !descriptor.dependencies.is_empty() {
            let _ = write!(out, " <- {}", descriptor.dependencies.join(", "));
        }
        out.push('\n');
    }
    out
}

pub fn render_plan(plans: &[(String, Vec<SchemaPlan>)]) -> String {
    if plans.is_empty() {
        return "All modules are up to date\n".to_string();
    }
    let mut out = String::new();
    for (module, schemas) in plans {
        let _ = writeln!(out, "{}", module.bold());
        for plan in schemas {
            if plan.is_empty() {
                let _ = writeln!(out, "  {} {} -> {}: no scripts", plan.schema, plan.from, plan.to);
                continue;
            }
            let _ = writeln!(out, "  {} {} -> {}:", plan.schema, plan.from, plan.to);
            for script in plan.scripts() {
                let _ = writeln!(out, "    {}", script.filename);
            }
        }
    }
    out
}

pub fn render_orphaned(found: &[(String, OrphanedScript)]) -> String {
    if found.is_empty() {
        return "No orphaned scripts\n".to_string();
    }
    let mut out = String::new();
    for (module, orphan) in found {
        let _ = writeln!(
            out,
            "{}/{} {} {}",
            module,
            orphan.script.filename.yellow(),
            "superseded by".dimmed(),
            orphan.superseded_by.filename
        );
    }
    out
}

pub fn render_unreachable(found: &[(String, Script)]) -> String {
    if found.is_empty() {
        return "No unreachable scripts\n".to_string();
    }
    let mut out = String::new();
    for (module, script) in found {
        let _ = writeln!(out, "{}/{}", module, script.filename.yellow());
    }
    out
}

/// Installed vs. code version for every discovered module, plus stored modules no longer on disk
pub fn render_store(registry: &ModuleRegistry, records: &[ModuleRecord]) -> String {
    let mut out = String::new();
    for descriptor in registry.descriptors() {
        let record = records
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(&descriptor.name));
        let line = match record {
            None => format!("{} {}", descriptor.name, "not installed".yellow()),
            Some(r) if r.installed_version < descriptor.version => format!(
                "{} {}",
                descriptor.name,
                ModuleState::InstallRequired
                    .describe(r.installed_version, descriptor.version)
                    .yellow()
            ),
            Some(r) => format!("{} {} {}", descriptor.name, r.installed_version, "up to date".green()),
        };
        out.push_str(&line);
        out.push('\n');
    }
    for record in records.iter().filter(|r| !registry.contains(&r.name)) {
        let _ = writeln!(
            out,
            "{} {} {}",
            record.name,
            record.installed_version,
            "not found on disk".red()
        );
    }
    out
}

pub fn render_status(status: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Upgrade state: {}", status.state.to_string().bold());
    if let Some(module) = &status.currently_upgrading_module {
        let _ = writeln!(out, "Currently upgrading: {module}");
    }
    for module in &status.modules {
        let _ = writeln!(out, "  {} {}", module.name, module.state_description);
        for script in &module.running_scripts {
            let _ = writeln!(out, "    running {}", script.filename);
        }
        if let Some(failure) = &module.failure {
            let _ = writeln!(out, "    {}", failure.red());
        }
    }
    if let Some(failure) = &status.startup_failure {
        let _ = writeln!(out, "{}", failure.red().bold());
    }
    out
}

pub fn render_report(report: &UpgradeReport) -> String {
    let mut out = String::new();
    for module in &report.upgraded {
        let _ = writeln!(out, "{} {}", "upgraded".green(), module);
    }
    for (module, error) in &report.failed {
        let _ = writeln!(out, "{} {}: {}", "failed".red(), module, error);
    }
    let _ = writeln!(
        out,
        "{} module(s) upgraded, {} failed, {} script(s) run",
        report.upgraded.len(),
        report.failed.len(),
        report.scripts_run
    );
    out
}
