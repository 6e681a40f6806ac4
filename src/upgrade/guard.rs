//! `ModuleGuard` - the upgrade orchestrator
//!
//! Bootstrap sorts the modules, upgrades the core module synchronously,
//! initializes every other module and works out which of them are behind.
//! The remaining upgrade batch then runs in the foreground or on a background
//! coroutine, one module at a time in dependency order.
//!
//! Shared state lives behind two locks:
//! - the upgrade lock guards the global upgrade state, the in-memory records,
//!   the failure map and the running-script list;
//! - the startup lock guards the one-time startup pass.
//!
//! When both are needed the startup lock is taken first. The upgrade lock is
//! never held while a script runs. View recreation has its own lock.

use crate::config::{UpgradeMode, UpgradeSettings};
use crate::error::{HookError, SortError, SqlError, UpgradeError};
use crate::executor::ScriptExecutor;
use crate::lifecycle::{ModuleRecord, ModuleState, ModuleStore, UpgradeState};
use crate::module::{DiscoveredModules, Module, ModuleDescriptor, ResourceLoader, SimpleModule};
use crate::registry::ModuleRegistry;
use crate::script::{FileScriptSource, ScriptSource};
use crate::upgrade::job::UpgradeJob;
use crate::upgrade::status::{ModuleStatus, RunningScript, StatusReport, UpgradeReport};
use crate::upgrade::upgrader::{ModuleUpgrader, SchemaPlan, UpgradeEvent};
use chrono::Utc;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct UpgradeControl {
    state: UpgradeState,
    /// Live records keyed by lowercased module name
    records: HashMap<String, ModuleRecord>,
    /// Module name -> failure, in the order they happened
    failures: Vec<(String, String)>,
    running: HashMap<String, Vec<RunningScript>>,
    currently_upgrading: Option<String>,
    startup_failure: Option<String>,
    new_install: bool,
}

impl UpgradeControl {
    fn record_failure(&mut self, module: &str, message: String) {
        if let Some(entry) = self
            .failures
            .iter_mut()
            .find(|(name, _)| name.eq_ignore_ascii_case(module))
        {
            entry.1 = message;
        } else {
            self.failures.push((module.to_string(), message));
        }
    }

    fn failure(&self, module: &str) -> Option<&str> {
        self.failures
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(module))
            .map(|(_, message)| message.as_str())
    }
}

/// What [`ModuleGuard::start`] did
pub enum UpgradeOutcome {
    /// Nothing was behind, or the batch already ran
    NotNeeded,
    /// The batch ran in the foreground
    Completed(UpgradeReport),
    /// The batch is running on a background coroutine
    Started(UpgradeJob),
    /// Manual mode: waiting for an operator to start the batch
    Deferred,
}

/// Builder for [`ModuleGuard`]
pub struct ModuleGuardBuilder {
    modules: Vec<Arc<dyn Module>>,
    store: Arc<dyn ModuleStore>,
    executor: Arc<dyn ScriptExecutor>,
    scripts: Arc<dyn ScriptSource>,
    settings: UpgradeSettings,
    resource_loaders: Vec<Arc<dyn ResourceLoader>>,
    failures: Vec<(String, String)>,
}

impl ModuleGuardBuilder {
    #[must_use]
    pub fn module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    #[must_use]
    pub fn modules(mut self, modules: impl IntoIterator<Item = Arc<dyn Module>>) -> Self {
        self.modules.extend(modules);
        self
    }

    /// Add hook-less modules
    #[must_use]
    pub fn descriptors(mut self, descriptors: impl IntoIterator<Item = ModuleDescriptor>) -> Self {
        self.modules
            .extend(descriptors.into_iter().map(SimpleModule::shared));
        self
    }

    /// Add modules found on disk; directories that failed to load go into the failure map
    #[must_use]
    pub fn discovered(mut self, discovered: DiscoveredModules) -> Self {
        self.failures.extend(
            discovered
                .failures
                .into_iter()
                .map(|(dir, e)| (dir, e.to_string())),
        );
        self.descriptors(discovered.modules)
    }

    #[must_use]
    pub fn scripts(mut self, scripts: Arc<dyn ScriptSource>) -> Self {
        self.scripts = scripts;
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: UpgradeSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn resource_loader(mut self, loader: Arc<dyn ResourceLoader>) -> Self {
        self.resource_loaders.push(loader);
        self
    }

    /// Sort modules, upgrade the core module and initialize the rest
    ///
    /// # Errors
    ///
    /// Everything here is fatal: sort errors, an unsupported core version, and
    /// any failure while upgrading or initializing the core module.
    pub fn bootstrap(self) -> Result<Arc<ModuleGuard>, UpgradeError> {
        let registry = ModuleRegistry::new(self.modules)?;
        let core = registry.core().cloned().ok_or(SortError::MissingCore)?;
        let store_exists = self.store.exists()?;

        if !store_exists {
            log::info!("Module store does not exist yet; treating this as a new install");
        }

        let guard = ModuleGuard {
            registry,
            store: self.store,
            executor: self.executor,
            scripts: self.scripts,
            settings: self.settings,
            resource_loaders: self.resource_loaders,
            upgrade: Mutex::new(UpgradeControl {
                state: UpgradeState::UpgradeRequired,
                records: HashMap::new(),
                failures: self.failures,
                running: HashMap::new(),
                currently_upgrading: None,
                startup_failure: None,
                new_install: !store_exists,
            }),
            startup: Mutex::new(()),
            views: Mutex::new(()),
            startup_complete: AtomicBool::new(false),
        };

        let core_upgraded = guard.upgrade_core(core.as_ref(), store_exists)?;
        guard.initialize_modules(store_exists)?;

        let behind = guard.modules_behind();
        if behind.is_empty() {
            guard.complete_upgrade(core_upgraded);
        } else {
            log::info!(
                "{} module(s) require an upgrade: {}",
                behind.len(),
                behind.join(", ")
            );
        }

        Ok(Arc::new(guard))
    }
}

/// Drives module upgrades and owns the process-wide upgrade state
pub struct ModuleGuard {
    registry: ModuleRegistry,
    store: Arc<dyn ModuleStore>,
    executor: Arc<dyn ScriptExecutor>,
    scripts: Arc<dyn ScriptSource>,
    settings: UpgradeSettings,
    resource_loaders: Vec<Arc<dyn ResourceLoader>>,
    upgrade: Mutex<UpgradeControl>,
    startup: Mutex<()>,
    views: Mutex<()>,
    startup_complete: AtomicBool,
}

impl ModuleGuard {
    /// Start building a guard over `store` and `executor`
    ///
    /// Scripts are read from each module's `scripts/` directory unless another
    /// source is set.
    pub fn builder(
        store: Arc<dyn ModuleStore>,
        executor: Arc<dyn ScriptExecutor>,
    ) -> ModuleGuardBuilder {
        ModuleGuardBuilder {
            modules: Vec::new(),
            store,
            executor,
            scripts: Arc::new(FileScriptSource::new()),
            settings: UpgradeSettings::default(),
            resource_loaders: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn control(&self) -> MutexGuard<'_, UpgradeControl> {
        self.upgrade.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn upgrader(&self) -> ModuleUpgrader<'_> {
        ModuleUpgrader::new(
            self.scripts.as_ref(),
            self.executor.as_ref(),
            self.store.as_ref(),
        )
    }

    fn load_record(
        &self,
        descriptor: &ModuleDescriptor,
        store_exists: bool,
    ) -> Result<ModuleRecord, UpgradeError> {
        let existing = if store_exists {
            self.store.get(&descriptor.name)?
        } else {
            None
        };
        Ok(existing.unwrap_or_else(|| ModuleRecord::new_install(descriptor)))
    }

    fn publish(&self, record: &ModuleRecord) {
        self.control()
            .records
            .insert(record.name.to_lowercase(), record.clone());
    }

    fn on_event(&self, key: &str, event: UpgradeEvent<'_>) {
        let mut control = self.control();
        match event {
            UpgradeEvent::ScriptStarted(script) => {
                // Scripts run one at a time
                control
                    .running
                    .insert(key.to_string(), vec![RunningScript::from_script(script)]);
            }
            UpgradeEvent::ScriptFinished(_, record) => {
                control.running.remove(key);
                control.records.insert(key.to_string(), record.clone());
            }
        }
    }

    fn upgrade_core(&self, core: &dyn Module, store_exists: bool) -> Result<bool, UpgradeError> {
        let descriptor = core.descriptor();
        let key = descriptor.key();
        let mut record = self.load_record(descriptor, store_exists)?;
        let installed = record.installed_version;
        let earliest = self.settings.earliest_supported_version;

        if !installed.is_zero() && installed < earliest {
            return Err(UpgradeError::UnsupportedUpgradePath {
                module: descriptor.name.clone(),
                installed,
                earliest,
            });
        }

        let performed = installed < descriptor.version;
        if performed {
            record.state = ModuleState::Installing;
            self.publish(&record);
            self.control().currently_upgrading = Some(descriptor.name.clone());

            let result = self
                .upgrader()
                .upgrade(descriptor, &mut record, &mut |event| self.on_event(&key, event));

            let mut control = self.control();
            control.currently_upgrading = None;
            control.running.remove(&key);
            drop(control);

            if let Err(e) = result {
                log::error!("Core module {} failed to upgrade: {}", descriptor.name, e);
                #[cfg(feature = "metrics")]
                crate::metrics::record_module_failure(&descriptor.name);
                return Err(e);
            }
        }

        run_hook(|| core.initialize()).map_err(|message| UpgradeError::Initialize {
            module: descriptor.name.clone(),
            message,
        })?;

        record.state = if performed {
            ModuleState::InstallComplete
        } else {
            ModuleState::ReadyToRun
        };
        self.publish(&record);
        Ok(performed)
    }

    fn initialize_modules(&self, store_exists: bool) -> Result<(), UpgradeError> {
        for module in self.registry.modules() {
            let descriptor = module.descriptor();
            if descriptor.is_core {
                continue;
            }

            let mut record = self.load_record(descriptor, store_exists)?;
            match run_hook(|| module.initialize()) {
                Ok(()) => {
                    record.state = if record.installed_version < descriptor.version {
                        ModuleState::InstallRequired
                    } else {
                        ModuleState::ReadyToRun
                    };
                }
                Err(message) => {
                    log::error!("Module {} failed to initialize: {}", descriptor.name, message);
                    #[cfg(feature = "metrics")]
                    crate::metrics::record_module_failure(&descriptor.name);
                    record.state = ModuleState::Disabled;
                    record.message = Some(message.clone());
                    self.control()
                        .record_failure(&descriptor.name, format!("initialize failed: {message}"));
                }
            }
            self.publish(&record);
        }
        Ok(())
    }

    fn modules_behind(&self) -> Vec<String> {
        let control = self.control();
        self.registry
            .descriptors()
            .filter(|d| {
                control
                    .records
                    .get(&d.key())
                    .is_some_and(|r| r.state == ModuleState::InstallRequired)
            })
            .map(|d| d.name.clone())
            .collect()
    }

    /// Move from `UpgradeRequired` to `UpgradeInProgress`; false from any other state
    fn begin_batch(&self) -> bool {
        let mut control = self.control();
        if control.state != UpgradeState::UpgradeRequired {
            return false;
        }
        control.state = UpgradeState::UpgradeInProgress;
        true
    }

    /// Upgrade every module that is behind, in dependency order
    ///
    /// A failing module does not stop the batch, but every module depending on
    /// it is skipped. If anything failed the global state stays
    /// `UpgradeInProgress` and a startup failure is recorded. Modules behind a
    /// disabled dependency are disabled as well and do not count as failures.
    pub(crate) fn execute_batch(&self) -> UpgradeReport {
        let mut report = UpgradeReport {
            started_at: Some(Utc::now()),
            ..UpgradeReport::default()
        };
        let upgrader = self.upgrader();

        for module in self.registry.modules() {
            let descriptor = module.descriptor();
            let key = descriptor.key();

            let mut record = match self.control().records.get(&key) {
                Some(r) if r.state == ModuleState::InstallRequired => r.clone(),
                _ => continue,
            };

            let (disabled_dependency, failed_dependency) = {
                let control = self.control();
                let is_disabled = |d: &String| {
                    control
                        .records
                        .get(&d.to_lowercase())
                        .is_some_and(|r| r.state == ModuleState::Disabled)
                };
                let failed = descriptor
                    .dependencies
                    .iter()
                    .find(|d| !is_disabled(*d) && control.failure(d).is_some())
                    .cloned();
                let disabled = descriptor.dependencies.iter().find(|d| is_disabled(*d)).cloned();
                (disabled, failed)
            };

            // A disabled dependency disables this module too; that is not an upgrade failure
            if let (Some(dependency), None) = (&disabled_dependency, &failed_dependency) {
                let err = UpgradeError::DependencyDisabled {
                    module: descriptor.name.clone(),
                    dependency: dependency.clone(),
                };
                log::warn!("{}", err);
                #[cfg(feature = "metrics")]
                crate::metrics::record_module_failure(&descriptor.name);
                record.state = ModuleState::Disabled;
                record.message = Some(err.to_string());
                let mut control = self.control();
                control.record_failure(&descriptor.name, err.to_string());
                control.records.insert(key, record);
                continue;
            }
            if let Some(dependency) = failed_dependency {
                let err = UpgradeError::DependencyFailed {
                    module: descriptor.name.clone(),
                    dependency,
                };
                log::warn!("{}", err);
                record.message = Some(err.to_string());
                self.fail_module(&mut report, record, &err);
                continue;
            }

            record.state = ModuleState::Installing;
            {
                let mut control = self.control();
                control.records.insert(key.clone(), record.clone());
                control.currently_upgrading = Some(descriptor.name.clone());
            }

            let result =
                upgrader.upgrade(descriptor, &mut record, &mut |event| self.on_event(&key, event));

            {
                let mut control = self.control();
                control.currently_upgrading = None;
                control.running.remove(&key);
            }

            match result {
                Ok(scripts_run) => {
                    report.scripts_run += scripts_run;
                    report.upgraded.push(descriptor.name.clone());
                    record.state = ModuleState::InstallComplete;
                    self.publish(&record);
                }
                Err(err) => {
                    log::error!("Module {} failed to upgrade: {}", descriptor.name, err);
                    record.message = Some(err.to_string());
                    if let Err(e) = self.store.upsert(&record) {
                        log::warn!("Could not save failure for module {}: {}", descriptor.name, e);
                    }
                    self.fail_module(&mut report, record, &err);
                }
            }
        }

        report.finished_at = Some(Utc::now());

        if report.is_success() {
            self.complete_upgrade(true);
        } else {
            let names: Vec<&str> = report.failed.iter().map(|(n, _)| n.as_str()).collect();
            let message = format!(
                "{} module(s) failed to upgrade: {}",
                names.len(),
                names.join(", ")
            );
            log::error!("{}", message);
            self.control().startup_failure = Some(message);
        }

        report
    }

    fn fail_module(&self, report: &mut UpgradeReport, record: ModuleRecord, err: &UpgradeError) {
        #[cfg(feature = "metrics")]
        crate::metrics::record_module_failure(&record.name);
        report.failed.push((record.name.clone(), err.to_string()));
        let mut control = self.control();
        control.record_failure(&record.name, err.to_string());
        control.records.insert(record.name.to_lowercase(), record);
    }

    /// Run the upgrade batch on the calling thread
    ///
    /// # Errors
    ///
    /// Returns `UpgradeError::NotRequired` unless the state is `UpgradeRequired`.
    /// Module failures are reported in the returned `UpgradeReport`.
    pub fn upgrade_in_foreground(&self) -> Result<UpgradeReport, UpgradeError> {
        if !self.begin_batch() {
            return Err(UpgradeError::NotRequired(self.upgrade_state()));
        }
        Ok(self.execute_batch())
    }

    /// Run the upgrade batch on a background coroutine
    ///
    /// Returns `None` if no upgrade is required or a batch already started.
    ///
    /// # Errors
    ///
    /// Returns `UpgradeError::Spawn` if the coroutine cannot be created.
    pub fn start_background_upgrade(self: &Arc<Self>) -> Result<Option<UpgradeJob>, UpgradeError> {
        if !self.begin_batch() {
            return Ok(None);
        }
        log::info!("Starting background module upgrade");
        match UpgradeJob::spawn(Arc::clone(self)) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                self.control().state = UpgradeState::UpgradeRequired;
                Err(e)
            }
        }
    }

    /// Start the upgrade batch the way `mode` says
    ///
    /// # Errors
    ///
    /// See [`ModuleGuard::start_background_upgrade`].
    pub fn start(self: &Arc<Self>, mode: UpgradeMode) -> Result<UpgradeOutcome, UpgradeError> {
        if !self.is_upgrade_required() {
            return Ok(UpgradeOutcome::NotNeeded);
        }
        match mode {
            UpgradeMode::Foreground => match self.upgrade_in_foreground() {
                Ok(report) => Ok(UpgradeOutcome::Completed(report)),
                Err(UpgradeError::NotRequired(_)) => Ok(UpgradeOutcome::NotNeeded),
                Err(e) => Err(e),
            },
            UpgradeMode::Background => Ok(self
                .start_background_upgrade()?
                .map_or(UpgradeOutcome::NotNeeded, UpgradeOutcome::Started)),
            UpgradeMode::Manual => Ok(UpgradeOutcome::Deferred),
        }
    }

    /// Flip the global state to `UpgradeComplete`
    ///
    /// When an upgrade was actually performed this also reconciles modules
    /// that are recorded in the store but no longer discovered, and refreshes
    /// each record's schema list and auto-uninstall flag.
    pub fn complete_upgrade(&self, performed: bool) {
        {
            let mut control = self.control();
            if control.state == UpgradeState::UpgradeComplete {
                return;
            }
            control.state = UpgradeState::UpgradeComplete;
            for record in control.records.values_mut() {
                if record.state == ModuleState::InstallComplete {
                    record.state = ModuleState::ReadyToRun;
                }
            }
        }
        log::info!("Module upgrade complete");

        if performed {
            self.handle_unknown_modules();
            self.update_module_properties();
        }
    }

    /// Remove auto-uninstall modules that are in the store but not on disk
    ///
    /// Returns the names of the modules removed.
    pub fn handle_unknown_modules(&self) -> Vec<String> {
        let records = match self.store.all() {
            Ok(records) => records,
            Err(e) => {
                log::warn!("Could not list installed modules: {}", e);
                return Vec::new();
            }
        };

        let mut removed = Vec::new();
        for record in records.into_iter().filter(|r| !self.registry.contains(&r.name)) {
            if record.auto_uninstall {
                log::info!("Removing unknown module {}", record.name);
                match self.remove_record(&record) {
                    Ok(()) => removed.push(record.name),
                    Err(e) => log::error!("Failed to remove module {}: {}", record.name, e),
                }
            } else {
                log::warn!(
                    "Module {} is installed but was not found; remove it with `moduleguard-admin remove {}`",
                    record.name,
                    record.name
                );
            }
        }
        removed
    }

    fn update_module_properties(&self) {
        for descriptor in self.registry.descriptors() {
            let key = descriptor.key();
            let Some(mut record) = self.control().records.get(&key).cloned() else {
                continue;
            };
            if record.state == ModuleState::Disabled || !record.refresh_from(descriptor) {
                continue;
            }
            match self.store.upsert(&record) {
                Ok(()) => self.publish(&record),
                Err(e) => log::warn!("Could not update module {}: {}", descriptor.name, e),
            }
        }
    }

    fn remove_record(&self, record: &ModuleRecord) -> Result<(), UpgradeError> {
        for schema in &record.schemas {
            log::info!("Dropping schema {} of module {}", schema, record.name);
            self.executor
                .drop_schema(schema)
                .map_err(|source| UpgradeError::Sql {
                    module: record.name.clone(),
                    script: format!("DROP SCHEMA {schema}"),
                    source,
                })?;
        }
        self.store.delete(&record.name)?;
        Ok(())
    }

    /// Delete a module's record and drop its schemas
    ///
    /// Only modules that are no longer discovered can be removed.
    ///
    /// # Errors
    ///
    /// `UpgradeError::ModuleInUse` for a discovered module,
    /// `UpgradeError::UnknownModule` if there is no record, or the drop/delete error.
    pub fn remove_module(&self, name: &str) -> Result<ModuleRecord, UpgradeError> {
        if self.registry.contains(name) {
            return Err(UpgradeError::ModuleInUse(name.to_string()));
        }
        let record = self
            .store
            .get(name)?
            .ok_or_else(|| UpgradeError::UnknownModule(name.to_string()))?;
        self.remove_record(&record)?;
        log::info!("Removed module {}", record.name);
        Ok(record)
    }

    /// Re-run every module's drop scripts (reverse dependency order), then
    /// every create script (dependency order)
    ///
    /// Only runs once the upgrade is complete, so it never overlaps a batch.
    /// Concurrent calls run one after the other. Returns the number of
    /// scripts run.
    ///
    /// # Errors
    ///
    /// `UpgradeError::NotRequired` before the upgrade is complete, otherwise
    /// the first script or SQL error.
    pub fn recreate_views(&self) -> Result<usize, UpgradeError> {
        let _views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        let descriptors: Vec<&ModuleDescriptor> = {
            let control = self.control();
            if control.state != UpgradeState::UpgradeComplete {
                return Err(UpgradeError::NotRequired(control.state));
            }
            self.registry
                .descriptors()
                .filter(|d| {
                    control
                        .records
                        .get(&d.key())
                        .is_some_and(|r| r.state != ModuleState::Disabled)
                })
                .collect()
        };

        let mut count = 0;
        for descriptor in descriptors.iter().rev() {
            for schema in descriptor.schemas.iter().rev() {
                if let Some(script) = self.scripts.drop_script(descriptor, schema)? {
                    self.run_view_script(descriptor, &script.schema, &script.filename, &script.contents)?;
                    count += 1;
                }
            }
        }
        for descriptor in &descriptors {
            for schema in &descriptor.schemas {
                if let Some(script) = self.scripts.create_script(descriptor, schema)? {
                    self.run_view_script(descriptor, &script.schema, &script.filename, &script.contents)?;
                    count += 1;
                }
            }
        }

        log::info!("Recreated views: {} script(s) run", count);
        Ok(count)
    }

    fn run_view_script(
        &self,
        descriptor: &ModuleDescriptor,
        schema: &str,
        filename: &str,
        contents: &str,
    ) -> Result<(), UpgradeError> {
        log::debug!("Running {}/{}", descriptor.name, filename);
        self.executor
            .execute(schema, contents)
            .map_err(|source: SqlError| UpgradeError::Sql {
                module: descriptor.name.clone(),
                script: filename.to_string(),
                source,
            })
    }

    /// Run every module's `startup()` hook once the upgrade is complete
    ///
    /// Runs at most once per process even when many threads race to trigger
    /// it. Returns true only for the call that performed the startup pass.
    pub fn ensure_startup_complete(&self) -> bool {
        if self.startup_complete.load(Ordering::Acquire) {
            return false;
        }
        let _startup = self.startup.lock().unwrap_or_else(PoisonError::into_inner);
        if self.startup_complete.load(Ordering::Acquire) || !self.is_upgrade_complete() {
            return false;
        }

        let mut started = Vec::new();
        for module in self.registry.modules() {
            let descriptor = module.descriptor();
            let key = descriptor.key();
            let Some(record) = self.control().records.get(&key).cloned() else {
                continue;
            };
            if record.state == ModuleState::Disabled {
                continue;
            }

            let result = run_hook(|| module.startup(&record));
            let mut control = self.control();
            match result {
                Ok(()) => {
                    if let Some(r) = control.records.get_mut(&key) {
                        r.state = ModuleState::Running;
                    }
                    started.push(descriptor.clone());
                }
                Err(message) => {
                    log::error!("Module {} failed to start: {}", descriptor.name, message);
                    control.record_failure(&descriptor.name, format!("startup failed: {message}"));
                    if let Some(r) = control.records.get_mut(&key) {
                        r.state = ModuleState::Disabled;
                        r.message = Some(message);
                    }
                }
            }
        }

        for loader in &self.resource_loaders {
            if let Err(e) = loader.register(&started) {
                log::error!("Resource loader failed: {}", e);
            }
        }

        self.startup_complete.store(true, Ordering::Release);
        log::info!("Module startup complete; {} module(s) running", started.len());
        true
    }

    /// Compute the scripts every behind module would run, without running them
    ///
    /// # Errors
    ///
    /// The first script or migration-path error.
    pub fn plan(&self) -> Result<Vec<(String, Vec<SchemaPlan>)>, UpgradeError> {
        let records: Vec<(ModuleDescriptor, ModuleRecord)> = {
            let control = self.control();
            self.registry
                .descriptors()
                .filter_map(|d| {
                    control
                        .records
                        .get(&d.key())
                        .filter(|r| r.state == ModuleState::InstallRequired)
                        .map(|r| (d.clone(), r.clone()))
                })
                .collect()
        };

        let upgrader = self.upgrader();
        records
            .iter()
            .map(|(d, r)| upgrader.plan(d, r).map(|plans| (d.name.clone(), plans)))
            .collect()
    }

    pub fn upgrade_state(&self) -> UpgradeState {
        self.control().state
    }

    pub fn is_upgrade_required(&self) -> bool {
        self.upgrade_state() == UpgradeState::UpgradeRequired
    }

    pub fn is_upgrade_in_progress(&self) -> bool {
        self.upgrade_state() == UpgradeState::UpgradeInProgress
    }

    pub fn is_upgrade_complete(&self) -> bool {
        self.upgrade_state() == UpgradeState::UpgradeComplete
    }

    pub fn is_startup_complete(&self) -> bool {
        self.startup_complete.load(Ordering::Acquire)
    }

    pub fn is_new_install(&self) -> bool {
        self.control().new_install
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &UpgradeSettings {
        &self.settings
    }

    pub fn scripts(&self) -> &dyn ScriptSource {
        self.scripts.as_ref()
    }

    /// Live record of a module
    pub fn record(&self, name: &str) -> Option<ModuleRecord> {
        self.control().records.get(&name.to_lowercase()).cloned()
    }

    pub fn failures(&self) -> Vec<(String, String)> {
        self.control().failures.clone()
    }

    pub fn startup_failure(&self) -> Option<String> {
        self.control().startup_failure.clone()
    }

    /// Snapshot of live upgrade progress
    pub fn status(&self) -> StatusReport {
        let startup_complete = self.is_startup_complete();
        let control = self.control();

        let modules = self
            .registry
            .descriptors()
            .map(|d| {
                let key = d.key();
                let record = control
                    .records
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| ModuleRecord::new_install(d));
                ModuleStatus {
                    name: d.name.clone(),
                    state: record.state,
                    state_description: record.describe(d.version),
                    message: record.message.clone(),
                    original_version: record.original_version,
                    installed_version: record.installed_version,
                    version: d.version,
                    schemas: d.schemas.clone(),
                    running_scripts: control.running.get(&key).cloned().unwrap_or_default(),
                    failure: control.failure(&d.name).map(str::to_string),
                }
            })
            .collect();

        StatusReport {
            state: control.state,
            upgrade_required: control.state == UpgradeState::UpgradeRequired,
            upgrade_in_progress: control.state == UpgradeState::UpgradeInProgress,
            startup_complete,
            new_install: control.new_install,
            currently_upgrading_module: control.currently_upgrading.clone(),
            modules,
            failures: control.failures.clone(),
            startup_failure: control.startup_failure.clone(),
            generated_at: Utc::now(),
        }
    }
}

/// Run a module hook, turning errors and panics into a message
fn run_hook(hook: impl FnOnce() -> Result<(), HookError>) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(hook)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_hook_catches_errors_and_panics() {
        assert!(run_hook(|| Ok(())).is_ok());
        assert_eq!(run_hook(|| Err("nope".into())).unwrap_err(), "nope");
        let message = run_hook(|| panic!("kaboom")).unwrap_err();
        assert_eq!(message, "panicked: kaboom");
    }

    #[test]
    fn test_failure_map_is_case_insensitive() {
        let mut control = UpgradeControl {
            state: UpgradeState::UpgradeRequired,
            records: HashMap::new(),
            failures: Vec::new(),
            running: HashMap::new(),
            currently_upgrading: None,
            startup_failure: None,
            new_install: false,
        };
        control.record_failure("Wiki", "first".to_string());
        control.record_failure("WIKI", "second".to_string());
        assert_eq!(control.failures.len(), 1);
        assert_eq!(control.failure("wiki"), Some("second"));
    }
}
