//! Per-module schema upgrade
//!
//! Brings every schema a module owns from its checkpointed version to the
//! module's code version, one script at a time, persisting the record after
//! each script so an interrupted upgrade resumes exactly where it stopped.

use crate::error::UpgradeError;
use crate::executor::ScriptExecutor;
use crate::lifecycle::{ModuleRecord, ModuleStore};
use crate::module::ModuleDescriptor;
use crate::script::{recommend, Script, ScriptSource};
use crate::version::Version;
use std::time::Instant;

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// What will run for one schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaPlan {
    pub schema: String,
    pub from: Version,
    pub to: Version,
    /// Runs before the chain when the schema is already installed
    pub drop: Option<Script>,
    pub chain: Vec<Script>,
    /// Runs after the chain
    pub create: Option<Script>,
}

impl SchemaPlan {
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Every script in execution order
    pub fn scripts(&self) -> impl Iterator<Item = &Script> {
        self.drop.iter().chain(self.chain.iter()).chain(self.create.iter())
    }
}

/// Progress notifications sent while a module upgrades
#[derive(Debug)]
pub enum UpgradeEvent<'a> {
    ScriptStarted(&'a Script),
    /// The record has already been persisted when this is sent
    ScriptFinished(&'a Script, &'a ModuleRecord),
}

/// Runs a module's scripts against the executor and checkpoints the store
pub struct ModuleUpgrader<'a> {
    scripts: &'a dyn ScriptSource,
    executor: &'a dyn ScriptExecutor,
    store: &'a dyn ModuleStore,
}

impl<'a> ModuleUpgrader<'a> {
    pub fn new(
        scripts: &'a dyn ScriptSource,
        executor: &'a dyn ScriptExecutor,
        store: &'a dyn ModuleStore,
    ) -> Self {
        Self {
            scripts,
            executor,
            store,
        }
    }

    /// Compute the scripts each schema needs, without running anything
    ///
    /// A schema with no upgrade script reaching past its current version needs
    /// no SQL and gets an empty plan.
    ///
    /// # Errors
    ///
    /// `UpgradeError::Script` if scripts cannot be read and
    /// `UpgradeError::NoMigrationPath` if a schema's chain has a gap.
    pub fn plan(
        &self,
        descriptor: &ModuleDescriptor,
        record: &ModuleRecord,
    ) -> Result<Vec<SchemaPlan>, UpgradeError> {
        let target = descriptor.version;
        let mut plans = Vec::with_capacity(descriptor.schemas.len());

        for schema in &descriptor.schemas {
            let from = record.schema_version(schema);
            let mut plan = SchemaPlan {
                schema: schema.clone(),
                from,
                to: target,
                drop: None,
                chain: Vec::new(),
                create: None,
            };

            if from < target {
                let upgrades = self.scripts.upgrade_scripts(descriptor, schema)?;
                if upgrades.iter().any(|s| s.to_version > from) {
                    plan.chain = recommend(schema, &upgrades, from, target)?;
                }
            }

            if !plan.chain.is_empty() {
                if !from.is_zero() {
                    plan.drop = self.scripts.drop_script(descriptor, schema)?;
                }
                plan.create = self.scripts.create_script(descriptor, schema)?;
            }

            plans.push(plan);
        }

        Ok(plans)
    }

    /// Upgrade `descriptor`'s schemas, updating and persisting `record` as scripts complete
    ///
    /// On success the record's installed version is at least the code version.
    /// On failure the record reflects the last script that succeeded.
    ///
    /// # Errors
    ///
    /// The first planning, SQL or store error; nothing after it runs.
    pub fn upgrade(
        &self,
        descriptor: &ModuleDescriptor,
        record: &mut ModuleRecord,
        on_event: &mut dyn FnMut(UpgradeEvent<'_>),
    ) -> Result<usize, UpgradeError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::module_upgrade_span(&descriptor.name).entered();

        let target = descriptor.version;
        log::info!(
            "Upgrading module {} from {} to {}",
            descriptor.name,
            record.installed_version,
            target
        );

        let plans = self.plan(descriptor, record)?;
        let mut scripts_run = 0;

        for plan in &plans {
            if plan.is_empty() {
                if plan.from < target {
                    record.record_schema_version(&plan.schema, target);
                }
                continue;
            }

            log::info!(
                "Schema {}: running {} script(s) from {} to {}",
                plan.schema,
                plan.chain.len(),
                plan.from,
                plan.to
            );

            if let Some(drop) = &plan.drop {
                self.run(descriptor, drop, on_event)?;
            }

            for script in &plan.chain {
                self.run(descriptor, script, on_event)?;
                record.record_schema_version(&plan.schema, script.to_version);
                self.store.upsert(record)?;
                scripts_run += 1;
                on_event(UpgradeEvent::ScriptFinished(script, record));
            }

            if let Some(create) = &plan.create {
                self.run(descriptor, create, on_event)?;
            }
        }

        record.set_installed_version(target);
        record.message = None;
        self.store.upsert(record)?;

        log::info!(
            "Module {} is at version {} ({} script(s) run)",
            descriptor.name,
            record.installed_version,
            scripts_run
        );
        Ok(scripts_run)
    }

    fn run(
        &self,
        descriptor: &ModuleDescriptor,
        script: &Script,
        on_event: &mut dyn FnMut(UpgradeEvent<'_>),
    ) -> Result<(), UpgradeError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::run_script_span(&descriptor.name, &script.filename).entered();

        on_event(UpgradeEvent::ScriptStarted(script));
        log::debug!("Running {} ({})", script, script.checksum);

        let start = Instant::now();
        self.executor
            .execute(&script.schema, &script.contents)
            .map_err(|source| {
                log::error!("Script {} failed: {}", script, source);
                UpgradeError::Sql {
                    module: descriptor.name.clone(),
                    script: script.filename.clone(),
                    source,
                }
            })?;

        let elapsed = start.elapsed();
        #[cfg(feature = "metrics")]
        crate::metrics::record_script(&descriptor.name, elapsed);
        log::debug!("Finished {} in {:?}", script, elapsed);
        Ok(())
    }
}
