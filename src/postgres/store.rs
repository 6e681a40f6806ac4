//! `PgModuleStore` - module records in the `core.modules` table

use crate::error::StoreError;
use crate::lifecycle::{ModuleRecord, ModuleState, ModuleStore};
use crate::version::Version;
use may_postgres::types::ToSql;
use may_postgres::{Client, Row};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fully qualified name of the module table
pub const MODULES_TABLE: &str = "core.modules";

const CREATE_SQL: &str = r#"
    CREATE SCHEMA IF NOT EXISTS core;
    CREATE TABLE IF NOT EXISTS core.modules (
        Name VARCHAR(255) NOT NULL PRIMARY KEY,
        InstalledVersion NUMERIC(15,3) NOT NULL,
        OriginalVersion NUMERIC(15,3) NOT NULL,
        Schemas TEXT NOT NULL DEFAULT '',
        AutoUninstall BOOLEAN NOT NULL DEFAULT false,
        ModuleState VARCHAR(32) NOT NULL,
        Message TEXT NULL,
        SchemaVersions TEXT NOT NULL DEFAULT '{}'
    );
"#;

const SELECT_COLUMNS: &str = "Name, InstalledVersion, OriginalVersion, Schemas, AutoUninstall, \
     ModuleState, Message, SchemaVersions";

const UPSERT_SQL: &str = r#"
    INSERT INTO core.modules
        (Name, InstalledVersion, OriginalVersion, Schemas, AutoUninstall, ModuleState, Message, SchemaVersions)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (Name) DO UPDATE SET
        InstalledVersion = EXCLUDED.InstalledVersion,
        Schemas = EXCLUDED.Schemas,
        AutoUninstall = EXCLUDED.AutoUninstall,
        ModuleState = EXCLUDED.ModuleState,
        Message = EXCLUDED.Message,
        SchemaVersions = EXCLUDED.SchemaVersions
"#;

/// Module store backed by PostgreSQL
///
/// The table is created lazily by the first write, so [`ModuleStore::exists`]
/// reports `false` on a database that has never been installed.
pub struct PgModuleStore {
    client: Client,
    created: AtomicBool,
}

impl PgModuleStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            created: AtomicBool::new(false),
        }
    }

    /// Create the schema and table if they are missing
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Sql` if the DDL fails.
    pub fn ensure_table(&self) -> Result<(), StoreError> {
        if self.created.load(Ordering::Acquire) {
            return Ok(());
        }
        self.client.batch_execute(CREATE_SQL)?;
        self.created.store(true, Ordering::Release);
        log::debug!("Ensured {} exists", MODULES_TABLE);
        Ok(())
    }
}

impl ModuleStore for PgModuleStore {
    fn exists(&self) -> Result<bool, StoreError> {
        if self.created.load(Ordering::Acquire) {
            return Ok(true);
        }
        let rows = self
            .client
            .query("SELECT to_regclass($1::text) IS NOT NULL", &[&MODULES_TABLE])?;
        let exists = match rows.first() {
            Some(row) => row.try_get::<_, bool>(0)?,
            None => false,
        };
        if exists {
            self.created.store(true, Ordering::Release);
        }
        Ok(exists)
    }

    fn get(&self, name: &str) -> Result<Option<ModuleRecord>, StoreError> {
        if !self.exists()? {
            return Ok(None);
        }
        let sql = format!("SELECT {SELECT_COLUMNS} FROM core.modules WHERE lower(Name) = lower($1)");
        let rows = self.client.query(sql.as_str(), &[&name])?;
        rows.first().map(from_row).transpose()
    }

    fn all(&self) -> Result<Vec<ModuleRecord>, StoreError> {
        if !self.exists()? {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {SELECT_COLUMNS} FROM core.modules ORDER BY lower(Name)");
        self.client
            .query(sql.as_str(), &[])?
            .iter()
            .map(from_row)
            .collect()
    }

    fn upsert(&self, record: &ModuleRecord) -> Result<(), StoreError> {
        self.ensure_table()?;

        let installed = record.installed_version.as_decimal();
        let original = record.original_version.as_decimal();
        let schemas = record.schemas.join(",");
        let state = record.state.as_str();
        let schema_versions =
            serde_json::to_string(&record.schema_versions).map_err(|e| StoreError::Corrupt {
                name: record.name.clone(),
                reason: format!("schema versions: {e}"),
            })?;

        let params: [&(dyn ToSql + Sync); 8] = [
            &record.name,
            &installed,
            &original,
            &schemas,
            &record.auto_uninstall,
            &state,
            &record.message,
            &schema_versions,
        ];
        self.client.execute(UPSERT_SQL, &params)?;
        log::debug!(
            "Saved module {} at {} ({})",
            record.name,
            record.installed_version,
            record.state
        );
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        if !self.exists()? {
            return Ok(());
        }
        self.client
            .execute("DELETE FROM core.modules WHERE lower(Name) = lower($1)", &[&name])?;
        Ok(())
    }
}

fn from_row(row: &Row) -> Result<ModuleRecord, StoreError> {
    let name: String = row.try_get(0)?;
    let corrupt = |reason: String| StoreError::Corrupt {
        name: name.clone(),
        reason,
    };

    let installed: Decimal = row.try_get(1)?;
    let original: Decimal = row.try_get(2)?;
    let schemas: String = row.try_get(3)?;
    let auto_uninstall: bool = row.try_get(4)?;
    let state: String = row.try_get(5)?;
    let message: Option<String> = row.try_get(6)?;
    let schema_versions: String = row.try_get(7)?;

    let schema_versions: BTreeMap<String, Version> = serde_json::from_str(&schema_versions)
        .map_err(|e| corrupt(format!("schema versions: {e}")))?;

    Ok(ModuleRecord {
        installed_version: Version::from_decimal(installed).map_err(|e| corrupt(e.to_string()))?,
        original_version: Version::from_decimal(original).map_err(|e| corrupt(e.to_string()))?,
        schemas: split_schemas(&schemas),
        auto_uninstall,
        state: state
            .parse::<ModuleState>()
            .map_err(|e| corrupt(e.to_string()))?,
        message,
        schema_versions,
        new_install: false,
        name,
    })
}

fn split_schemas(schemas: &str) -> Vec<String> {
    schemas
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_schemas() {
        assert_eq!(split_schemas("study, studydataset"), vec!["study", "studydataset"]);
        assert!(split_schemas("").is_empty());
    }

    #[test]
    fn test_upsert_keeps_original_version() {
        let update = UPSERT_SQL
            .split("DO UPDATE SET")
            .nth(1)
            .unwrap_or_default();
        assert!(!update.contains("OriginalVersion"));
        assert!(update.contains("InstalledVersion"));
    }
}
