//! Script executor - runs SQL script contents against a schema
//!
//! The orchestrator never talks to the database directly. Everything it runs
//! goes through [`ScriptExecutor`], so the relational backend (and any dialect
//! differences) stays behind this seam. Implementations must run each script
//! outside any ambient transaction: migrations commit incrementally.

use crate::error::SqlError;
use std::sync::Mutex;

/// Runs scripts on behalf of the upgrade orchestrator
pub trait ScriptExecutor: Send + Sync {
    /// Execute `sql` with `schema` as the target schema
    ///
    /// # Errors
    ///
    /// Returns `SqlError` if any statement in the script fails.
    fn execute(&self, schema: &str, sql: &str) -> Result<(), SqlError>;

    /// Drop `schema` and everything in it
    ///
    /// # Errors
    ///
    /// Returns `SqlError` if the schema exists but cannot be dropped.
    fn drop_schema(&self, schema: &str) -> Result<(), SqlError>;
}

/// One call observed by a [`RecordingExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutedStatement {
    Script { schema: String, sql: String },
    DropSchema { schema: String },
}

/// Executor that records what it is asked to run instead of touching a database
///
/// Used for dry runs (`moduleguard-admin plan`) and in tests. Scripts whose
/// contents contain the configured marker fail with a `SqlError`.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    statements: Mutex<Vec<ExecutedStatement>>,
    fail_marker: Option<String>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every script whose contents contain `marker`
    #[must_use]
    pub fn failing_on(marker: impl Into<String>) -> Self {
        Self {
            statements: Mutex::new(Vec::new()),
            fail_marker: Some(marker.into()),
        }
    }

    /// Everything executed so far, in order
    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Contents of the scripts executed so far, in order
    pub fn scripts(&self) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter_map(|s| match s {
                ExecutedStatement::Script { sql, .. } => Some(sql),
                ExecutedStatement::DropSchema { .. } => None,
            })
            .collect()
    }

    fn push(&self, statement: ExecutedStatement) -> Result<(), SqlError> {
        self.statements
            .lock()
            .map_err(|_| SqlError::new("recording executor lock poisoned"))?
            .push(statement);
        Ok(())
    }
}

impl ScriptExecutor for RecordingExecutor {
    fn execute(&self, schema: &str, sql: &str) -> Result<(), SqlError> {
        if let Some(marker) = &self.fail_marker {
            if sql.contains(marker.as_str()) {
                return Err(SqlError::new(format!(
                    "script for schema {schema} failed on '{marker}'"
                )));
            }
        }
        self.push(ExecutedStatement::Script {
            schema: schema.to_string(),
            sql: sql.to_string(),
        })
    }

    fn drop_schema(&self, schema: &str) -> Result<(), SqlError> {
        self.push(ExecutedStatement::DropSchema {
            schema: schema.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_executor_records_in_order() {
        let executor = RecordingExecutor::new();
        executor.execute("wiki", "CREATE TABLE wiki.pages ();").unwrap();
        executor.drop_schema("old").unwrap();
        assert_eq!(
            executor.statements(),
            vec![
                ExecutedStatement::Script {
                    schema: "wiki".to_string(),
                    sql: "CREATE TABLE wiki.pages ();".to_string(),
                },
                ExecutedStatement::DropSchema {
                    schema: "old".to_string()
                },
            ]
        );
        assert_eq!(executor.scripts().len(), 1);
    }

    #[test]
    fn test_recording_executor_fails_on_marker() {
        let executor = RecordingExecutor::failing_on("BOOM");
        let err = executor.execute("wiki", "SELECT 'BOOM';").unwrap_err();
        assert!(err.to_string().contains("BOOM"));
        assert!(executor.statements().is_empty());
    }
}
