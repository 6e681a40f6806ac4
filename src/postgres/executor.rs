//! `PgScriptExecutor` - runs migration scripts over a `may_postgres` client

use crate::error::SqlError;
use crate::executor::ScriptExecutor;
use may_postgres::Client;

/// Quote a PostgreSQL identifier
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Executes scripts with `batch_execute`, outside any transaction
///
/// Scripts may contain several statements and manage their own transactions.
pub struct PgScriptExecutor {
    client: Client,
}

impl PgScriptExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl ScriptExecutor for PgScriptExecutor {
    fn execute(&self, schema: &str, sql: &str) -> Result<(), SqlError> {
        log::debug!("Executing {} byte script for schema {}", sql.len(), schema);
        self.client.batch_execute(sql).map_err(SqlError::from)
    }

    fn drop_schema(&self, schema: &str) -> Result<(), SqlError> {
        let sql = format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(schema));
        self.client.batch_execute(&sql).map_err(SqlError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("wiki"), "\"wiki\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
