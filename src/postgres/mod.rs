//! PostgreSQL backend over `may_postgres`

pub mod connection;
pub mod executor;
pub mod store;

pub use connection::{connect, validate_connection_string, ConnectionError};
pub use executor::PgScriptExecutor;
pub use store::{PgModuleStore, MODULES_TABLE};
