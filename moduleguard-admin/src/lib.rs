//! Moduleguard Admin Library
//!
//! Report rendering, read-only planning and the gated HTTP service behind the
//! `moduleguard-admin` binary (main.rs).

pub mod report;
pub mod server;

use moduleguard::GuardConfig;

/// Environment variables consulted for the database URL, in order
pub const DATABASE_URL_VARS: [&str; 2] = ["MODULEGUARD_DATABASE_URL", "DATABASE_URL"];

/// Pick the database URL: the command line wins, then the environment, then config
pub fn resolve_database_url(cli: Option<String>, config: &GuardConfig) -> String {
    cli.or_else(|| {
        DATABASE_URL_VARS
            .iter()
            .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
    })
    .unwrap_or_else(|| config.database.url.clone())
}
