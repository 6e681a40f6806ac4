//! Moduleguard Admin CLI
//!
//! Operator commands for module ordering, upgrade planning, script reports,
//! running upgrades and serving the gated status endpoint.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use moduleguard::postgres::{connect, PgModuleStore, PgScriptExecutor};
use moduleguard::{
    discover, FileScriptSource, GateDecision, GuardConfig, ModuleGuard, ModuleRegistry,
    ModuleStore, StartupGate, UpgradeMode, UpgradeOutcome,
};
use moduleguard_admin::{report, resolve_database_url, server};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "moduleguard-admin")]
#[command(about = "Module upgrade management for moduleguard applications")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file (default: config/config.toml plus MODULEGUARD_* variables)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Modules directory (overrides [modules] dir)
    #[arg(long)]
    modules_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show modules in dependency order
    Order,

    /// Show the scripts each out-of-date module would run
    Plan,

    /// List upgrade scripts superseded by a longer script from the same version
    Orphaned,

    /// List upgrade scripts no supported installed version would ever run
    Unreachable,

    /// Show installed and code versions of every module
    Status {
        /// Print the stored records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Upgrade every out-of-date module in the foreground
    Upgrade,

    /// Delete a module that is no longer on disk and drop its schemas
    Remove {
        /// Module name
        module: String,
    },

    /// Re-run every module's drop and create scripts
    RecreateViews,

    /// Serve the gated status endpoint while modules upgrade
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: String,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

struct Workspace {
    config: GuardConfig,
    database_url: String,
    registry: ModuleRegistry,
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = match &cli.config {
        Some(path) => GuardConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => GuardConfig::load().context("failed to load configuration")?,
    };
    if let Some(dir) = cli.modules_dir {
        config.modules.dir = dir;
    }
    let database_url = resolve_database_url(cli.database_url, &config);

    let discovered = discover(&config.modules.dir)
        .with_context(|| format!("failed to discover modules in {}", config.modules.dir.display()))?;
    for (dir, e) in &discovered.failures {
        log::warn!("Skipping module directory {}: {}", dir, e);
    }
    let registry = ModuleRegistry::from_descriptors(discovered.modules)?;
    let ctx = Workspace {
        config,
        database_url,
        registry,
    };
    let scripts = FileScriptSource::new();

    match cli.command {
        Commands::Order => print!("{}", report::render_order(&ctx.registry)),
        Commands::Orphaned => {
            let found = report::collect_orphaned(&ctx.registry, &scripts)?;
            print!("{}", report::render_orphaned(&found));
        }
        Commands::Unreachable => {
            let found = report::collect_unreachable(
                &ctx.registry,
                &scripts,
                &ctx.config.upgrade.supported_origins,
            )?;
            print!("{}", report::render_unreachable(&found));
        }
        Commands::Plan => {
            let store = PgModuleStore::new(connect(&ctx.database_url)?);
            let plans = report::dry_run_plan(&ctx.registry, &store, &scripts)?;
            print!("{}", report::render_plan(&plans));
        }
        Commands::Status { json } => {
            let store = PgModuleStore::new(connect(&ctx.database_url)?);
            let records = store.all()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                print!("{}", report::render_store(&ctx.registry, &records));
            }
        }
        Commands::Upgrade => {
            let guard = bootstrap(&ctx)?;
            match guard.start(UpgradeMode::Foreground)? {
                UpgradeOutcome::Completed(summary) => {
                    print!("{}", report::render_report(&summary));
                    if !summary.is_success() {
                        return Ok(1);
                    }
                }
                _ => println!("All modules are up to date"),
            }
        }
        Commands::Remove { module } => {
            let guard = bootstrap(&ctx)?;
            let record = guard.remove_module(&module)?;
            println!("Removed {} ({} schema(s) dropped)", record.name, record.schemas.len());
        }
        Commands::RecreateViews => {
            let guard = bootstrap(&ctx)?;
            let count = guard.recreate_views()?;
            println!("Ran {count} view script(s)");
        }
        Commands::Serve { listen } => {
            let guard = bootstrap(&ctx)?;
            match guard.start(ctx.config.upgrade.mode)? {
                UpgradeOutcome::Started(_job) => log::info!("Upgrading modules in the background"),
                UpgradeOutcome::Completed(summary) => print!("{}", report::render_report(&summary)),
                UpgradeOutcome::Deferred => log::info!("Waiting for a request to /admin/upgrade"),
                UpgradeOutcome::NotNeeded => {}
            }
            let gate = Arc::new(StartupGate::new(guard, &ctx.config.gate));
            if let GateDecision::Proceed = gate.admit("/") {
                log::info!("All modules started");
            }
            server::serve(gate, &listen).with_context(|| format!("failed to serve on {listen}"))?;
        }
    }
    Ok(0)
}

fn bootstrap(ctx: &Workspace) -> anyhow::Result<Arc<ModuleGuard>> {
    let client = connect(&ctx.database_url)?;
    let guard = ModuleGuard::builder(
        Arc::new(PgModuleStore::new(client.clone())),
        Arc::new(PgScriptExecutor::new(client)),
    )
    .modules(ctx.registry.modules().iter().cloned())
    .settings(ctx.config.upgrade.clone())
    .bootstrap()?;
    Ok(guard)
}
