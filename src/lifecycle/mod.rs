//! Module lifecycle: states, persisted records and the store behind them

pub mod record;
pub mod state;
pub mod store;

pub use record::ModuleRecord;
pub use state::{ModuleState, UpgradeState};
pub use store::{MemoryModuleStore, ModuleStore};
