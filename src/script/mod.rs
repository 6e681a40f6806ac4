//! SQL scripts: parsing, storage and migration chain selection

#[allow(clippy::module_inception)]
pub mod script;
pub mod selector;
pub mod source;

pub use script::{checksum, Script, ScriptKind, ScriptName};
pub use selector::{orphaned, recommend, unreachable, OrphanedScript};
pub use source::{read_scripts, FileScriptSource, ScriptSource, StaticScriptSource, SCRIPTS_DIR};
