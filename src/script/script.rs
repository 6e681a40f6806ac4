//! SQL script records and file name parsing

use crate::error::ScriptError;
use crate::version::Version;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

type Pattern = Lazy<Result<Regex, regex::Error>>;

static UPGRADE_SCRIPT: Pattern = Lazy::new(|| {
    Regex::new(r"^(?P<schema>.+?)-(?P<from>\d+(?:\.\d+)?)-(?P<to>\d+(?:\.\d+)?)\.sql$")
});

static VIEW_SCRIPT: Pattern =
    Lazy::new(|| Regex::new(r"^(?P<schema>.+?)-(?P<kind>create|drop)\.sql$"));

fn compiled(pattern: &Pattern) -> Result<&Regex, ScriptError> {
    Result::as_ref(pattern).map_err(|e| ScriptError::Pattern(e.clone()))
}

/// What a script does to its schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScriptKind {
    /// Moves a schema from `from_version` to `to_version`
    Upgrade,
    /// Recreates views and other derived objects after an upgrade
    Create,
    /// Drops views and other derived objects before an upgrade
    Drop,
}

/// A parsed script file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptName {
    pub schema: String,
    pub kind: ScriptKind,
    pub from_version: Version,
    pub to_version: Version,
}

impl ScriptName {
    /// Parse a script file name
    ///
    /// Accepted forms:
    /// - `<schema>-<from>-<to>.sql`, e.g. `core-14.20-14.30.sql`
    /// - `<schema>-create.sql`
    /// - `<schema>-drop.sql`
    ///
    /// # Errors
    ///
    /// Returns `ScriptError::InvalidFilename` when the name matches neither
    /// form and `ScriptError::InvalidRange` when `from >= to`.
    pub fn parse(filename: &str) -> Result<Self, ScriptError> {
        if let Some(caps) = compiled(&VIEW_SCRIPT)?.captures(filename) {
            let kind = if &caps["kind"] == "create" {
                ScriptKind::Create
            } else {
                ScriptKind::Drop
            };
            return Ok(Self {
                schema: caps["schema"].to_string(),
                kind,
                from_version: Version::ZERO,
                to_version: Version::ZERO,
            });
        }

        let caps = compiled(&UPGRADE_SCRIPT)?
            .captures(filename)
            .ok_or_else(|| ScriptError::InvalidFilename {
                filename: filename.to_string(),
            })?;

        let parse = |s: &str| {
            Version::from_str(s).map_err(|source| ScriptError::InvalidVersion {
                filename: filename.to_string(),
                source,
            })
        };
        let from_version = parse(&caps["from"])?;
        let to_version = parse(&caps["to"])?;

        if from_version >= to_version {
            return Err(ScriptError::InvalidRange {
                filename: filename.to_string(),
                from: from_version,
                to: to_version,
            });
        }

        Ok(Self {
            schema: caps["schema"].to_string(),
            kind: ScriptKind::Upgrade,
            from_version,
            to_version,
        })
    }
}

/// An immutable SQL script belonging to one schema of one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    /// Module that ships the script
    pub module: String,
    pub schema: String,
    pub kind: ScriptKind,
    /// Zero for create/drop scripts
    pub from_version: Version,
    /// Zero for create/drop scripts
    pub to_version: Version,
    pub filename: String,
    pub contents: String,
    /// Hex SHA-256 of `contents`
    pub checksum: String,
}

impl Script {
    /// Build a script from its file name and contents
    ///
    /// # Errors
    ///
    /// Returns `ScriptError` if the file name cannot be parsed.
    pub fn from_file(
        module: impl Into<String>,
        filename: impl Into<String>,
        contents: impl Into<String>,
    ) -> Result<Self, ScriptError> {
        let filename = filename.into();
        let name = ScriptName::parse(&filename)?;
        let contents = contents.into();
        Ok(Self {
            module: module.into(),
            schema: name.schema,
            kind: name.kind,
            from_version: name.from_version,
            to_version: name.to_version,
            checksum: checksum(&contents),
            filename,
            contents,
        })
    }

    /// True for upgrade scripts that start from an already installed schema
    ///
    /// Bootstrap scripts (`from == 0`) and create/drop scripts are not incremental.
    #[must_use]
    pub fn is_incremental(&self) -> bool {
        self.kind == ScriptKind::Upgrade && !self.from_version.is_zero()
    }

    #[must_use]
    pub fn is_upgrade(&self) -> bool {
        self.kind == ScriptKind::Upgrade
    }

    /// Human readable range, e.g. `10.30 -> 11.00`
    #[must_use]
    pub fn range(&self) -> String {
        format!("{} -> {}", self.from_version, self.to_version)
    }
}

impl Ord for Script {
    fn cmp(&self, other: &Self) -> Ordering {
        self.schema
            .cmp(&other.schema)
            .then(self.kind.cmp(&other.kind))
            .then(self.from_version.cmp(&other.from_version))
            .then(self.to_version.cmp(&other.to_version))
            .then_with(|| self.filename.cmp(&other.filename))
    }
}

impl PartialOrd for Script {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.filename)
    }
}

/// Hex SHA-256 of script contents
#[must_use]
pub fn checksum(contents: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contents.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upgrade_filename() {
        let name = ScriptName::parse("core-14.20-14.30.sql").unwrap();
        assert_eq!(name.schema, "core");
        assert_eq!(name.kind, ScriptKind::Upgrade);
        assert_eq!(name.from_version, "14.2".parse().unwrap());
        assert_eq!(name.to_version, "14.3".parse().unwrap());
    }

    #[test]
    fn test_parse_schema_with_dashes() {
        let name = ScriptName::parse("study-design-0.00-12.10.sql").unwrap();
        assert_eq!(name.schema, "study-design");
        assert!(name.from_version.is_zero());
    }

    #[test]
    fn test_parse_view_scripts() {
        assert_eq!(ScriptName::parse("exp-create.sql").unwrap().kind, ScriptKind::Create);
        assert_eq!(ScriptName::parse("exp-drop.sql").unwrap().kind, ScriptKind::Drop);
    }

    #[test]
    fn test_parse_rejects_bad_names() {
        assert!(matches!(
            ScriptName::parse("core.sql"),
            Err(ScriptError::InvalidFilename { .. })
        ));
        assert!(matches!(
            ScriptName::parse("core-12.00-11.00.sql"),
            Err(ScriptError::InvalidRange { .. })
        ));
        assert!(matches!(
            ScriptName::parse("core-12.00-12.0.sql"),
            Err(ScriptError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_broken_pattern_is_reported() {
        static UNBALANCED: Pattern = Lazy::new(|| Regex::new(r"^(?P<schema>.+\.sql$"));
        let err = compiled(&UNBALANCED).unwrap_err();
        assert!(matches!(err, ScriptError::Pattern(_)));
        assert!(err.to_string().contains("failed to compile"));
        assert!(compiled(&UPGRADE_SCRIPT).is_ok());
    }

    #[test]
    fn test_incremental_flag() {
        let bootstrap = Script::from_file("Core", "core-0.00-10.30.sql", "").unwrap();
        let step = Script::from_file("Core", "core-10.30-11.00.sql", "").unwrap();
        let view = Script::from_file("Core", "core-create.sql", "").unwrap();
        assert!(!bootstrap.is_incremental());
        assert!(step.is_incremental());
        assert!(!view.is_incremental());
        assert!(!view.is_upgrade());
    }

    #[test]
    fn test_checksum_is_stable() {
        let a = Script::from_file("Core", "core-0.00-1.00.sql", "CREATE TABLE t (id INT);").unwrap();
        let b = Script::from_file("Core", "core-1.00-2.00.sql", "CREATE TABLE t (id INT);").unwrap();
        assert_eq!(a.checksum, b.checksum);
        assert_eq!(a.checksum.len(), 64);
        assert_ne!(a.checksum, checksum("DROP TABLE t;"));
    }
}
