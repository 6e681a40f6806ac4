//! Migration chain selection
//!
//! Given every upgrade script declared for one schema, [`recommend`] picks the
//! chain that moves the schema from its installed version to the target
//! version. The walk is greedy and deterministic:
//!
//! 1. Among scripts starting at the current version, take the one reaching
//!    furthest without passing the target.
//! 2. If every script starting there passes the target, take the one that
//!    passes it by the least. That step necessarily ends the chain.
//! 3. If nothing starts at the current version, there is no path.
//!
//! Scripts with identical ranges are tie-broken by file name, first wins.
//! Create and drop scripts never take part in a chain.

use crate::error::NoMigrationPath;
use crate::script::Script;
use crate::version::Version;
use std::cmp::Reverse;
use std::collections::HashSet;

/// A script that the selector will never pick because another script with the
/// same starting version is always preferred
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedScript {
    pub script: Script,
    pub superseded_by: Script,
}

/// Compute the ordered chain of scripts moving `schema` from `from` to `to`
///
/// Returns an empty chain when `from >= to`. On success, consecutive scripts
/// satisfy `chain[i].to_version == chain[i + 1].from_version`, the first
/// script starts at `from`, and the last one reaches at least `to`.
///
/// # Errors
///
/// Returns `NoMigrationPath` carrying the last reachable version when no
/// script starts at some intermediate version.
pub fn recommend(
    schema: &str,
    scripts: &[Script],
    from: Version,
    to: Version,
) -> Result<Vec<Script>, NoMigrationPath> {
    let (chain, reached) = walk(scripts, from, to);
    if reached < to {
        return Err(NoMigrationPath {
            schema: schema.to_string(),
            from,
            reached,
            target: to,
        });
    }
    Ok(chain.into_iter().cloned().collect())
}

/// Follow the greedy rule as far as it goes; returns the chain and the version reached
fn walk(scripts: &[Script], from: Version, to: Version) -> (Vec<&Script>, Version) {
    let mut chain = Vec::new();
    let mut current = from;

    while current < to {
        let starting: Vec<&Script> = scripts
            .iter()
            .filter(|s| s.is_upgrade() && s.from_version == current)
            .collect();

        let next = starting
            .iter()
            .copied()
            .filter(|s| s.to_version <= to)
            .max_by_key(|s| (s.to_version, Reverse(s.filename.as_str())))
            .or_else(|| {
                starting
                    .iter()
                    .copied()
                    .min_by_key(|s| (s.to_version, s.filename.as_str()))
            });

        // Nothing starts here
        let Some(script) = next else {
            break;
        };
        current = script.to_version;
        chain.push(script);
    }

    (chain, current)
}

/// Scripts superseded by another script sharing their starting version
///
/// A script is orphaned when another script with the same `from_version`
/// reaches further, or when it duplicates the range of a script whose file
/// name sorts first.
#[must_use]
pub fn orphaned(scripts: &[Script]) -> Vec<OrphanedScript> {
    let upgrades: Vec<&Script> = scripts.iter().filter(|s| s.is_upgrade()).collect();
    let mut result = Vec::new();

    for script in &upgrades {
        let preferred = upgrades
            .iter()
            .filter(|o| o.schema == script.schema && o.from_version == script.from_version)
            .max_by_key(|o| (o.to_version, Reverse(o.filename.as_str())));

        if let Some(preferred) = preferred {
            if preferred.filename != script.filename {
                result.push(OrphanedScript {
                    script: (*script).clone(),
                    superseded_by: (*preferred).clone(),
                });
            }
        }
    }

    result.sort_by(|a, b| a.script.cmp(&b.script));
    result
}

/// Scripts that no chain from any of `origins` to `target` ever selects
///
/// Origins from which no complete path exists still contribute the part of
/// the chain that can be walked.
#[must_use]
pub fn unreachable(scripts: &[Script], origins: &[Version], target: Version) -> Vec<Script> {
    let mut used: HashSet<&str> = HashSet::new();
    for origin in origins {
        let (chain, _) = walk(scripts, *origin, target);
        used.extend(chain.iter().map(|s| s.filename.as_str()));
    }

    let mut result: Vec<Script> = scripts
        .iter()
        .filter(|s| s.is_upgrade() && !used.contains(s.filename.as_str()))
        .cloned()
        .collect();
    result.sort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn script(filename: &str) -> Script {
        Script::from_file("Core", filename, "").unwrap()
    }

    fn names(chain: &[Script]) -> Vec<&str> {
        chain.iter().map(|s| s.filename.as_str()).collect()
    }

    fn core_scripts() -> Vec<Script> {
        vec![
            script("core-0.00-10.30.sql"),
            script("core-10.30-10.31.sql"),
            script("core-10.30-11.00.sql"),
        ]
    }

    #[test]
    fn test_prefers_largest_hop_within_target() {
        let chain = recommend("core", &core_scripts(), Version::ZERO, v("11.0")).unwrap();
        assert_eq!(names(&chain), vec!["core-0.00-10.30.sql", "core-10.30-11.00.sql"]);
    }

    #[test]
    fn test_reports_superseded_script_as_orphaned() {
        let orphans = orphaned(&core_scripts());
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].script.filename, "core-10.30-10.31.sql");
        assert_eq!(orphans[0].superseded_by.filename, "core-10.30-11.00.sql");
    }

    #[test]
    fn test_does_not_pass_target_when_an_exact_step_exists() {
        let chain = recommend("core", &core_scripts(), Version::ZERO, v("10.31")).unwrap();
        assert_eq!(names(&chain), vec!["core-0.00-10.30.sql", "core-10.30-10.31.sql"]);
    }

    #[test]
    fn test_overshoot_only_as_last_step() {
        let scripts = vec![
            script("core-1.00-2.00.sql"),
            script("core-2.00-4.00.sql"),
            script("core-2.00-5.00.sql"),
        ];
        let chain = recommend("core", &scripts, v("1.0"), v("3.0")).unwrap();
        assert_eq!(names(&chain), vec!["core-1.00-2.00.sql", "core-2.00-4.00.sql"]);
        assert!(chain.last().unwrap().to_version >= v("3.0"));
    }

    #[test]
    fn test_chain_is_contiguous() {
        let scripts = vec![
            script("core-0.00-1.00.sql"),
            script("core-1.00-1.10.sql"),
            script("core-1.10-1.20.sql"),
            script("core-1.20-2.00.sql"),
            script("core-1.00-1.20.sql"),
        ];
        let chain = recommend("core", &scripts, Version::ZERO, v("2.0")).unwrap();
        assert_eq!(chain.first().unwrap().from_version, Version::ZERO);
        for pair in chain.windows(2) {
            assert_eq!(pair[0].to_version, pair[1].from_version);
        }
        assert_eq!(
            names(&chain),
            vec!["core-0.00-1.00.sql", "core-1.00-1.20.sql", "core-1.20-2.00.sql"]
        );
    }

    #[test]
    fn test_no_path_reports_last_reachable_version() {
        let scripts = vec![script("core-0.00-1.00.sql"), script("core-2.00-3.00.sql")];
        let err = recommend("core", &scripts, Version::ZERO, v("3.0")).unwrap_err();
        assert_eq!(err.reached, v("1.0"));
        assert_eq!(err.target, v("3.0"));
        assert_eq!(err.schema, "core");
    }

    #[test]
    fn test_already_at_target_is_empty() {
        assert!(recommend("core", &core_scripts(), v("11.0"), v("11.0")).unwrap().is_empty());
        assert!(recommend("core", &[], v("12.0"), v("11.0")).unwrap().is_empty());
    }

    #[test]
    fn test_resume_from_intermediate_version() {
        let scripts = vec![
            script("core-0.00-1.00.sql"),
            script("core-1.00-2.00.sql"),
            script("core-2.00-3.00.sql"),
        ];
        let chain = recommend("core", &scripts, v("2.0"), v("3.0")).unwrap();
        assert_eq!(names(&chain), vec!["core-2.00-3.00.sql"]);
    }

    #[test]
    fn test_duplicate_ranges_pick_first_filename() {
        let scripts = vec![script("core-1.0-2.0.sql"), script("core-1.00-2.00.sql")];
        let chain = recommend("core", &scripts, v("1.0"), v("2.0")).unwrap();
        assert_eq!(names(&chain), vec!["core-1.0-2.0.sql"]);

        let orphans = orphaned(&scripts);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].script.filename, "core-1.00-2.00.sql");
    }

    #[test]
    fn test_view_scripts_are_ignored() {
        let mut scripts = core_scripts();
        scripts.push(script("core-create.sql"));
        scripts.push(script("core-drop.sql"));
        let chain = recommend("core", &scripts, Version::ZERO, v("11.0")).unwrap();
        assert_eq!(chain.len(), 2);
        assert!(orphaned(&scripts).iter().all(|o| o.script.is_upgrade()));
    }

    #[test]
    fn test_unreachable_scripts() {
        let scripts = vec![
            script("core-0.00-12.10.sql"),
            script("core-12.10-12.20.sql"),
            script("core-12.20-13.10.sql"),
            script("core-11.20-11.30.sql"),
            script("core-12.10-12.11.sql"),
        ];
        let origins = [Version::ZERO, v("12.1"), v("12.2")];
        let unused = unreachable(&scripts, &origins, v("13.1"));
        let unused: Vec<&str> = unused.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(unused, vec!["core-11.20-11.30.sql", "core-12.10-12.11.sql"]);
    }
}
