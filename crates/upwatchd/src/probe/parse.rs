//! Parsing of package-manager output.
//!
//! The dry-run invocations use a fixed flag set precisely so that this
//! line-oriented format stays stable. Parsing is lenient: a malformed line
//! is skipped, never an error for the whole probe.

use std::sync::OnceLock;

use regex::Regex;

use upwatch_core::{OrphanSet, PackageRef, UpdateSet};

/// Patterns in dry-run output that mean the configuration blocks the
/// upgrade: USE-flag conflicts, masked packages, required manual edits.
const CONFIG_BLOCK_PATTERNS: [&str; 3] = [
    r"The following .* changes are necessary to proceed",
    r"REQUIRED_USE flag constraints are unsatisfied",
    r"masked packages.*required to complete your request",
];

fn config_block_regexes() -> &'static Vec<Regex> {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        CONFIG_BLOCK_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("hardcoded pattern"))
            .collect()
    })
}

/// Captures `category/name` and a version with optional prerelease and
/// revision suffixes from a depclean report line such as
/// `"dev-libs/foo: 1.2.3-r1"`.
fn depclean_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(
            r"^\s*([a-z0-9+_.-]+/[A-Za-z0-9+_-]+):\s+([0-9][A-Za-z0-9.]*(?:_(?:alpha|beta|pre|rc|p)[0-9]*)?(?:-r[0-9]+)?)",
        )
        .expect("hardcoded pattern")
    })
}

/// Simple scheme+host+tld+optional-port+optional-path check for the
/// configured connectivity endpoint.
pub fn is_valid_url(url: &str) -> bool {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let re = REGEX.get_or_init(|| {
        Regex::new(r"^(http|https)://([a-zA-Z0-9.-]+)(\.[a-zA-Z]{2,})(:\d+)?(/.*)?$")
            .expect("hardcoded pattern")
    });
    re.is_match(url)
}

/// Parses the update dry-run report.
///
/// Lines carrying a `[binary` marker populate the binary set, `[ebuild`
/// lines the source set. The configuration-block patterns are matched
/// against every line; stdout and stderr may be interleaved.
pub fn parse_update_report<'a, I>(lines: I) -> UpdateSet
where
    I: IntoIterator<Item = &'a str>,
{
    let mut set = UpdateSet::default();

    for line in lines {
        if !set.configuration_blocked
            && config_block_regexes().iter().any(|re| re.is_match(line))
        {
            set.configuration_blocked = true;
        }

        if line.contains("[binary") {
            if let Some(atom) = extract_atom(line) {
                set.binary.push(atom);
            }
        } else if line.contains("[ebuild") {
            if let Some(atom) = extract_atom(line) {
                set.source.push(atom);
            }
        }
    }

    set
}

/// Pulls the package atom out of a merge-plan line.
///
/// The atom sits between the closing `]` of the action marker and the next
/// `[` (USE-flag block) if any: `[binary  R  ] dev-libs/foo-1.2.3 [...]`.
fn extract_atom(line: &str) -> Option<PackageRef> {
    let after_marker = line.splitn(2, ']').nth(1)?;
    let atom = after_marker.split('[').next()?.trim();
    if atom.is_empty() {
        return None;
    }
    Some(PackageRef::new(atom))
}

/// Parses the depclean dry-run report into removable package identifiers.
///
/// A line `"dev-libs/foo: 1.2.3-r1"` yields `dev-libs/foo-1.2.3-r1`.
pub fn parse_depclean_report<'a, I>(lines: I) -> OrphanSet
where
    I: IntoIterator<Item = &'a str>,
{
    let re = depclean_regex();
    let removable = lines
        .into_iter()
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let atom = caps.get(1)?.as_str();
            let version = caps.get(2)?.as_str();
            Some(PackageRef::new(format!("{atom}-{version}")))
        })
        .collect();

    OrphanSet { removable }
}
