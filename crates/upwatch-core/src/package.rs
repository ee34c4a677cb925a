//! Package identifiers and probe result sets.
//!
//! `UpdateSet` and `OrphanSet` are created fresh by one engine run and
//! discarded when the run's status code has been derived; nothing here is
//! cached across runs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque package identifier: `category/name-version`, optionally
/// revision-suffixed (`-rN`).
///
/// The daemon never interprets the contents beyond equality; resolution
/// happens inside the external package manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageRef(String);

impl PackageRef {
    /// Creates a package reference from its string form.
    pub fn new(atom: impl Into<String>) -> Self {
        Self(atom.into())
    }

    /// Returns the string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageRef {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Result of the update dry-run probe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSet {
    /// Packages that would be installed from binary packages.
    pub binary: Vec<PackageRef>,

    /// Packages that would be built from source.
    pub source: Vec<PackageRef>,

    /// True when the dry-run output shows the configuration blocks the
    /// upgrade (USE conflicts, masked packages, required manual edits).
    /// Checked before set emptiness: a blocked configuration is actionable
    /// even when both sets are empty.
    pub configuration_blocked: bool,
}

impl UpdateSet {
    /// Returns true if any binary or source update is pending.
    pub fn has_pending(&self) -> bool {
        !self.binary.is_empty() || !self.source.is_empty()
    }

    /// Total number of pending updates.
    pub fn len(&self) -> usize {
        self.binary.len() + self.source.len()
    }

    /// Returns true when no updates are pending.
    pub fn is_empty(&self) -> bool {
        self.binary.is_empty() && self.source.is_empty()
    }
}

/// Result of the depclean dry-run probe.
///
/// Only computed when the update probe shows nothing pending; orphan lists
/// are meaningless while an upgrade is in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanSet {
    /// Installed packages no longer required by anything.
    pub removable: Vec<PackageRef>,
}

impl OrphanSet {
    /// Returns true when no orphans were found.
    pub fn is_empty(&self) -> bool {
        self.removable.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_update_set() {
        let set = UpdateSet::default();
        assert!(set.is_empty());
        assert!(!set.has_pending());
        assert_eq!(set.len(), 0);
        assert!(!set.configuration_blocked);
    }

    #[test]
    fn test_pending_counts_both_sets() {
        let set = UpdateSet {
            binary: vec![PackageRef::new("sys-apps/coreutils-9.4")],
            source: vec![PackageRef::new("dev-lang/rust-1.75.0")],
            configuration_blocked: false,
        };
        assert!(set.has_pending());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_blocked_set_may_be_empty() {
        let set = UpdateSet {
            configuration_blocked: true,
            ..UpdateSet::default()
        };
        assert!(set.is_empty());
        assert!(set.configuration_blocked);
    }

    #[test]
    fn test_package_ref_display() {
        let pkg = PackageRef::new("dev-libs/foo-1.2.3-r1");
        assert_eq!(pkg.to_string(), "dev-libs/foo-1.2.3-r1");
        assert_eq!(pkg.as_str(), "dev-libs/foo-1.2.3-r1");
    }
}
