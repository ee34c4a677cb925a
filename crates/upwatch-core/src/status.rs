//! Status codes produced by the update status engine.
//!
//! Exactly one `StatusCode` is produced per engine run. The variants are
//! listed in the engine's short-circuit precedence order: the first
//! terminal condition encountered wins and no later probe executes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The discrete outcome of one engine run.
///
/// The snake_case string form (`as_str` / `FromStr`) is the stable wire
/// representation used by the broadcast protocol and the `GetStatus` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// The connectivity probe failed; nothing else was attempted.
    NoInternet,

    /// Repository sync failed.
    BlockedSync,

    /// The update dry-run failed to produce a parseable result.
    UpgradeCheckFailed,

    /// The orphan dry-run failed.
    OrphanCheckFailed,

    /// Updates exist but the configuration blocks them (USE conflicts,
    /// masked packages, required manual edits).
    BlockedUpgrade,

    /// Pending binary or source updates were detected.
    UpgradeDetected,

    /// The system is current but orphaned packages are removable.
    OrphansDetected,

    /// Nothing to do.
    UpToDate,
}

/// How the listener treats a status code with respect to the user's
/// suppression window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyClass {
    /// Operational failures: displayed immediately, suppression is ignored.
    Always,

    /// Informational nudges: displayed only while no suppression window
    /// is active.
    Suppressible,
}

impl StatusCode {
    /// All codes, in engine precedence order.
    pub const ALL: [StatusCode; 8] = [
        StatusCode::NoInternet,
        StatusCode::BlockedSync,
        StatusCode::UpgradeCheckFailed,
        StatusCode::BlockedUpgrade,
        StatusCode::UpgradeDetected,
        StatusCode::OrphanCheckFailed,
        StatusCode::OrphansDetected,
        StatusCode::UpToDate,
    ];

    /// Returns the stable wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::NoInternet => "no_internet",
            StatusCode::BlockedSync => "blocked_sync",
            StatusCode::UpgradeCheckFailed => "upgrade_check_failed",
            StatusCode::OrphanCheckFailed => "orphan_check_failed",
            StatusCode::BlockedUpgrade => "blocked_upgrade",
            StatusCode::UpgradeDetected => "upgrade_detected",
            StatusCode::OrphansDetected => "orphans_detected",
            StatusCode::UpToDate => "up_to_date",
        }
    }

    /// Maps the code to its notification class.
    ///
    /// Failure codes always reach the user; informational codes honor the
    /// suppression window. `UpToDate` displays a confirmatory notice and is
    /// suppressible.
    pub fn notify_class(&self) -> NotifyClass {
        match self {
            StatusCode::NoInternet
            | StatusCode::BlockedSync
            | StatusCode::UpgradeCheckFailed
            | StatusCode::OrphanCheckFailed => NotifyClass::Always,
            StatusCode::BlockedUpgrade
            | StatusCode::UpgradeDetected
            | StatusCode::OrphansDetected
            | StatusCode::UpToDate => NotifyClass::Suppressible,
        }
    }

    /// Returns true for codes in the always-notify class.
    pub fn is_failure(&self) -> bool {
        self.notify_class() == NotifyClass::Always
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status code string.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown status code: {0}")]
pub struct UnknownStatusCode(pub String);

impl FromStr for StatusCode {
    type Err = UnknownStatusCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no_internet" => Ok(StatusCode::NoInternet),
            "blocked_sync" => Ok(StatusCode::BlockedSync),
            "upgrade_check_failed" => Ok(StatusCode::UpgradeCheckFailed),
            "orphan_check_failed" => Ok(StatusCode::OrphanCheckFailed),
            "blocked_upgrade" => Ok(StatusCode::BlockedUpgrade),
            "upgrade_detected" => Ok(StatusCode::UpgradeDetected),
            "orphans_detected" => Ok(StatusCode::OrphansDetected),
            "up_to_date" => Ok(StatusCode::UpToDate),
            other => Err(UnknownStatusCode(other.to_string())),
        }
    }
}
