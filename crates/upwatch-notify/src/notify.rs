//! The "display message" seam and its desktop implementation.
//!
//! The listener only ever talks to a [`Notifier`]; rendering, tray menus,
//! and notification centers live outside this repository. The production
//! implementation shells out to `notify-send`.

use std::process::Command;

use tracing::{debug, warn};

use upwatch_core::StatusCode;

/// Notification urgency, mapped onto `notify-send --urgency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Critical,
}

impl Urgency {
    fn as_str(self) -> &'static str {
        match self {
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// One user-facing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub urgency: Urgency,
    pub summary: &'static str,
    pub body: String,
}

impl Notification {
    pub fn new(urgency: Urgency, summary: &'static str, body: impl Into<String>) -> Self {
        Self {
            urgency,
            summary,
            body: body.into(),
        }
    }
}

/// Fixed notification content per status code.
pub fn notification_for(code: StatusCode) -> Notification {
    match code {
        StatusCode::NoInternet => Notification::new(
            Urgency::Critical,
            "No Internet Connection",
            "Unable to check for system upgrade because no internet connection is available.",
        ),
        StatusCode::BlockedSync => Notification::new(
            Urgency::Critical,
            "Sync Failure",
            "Unable to sync the portage tree and overlays to check for system upgrade.",
        ),
        StatusCode::UpgradeCheckFailed => Notification::new(
            Urgency::Critical,
            "Check Failure",
            "Unable to check for system upgrade.",
        ),
        StatusCode::OrphanCheckFailed => Notification::new(
            Urgency::Critical,
            "Check Failure",
            "Unable to check for orphaned packages.",
        ),
        StatusCode::BlockedUpgrade => Notification::new(
            Urgency::Critical,
            "Blocked Upgrade",
            "System upgrade is available but blocked due to portage configuration issues.",
        ),
        StatusCode::UpgradeDetected => Notification::new(
            Urgency::Normal,
            "System Upgrade",
            "System upgrade is available to improve security, stability and performance.",
        ),
        StatusCode::OrphansDetected => Notification::new(
            Urgency::Normal,
            "Orphans Detected",
            "The system is up to date, but orphaned packages have been detected.",
        ),
        StatusCode::UpToDate => Notification::new(
            Urgency::Normal,
            "Up to Date",
            "The system is up to date, will check again in 6 hours.",
        ),
    }
}

/// The liveness-failure notification shown when the heartbeat deadline
/// elapses with no broadcast of either kind.
pub fn missed_heartbeat_notification(timeout_secs: u64) -> Notification {
    Notification::new(
        Urgency::Critical,
        "Heartbeat Missed",
        format!(
            "No message received from the update daemon in over {} minutes. The daemon may be offline.",
            timeout_secs / 60
        ),
    )
}

/// Narrow display interface the listener renders through.
pub trait Notifier: Send {
    fn show(&self, notification: &Notification);
}

/// Desktop notifier shelling out to `notify-send`.
///
/// Failures are logged and swallowed; a broken notification surface must
/// not take the listener down.
#[derive(Debug, Default)]
pub struct NotifySend;

impl Notifier for NotifySend {
    fn show(&self, notification: &Notification) {
        let result = Command::new("notify-send")
            .arg("--app-name=upwatch")
            .arg("--urgency")
            .arg(notification.urgency.as_str())
            .arg(notification.summary)
            .arg(&notification.body)
            .status();

        match result {
            Ok(status) if status.success() => {
                debug!(summary = notification.summary, "Notification displayed");
            }
            Ok(status) => {
                warn!(
                    summary = notification.summary,
                    code = ?status.code(),
                    "notify-send exited with failure"
                );
            }
            Err(e) => {
                warn!(summary = notification.summary, error = %e, "Failed to run notify-send");
            }
        }
    }
}
