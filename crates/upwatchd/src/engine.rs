//! The update status engine.
//!
//! An ordered pipeline of fallible probes with strict short-circuit
//! precedence: the first terminal condition wins and no later probe
//! executes. Connectivity and sync come first as prerequisites for any
//! further work; a blocked configuration is checked before counting pending
//! updates because it is actionable even with empty sets; orphan detection
//! only runs when the system is otherwise current.
//!
//! Every probe failure maps to a distinct terminal status code. Nothing
//! escapes a run as an error or panic, and no state survives between runs.

use tracing::{error, info};

use upwatch_core::StatusCode;

use crate::probe::ProbeSet;

/// Turns one pass over the probes into exactly one [`StatusCode`].
pub struct StatusEngine<P> {
    probes: P,
}

impl<P: ProbeSet> StatusEngine<P> {
    pub fn new(probes: P) -> Self {
        Self { probes }
    }

    /// Runs the pipeline once.
    ///
    /// Precedence, top to bottom:
    /// 1. connectivity failure  -> `NoInternet`
    /// 2. sync failure          -> `BlockedSync`
    /// 3. update probe failure  -> `UpgradeCheckFailed`
    /// 4. configuration blocked -> `BlockedUpgrade`
    /// 5. pending updates       -> `UpgradeDetected`
    /// 6. orphan probe failure  -> `OrphanCheckFailed`
    /// 7. removable orphans     -> `OrphansDetected`, else `UpToDate`
    pub async fn run(&self) -> StatusCode {
        if !self.probes.check_connectivity().await {
            error!("Connectivity check failed");
            return StatusCode::NoInternet;
        }

        if let Err(e) = self.probes.sync_repositories().await {
            error!(error = %e, "Repository sync failed");
            return StatusCode::BlockedSync;
        }

        let updates = match self.probes.check_updates().await {
            Ok(updates) => updates,
            Err(e) => {
                error!(error = %e, "Update check failed");
                return StatusCode::UpgradeCheckFailed;
            }
        };

        if updates.configuration_blocked {
            error!("Configuration blocks the upgrade");
            return StatusCode::BlockedUpgrade;
        }

        if updates.has_pending() {
            info!(
                binary = updates.binary.len(),
                source = updates.source.len(),
                "Upgrade available"
            );
            return StatusCode::UpgradeDetected;
        }

        let orphans = match self.probes.check_orphans().await {
            Ok(orphans) => orphans,
            Err(e) => {
                error!(error = %e, "Orphan check failed");
                return StatusCode::OrphanCheckFailed;
            }
        };

        if !orphans.is_empty() {
            info!(removable = orphans.removable.len(), "Orphans detected");
            StatusCode::OrphansDetected
        } else {
            info!("System up to date");
            StatusCode::UpToDate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::probe::ProbeError;
    use upwatch_core::{OrphanSet, PackageRef, UpdateSet};

    /// Scripted probe outcomes plus a record of which probes actually ran.
    struct FakeProbes {
        online: bool,
        sync_ok: bool,
        updates: Option<UpdateSet>,
        orphans: Option<OrphanSet>,
        invoked: Mutex<Vec<&'static str>>,
    }

    impl FakeProbes {
        fn new() -> Self {
            Self {
                online: true,
                sync_ok: true,
                updates: Some(UpdateSet::default()),
                orphans: Some(OrphanSet::default()),
                invoked: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, probe: &'static str) {
            if let Ok(mut invoked) = self.invoked.lock() {
                invoked.push(probe);
            }
        }

        fn invoked(&self) -> Vec<&'static str> {
            self.invoked.lock().map(|v| v.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ProbeSet for FakeProbes {
        async fn check_connectivity(&self) -> bool {
            self.record("connectivity");
            self.online
        }

        async fn sync_repositories(&self) -> Result<(), ProbeError> {
            self.record("sync");
            if self.sync_ok {
                Ok(())
            } else {
                Err(ProbeError::Failed {
                    command: "emerge --sync".to_string(),
                    code: Some(1),
                })
            }
        }

        async fn check_updates(&self) -> Result<UpdateSet, ProbeError> {
            self.record("updates");
            self.updates.clone().ok_or(ProbeError::Failed {
                command: "emerge --pretend".to_string(),
                code: Some(1),
            })
        }

        async fn check_orphans(&self) -> Result<OrphanSet, ProbeError> {
            self.record("orphans");
            self.orphans.clone().ok_or(ProbeError::Failed {
                command: "emerge --depclean --pretend".to_string(),
                code: Some(1),
            })
        }
    }

    fn pending_updates() -> UpdateSet {
        UpdateSet {
            binary: vec![PackageRef::new("sys-apps/coreutils-9.4")],
            source: vec![],
            configuration_blocked: false,
        }
    }

    #[tokio::test]
    async fn test_offline_short_circuits_everything() {
        let probes = FakeProbes {
            online: false,
            ..FakeProbes::new()
        };
        let engine = StatusEngine::new(probes);

        assert_eq!(engine.run().await, StatusCode::NoInternet);
        // No downstream probe may run after a connectivity failure.
        assert_eq!(engine.probes.invoked(), vec!["connectivity"]);
    }

    #[tokio::test]
    async fn test_sync_failure_stops_before_update_probe() {
        let probes = FakeProbes {
            sync_ok: false,
            ..FakeProbes::new()
        };
        let engine = StatusEngine::new(probes);

        assert_eq!(engine.run().await, StatusCode::BlockedSync);
        assert_eq!(engine.probes.invoked(), vec!["connectivity", "sync"]);
    }

    #[tokio::test]
    async fn test_update_probe_failure() {
        let probes = FakeProbes {
            updates: None,
            ..FakeProbes::new()
        };
        let engine = StatusEngine::new(probes);

        assert_eq!(engine.run().await, StatusCode::UpgradeCheckFailed);
        assert_eq!(engine.probes.invoked(), vec!["connectivity", "sync", "updates"]);
    }

    #[tokio::test]
    async fn test_blocked_config_beats_pending_updates() {
        let mut updates = pending_updates();
        updates.configuration_blocked = true;
        let probes = FakeProbes {
            updates: Some(updates),
            ..FakeProbes::new()
        };
        let engine = StatusEngine::new(probes);

        assert_eq!(engine.run().await, StatusCode::BlockedUpgrade);
    }

    #[tokio::test]
    async fn test_blocked_config_with_empty_sets() {
        let probes = FakeProbes {
            updates: Some(UpdateSet {
                configuration_blocked: true,
                ..UpdateSet::default()
            }),
            ..FakeProbes::new()
        };
        let engine = StatusEngine::new(probes);

        assert_eq!(engine.run().await, StatusCode::BlockedUpgrade);
    }

    #[tokio::test]
    async fn test_pending_updates_skip_orphan_probe() {
        let probes = FakeProbes {
            updates: Some(pending_updates()),
            ..FakeProbes::new()
        };
        let engine = StatusEngine::new(probes);

        assert_eq!(engine.run().await, StatusCode::UpgradeDetected);
        assert!(!engine.probes.invoked().contains(&"orphans"));
    }

    #[tokio::test]
    async fn test_orphan_probe_failure() {
        let probes = FakeProbes {
            orphans: None,
            ..FakeProbes::new()
        };
        let engine = StatusEngine::new(probes);

        assert_eq!(engine.run().await, StatusCode::OrphanCheckFailed);
    }

    #[tokio::test]
    async fn test_orphans_detected() {
        let probes = FakeProbes {
            orphans: Some(OrphanSet {
                removable: vec![PackageRef::new("dev-libs/foo-1.2.3-r1")],
            }),
            ..FakeProbes::new()
        };
        let engine = StatusEngine::new(probes);

        assert_eq!(engine.run().await, StatusCode::OrphansDetected);
    }

    #[tokio::test]
    async fn test_clean_system_is_up_to_date() {
        let engine = StatusEngine::new(FakeProbes::new());
        assert_eq!(engine.run().await, StatusCode::UpToDate);
        assert_eq!(
            engine.probes.invoked(),
            vec!["connectivity", "sync", "updates", "orphans"]
        );
    }

    #[tokio::test]
    async fn test_identical_outcomes_are_idempotent() {
        let engine = StatusEngine::new(FakeProbes::new());
        let first = engine.run().await;
        let second = engine.run().await;
        assert_eq!(first, second);
    }
}
