//! Listener state machine: status codes in, notifications out.
//!
//! Consumes [`ListenerEvent`]s from the daemon client and renders them
//! through a [`Notifier`]. Two responsibilities:
//!
//! - Classification: failure and blocked codes always notify; informational
//!   codes are dropped while the suppression window is active.
//! - Liveness: a deadline re-armed on every daemon broadcast. If it elapses
//!   with no status and no heartbeat, a missed-heartbeat notification fires
//!   once, then the deadline re-arms for the next silent interval.
//!
//! A `Disconnected` event is logged but does NOT touch the deadline and
//! never notifies directly; a dead daemon is reported only through the
//! heartbeat-timeout path, so a quick daemon restart stays invisible.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use upwatch_core::{NotifyClass, StatusCode};

use crate::client::ListenerEvent;
use crate::notify::{missed_heartbeat_notification, notification_for, Notifier};
use crate::suppress::SuppressionFile;

/// The notification state machine.
pub struct Listener<N: Notifier> {
    notifier: N,
    suppression: SuppressionFile,
    heartbeat_timeout: Duration,
    events: mpsc::UnboundedReceiver<ListenerEvent>,
    cancel_token: CancellationToken,
}

impl<N: Notifier> Listener<N> {
    pub fn new(
        notifier: N,
        suppression: SuppressionFile,
        heartbeat_timeout: Duration,
        events: mpsc::UnboundedReceiver<ListenerEvent>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            notifier,
            suppression,
            heartbeat_timeout,
            events,
            cancel_token,
        }
    }

    /// Runs until cancelled or the event channel closes.
    pub async fn run(mut self) {
        info!(
            timeout_secs = self.heartbeat_timeout.as_secs(),
            "Listener starting"
        );

        let mut deadline = Box::pin(sleep(self.heartbeat_timeout));

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    info!("Listener shutting down (cancelled)");
                    break;
                }

                event = self.events.recv() => {
                    match event {
                        Some(event) => {
                            // Only actual daemon traffic proves liveness.
                            if matches!(
                                event,
                                ListenerEvent::Status(_) | ListenerEvent::Heartbeat
                            ) {
                                deadline.as_mut().set(sleep(self.heartbeat_timeout));
                            }
                            self.handle_event(event);
                        }
                        None => {
                            info!("Event channel closed, listener stopping");
                            break;
                        }
                    }
                }

                _ = &mut deadline => {
                    warn!(
                        timeout_secs = self.heartbeat_timeout.as_secs(),
                        "Heartbeat deadline elapsed with no daemon traffic"
                    );
                    self.notifier
                        .show(&missed_heartbeat_notification(self.heartbeat_timeout.as_secs()));
                    deadline.as_mut().set(sleep(self.heartbeat_timeout));
                }
            }
        }
    }

    fn handle_event(&self, event: ListenerEvent) {
        match event {
            ListenerEvent::Status(code) => self.handle_status(code),
            ListenerEvent::Heartbeat => {
                debug!("Heartbeat received");
            }
            ListenerEvent::Disconnected => {
                warn!("Daemon connection lost, awaiting reconnect");
            }
        }
    }

    fn handle_status(&self, code: StatusCode) {
        match code.notify_class() {
            NotifyClass::Always => {
                self.notifier.show(&notification_for(code));
            }
            NotifyClass::Suppressible => {
                if self.suppression.is_active() {
                    debug!(status = %code, "Notification suppressed by active window");
                } else {
                    self.notifier.show(&notification_for(code));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::time::{advance, sleep};

    use crate::notify::Notification;

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        shown: Arc<Mutex<Vec<Notification>>>,
    }

    impl RecordingNotifier {
        fn summaries(&self) -> Vec<&'static str> {
            self.shown.lock().unwrap().iter().map(|n| n.summary).collect()
        }
    }

    impl Notifier for RecordingNotifier {
        fn show(&self, notification: &Notification) {
            self.shown.lock().unwrap().push(notification.clone());
        }
    }

    struct Harness {
        notifier: RecordingNotifier,
        events: mpsc::UnboundedSender<ListenerEvent>,
        cancel: CancellationToken,
        suppression: SuppressionFile,
        _dir: tempfile::TempDir,
    }

    fn spawn_listener(timeout: Duration) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let suppression = SuppressionFile::new(dir.path().join("ignore"));
        let notifier = RecordingNotifier::default();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let listener = Listener::new(
            notifier.clone(),
            suppression.clone(),
            timeout,
            rx,
            cancel.clone(),
        );
        tokio::spawn(listener.run());

        Harness {
            notifier,
            events: tx,
            cancel,
            suppression,
            _dir: dir,
        }
    }

    /// Lets the spawned listener task process everything already sent.
    async fn settle() {
        sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_codes_bypass_suppression() {
        let h = spawn_listener(Duration::from_secs(3600));
        h.suppression.set_days(30).unwrap();

        for code in [
            StatusCode::NoInternet,
            StatusCode::BlockedSync,
            StatusCode::UpgradeCheckFailed,
            StatusCode::OrphanCheckFailed,
        ] {
            h.events.send(ListenerEvent::Status(code)).unwrap();
        }
        settle().await;

        assert_eq!(h.notifier.shown.lock().unwrap().len(), 4);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_informational_codes_respect_suppression() {
        let h = spawn_listener(Duration::from_secs(3600));
        h.suppression.set_days(7).unwrap();

        for code in [
            StatusCode::BlockedUpgrade,
            StatusCode::UpgradeDetected,
            StatusCode::OrphansDetected,
            StatusCode::UpToDate,
        ] {
            h.events.send(ListenerEvent::Status(code)).unwrap();
        }
        settle().await;

        assert!(h.notifier.shown.lock().unwrap().is_empty());
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_informational_codes_notify_without_window() {
        let h = spawn_listener(Duration::from_secs(3600));

        h.events
            .send(ListenerEvent::Status(StatusCode::UpgradeDetected))
            .unwrap();
        settle().await;

        assert_eq!(h.notifier.summaries(), vec!["System Upgrade"]);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_window_resumes_notifications() {
        let h = spawn_listener(Duration::from_secs(3600));
        h.suppression.set_days(7).unwrap();

        h.events
            .send(ListenerEvent::Status(StatusCode::UpToDate))
            .unwrap();
        settle().await;
        assert!(h.notifier.shown.lock().unwrap().is_empty());

        h.suppression.clear().unwrap();
        h.events
            .send(ListenerEvent::Status(StatusCode::UpToDate))
            .unwrap();
        settle().await;

        assert_eq!(h.notifier.summaries(), vec!["Up to Date"]);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_triggers_missed_heartbeat() {
        let h = spawn_listener(Duration::from_secs(3600));
        settle().await;

        advance(Duration::from_secs(3601)).await;
        settle().await;

        assert_eq!(h.notifier.summaries(), vec!["Heartbeat Missed"]);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_heartbeat_fires_once_per_silent_interval() {
        let h = spawn_listener(Duration::from_secs(3600));
        settle().await;

        advance(Duration::from_secs(3601)).await;
        settle().await;
        assert_eq!(h.notifier.shown.lock().unwrap().len(), 1);

        // Still silent: next notification only after another full interval.
        advance(Duration::from_secs(1800)).await;
        settle().await;
        assert_eq!(h.notifier.shown.lock().unwrap().len(), 1);

        advance(Duration::from_secs(1801)).await;
        settle().await;
        assert_eq!(h.notifier.shown.lock().unwrap().len(), 2);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_resets_deadline() {
        let h = spawn_listener(Duration::from_secs(3600));
        settle().await;

        advance(Duration::from_secs(3000)).await;
        h.events.send(ListenerEvent::Heartbeat).unwrap();
        settle().await;

        // Would have fired at 3600s without the reset.
        advance(Duration::from_secs(1000)).await;
        settle().await;
        assert!(h.notifier.shown.lock().unwrap().is_empty());

        advance(Duration::from_secs(2601)).await;
        settle().await;
        assert_eq!(h.notifier.summaries(), vec!["Heartbeat Missed"]);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_broadcast_also_resets_deadline() {
        let h = spawn_listener(Duration::from_secs(3600));
        settle().await;

        advance(Duration::from_secs(3000)).await;
        h.events
            .send(ListenerEvent::Status(StatusCode::UpToDate))
            .unwrap();
        settle().await;

        advance(Duration::from_secs(1000)).await;
        settle().await;

        // Only the status notification, no heartbeat alarm.
        assert_eq!(h.notifier.summaries(), vec!["Up to Date"]);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_does_not_reset_deadline_or_notify() {
        let h = spawn_listener(Duration::from_secs(3600));
        settle().await;

        advance(Duration::from_secs(3000)).await;
        h.events.send(ListenerEvent::Disconnected).unwrap();
        settle().await;

        advance(Duration::from_secs(601)).await;
        settle().await;

        // Deadline still counted from startup, so the alarm fired.
        assert_eq!(h.notifier.summaries(), vec!["Heartbeat Missed"]);
        h.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_close_stops_listener() {
        let h = spawn_listener(Duration::from_secs(3600));
        drop(h.events);
        settle().await;

        advance(Duration::from_secs(7201)).await;
        settle().await;

        // Listener exited before any deadline could fire.
        assert!(h.notifier.shown.lock().unwrap().is_empty());
    }
}
