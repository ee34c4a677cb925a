//! Daemon scheduler: two periodic timers and an on-demand query channel.
//!
//! A single actor task owns the engine. The status timer is self-pacing:
//! it is re-armed after each run completes, so a slow probe pushes the next
//! run out instead of overlapping it. The heartbeat timer is an ordinary
//! interval with delayed catch-up - a heartbeat held back by a long probe
//! fires late, never twice.
//!
//! All three inputs (status timer, heartbeat timer, query commands) are
//! served on the one loop; a query or periodic run blocks the others until
//! its probes finish. Heartbeat cadence is best-effort liveness, not a
//! hard real-time guarantee.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use upwatch_core::StatusCode;

use crate::engine::StatusEngine;
use crate::probe::ProbeSet;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Capacity of the query command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// Events published on the daemon's broadcast bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    /// Result of a periodic engine run.
    Status(StatusCode),

    /// Liveness signal, no payload.
    Heartbeat,
}

/// Commands the scheduler actor accepts.
enum SchedulerCommand {
    /// Run the engine once and reply with the code, independent of the
    /// periodic cadence.
    Query {
        respond_to: oneshot::Sender<StatusCode>,
    },
}

/// Errors from scheduler queries.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler task has shut down")]
    ChannelClosed,
}

/// Clonable handle to the scheduler actor.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
    events: broadcast::Sender<BusEvent>,
}

impl SchedulerHandle {
    /// Triggers one full engine run and returns its status code.
    ///
    /// Used by late-joining listeners (the `GetStatus` bus method) to get
    /// current state without waiting for the next broadcast.
    pub async fn query_status(&self) -> Result<StatusCode, SchedulerError> {
        let (tx, rx) = oneshot::channel();

        self.commands
            .send(SchedulerCommand::Query { respond_to: tx })
            .await
            .map_err(|_| SchedulerError::ChannelClosed)?;

        rx.await.map_err(|_| SchedulerError::ChannelClosed)
    }

    /// Subscribes to status and heartbeat broadcasts.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    /// Returns true while the actor is still running.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}

/// Scheduling cadence. Separate from `Config` so tests can run at
/// millisecond scale.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    pub check_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Cadence {
    pub fn from_config(config: &upwatch_core::Config) -> Self {
        Self {
            check_interval: config.check_interval(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }
}

/// Spawns the scheduler actor and returns a handle to it.
///
/// The first status check fires immediately; subsequent checks are spaced
/// `check_interval` from the *completion* of the previous run. The actor
/// stops when the token is cancelled; an in-flight probe is allowed to
/// finish naturally first.
pub fn spawn_scheduler<P>(
    engine: StatusEngine<P>,
    cadence: Cadence,
    cancel_token: CancellationToken,
) -> SchedulerHandle
where
    P: ProbeSet + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let handle = SchedulerHandle {
        commands: command_tx,
        events: event_tx.clone(),
    };

    tokio::spawn(run_actor(engine, cadence, command_rx, event_tx, cancel_token));

    handle
}

async fn run_actor<P: ProbeSet>(
    engine: StatusEngine<P>,
    cadence: Cadence,
    mut commands: mpsc::Receiver<SchedulerCommand>,
    events: broadcast::Sender<BusEvent>,
    cancel_token: CancellationToken,
) {
    info!(
        check_interval_secs = cadence.check_interval.as_secs(),
        heartbeat_interval_secs = cadence.heartbeat_interval.as_secs(),
        "Scheduler starting"
    );

    // First check fires immediately at startup.
    let mut next_check = Box::pin(sleep(Duration::ZERO));

    let mut heartbeat = interval(cadence.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Consume the interval's immediate first tick; the startup status
    // broadcast already announces liveness.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                info!("Scheduler shutting down");
                break;
            }

            Some(cmd) = commands.recv() => {
                match cmd {
                    SchedulerCommand::Query { respond_to } => {
                        debug!("On-demand status query");
                        let code = engine.run().await;
                        // Requester may have given up; nothing to do then.
                        let _ = respond_to.send(code);
                    }
                }
            }

            _ = &mut next_check => {
                let code = engine.run().await;
                info!(status = %code, "Periodic status check complete");
                publish(&events, BusEvent::Status(code));
                // Re-arm from completion, not from the previous schedule
                // time: slow probes stretch the cadence rather than stack.
                next_check.set(sleep(cadence.check_interval));
            }

            _ = heartbeat.tick() => {
                debug!("Heartbeat");
                publish(&events, BusEvent::Heartbeat);
            }
        }
    }
}

fn publish(events: &broadcast::Sender<BusEvent>, event: BusEvent) {
    // A send error just means no subscriber is currently attached; the
    // daemon runs its timers regardless.
    let _ = events.send(event);
}
