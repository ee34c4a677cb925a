//! upwatch listener - consumes daemon broadcasts and renders them as
//! desktop notifications.
//!
//! This crate provides:
//! - `client` - daemon connection with reconnect and the late-join query
//! - `listener` - the state machine mapping status codes to notifications,
//!   tracking daemon liveness via a heartbeat deadline
//! - `suppress` - the persisted time-boxed suppression window
//! - `notify` - the narrow "display message" seam and its `notify-send`
//!   implementation

pub mod client;
pub mod listener;
pub mod notify;
pub mod suppress;

pub use client::{ClientCommand, ClientConfig, DaemonClient, ListenerEvent};
pub use listener::Listener;
pub use notify::{notification_for, Notification, Notifier, NotifySend, Urgency};
pub use suppress::{SuppressionFile, IGNORE_DAYS};
