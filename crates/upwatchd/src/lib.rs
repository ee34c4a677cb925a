//! upwatch daemon - update status engine and broadcast server
//!
//! This crate provides the daemon-side infrastructure:
//! - `probe` - external checks (connectivity, sync, update and orphan dry-runs)
//! - `engine` - the ordered decision pipeline turning probe results into one
//!   status code
//! - `scheduler` - the periodic check/heartbeat loop and on-demand queries
//! - `server` - Unix socket server broadcasting results to listeners
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        upwatchd                              │
//! ├──────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌──────────────┐    ┌──────────────┐    ┌───────────────┐   │
//! │  │ EmergeProbes │───▶│ StatusEngine │───▶│   Scheduler   │   │
//! │  │ (child procs)│    │ (precedence) │    │ (two timers)  │   │
//! │  └──────────────┘    └──────────────┘    └───────┬───────┘   │
//! │                                                  │ events    │
//! │  ┌──────────────┐    ┌──────────────────────┐    │           │
//! │  │ DaemonServer │───▶│  broadcast::Sender   │◀───┘           │
//! │  │ (Unix socket)│    │ (status + heartbeat) │                │
//! │  └──────────────┘    └──────────────────────┘                │
//! │                                                              │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod engine;
pub mod probe;
pub mod scheduler;
pub mod server;
