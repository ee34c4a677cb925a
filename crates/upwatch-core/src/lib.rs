//! Core domain types for upwatch.
//!
//! This crate holds the types shared by the daemon and the listener:
//! - `status` - the closed set of status codes produced by the engine
//! - `package` - package identifiers and the update/orphan sets
//! - `config` - the single immutable configuration value both processes
//!   are constructed with

pub mod config;
pub mod package;
pub mod status;

pub use config::{Config, ConfigError};
pub use package::{OrphanSet, PackageRef, UpdateSet};
pub use status::{NotifyClass, StatusCode};
