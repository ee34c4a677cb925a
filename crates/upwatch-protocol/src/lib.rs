//! Wire protocol between the upwatch daemon and its listeners.
//!
//! Messages are line-delimited JSON over a Unix socket. The bus surface is
//! small: one synchronous query (`GetStatus`), one status broadcast, and a
//! payload-free heartbeat broadcast.

pub mod message;
pub mod version;

pub use message::{ClientMessage, ClientRequest, DaemonMessage};
pub use version::ProtocolVersion;
