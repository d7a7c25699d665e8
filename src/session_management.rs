//! Session management.
//!
//! A [`Session`] wraps a framed [`Socket`](crate::transport::Socket) with the identify
//! handshake, heartbeat and send-retry timers. Sessions accepted on one listener belong
//! to one [`ConnectionGroup`].

pub mod alive_check;
pub mod connection_group;
pub mod session;
#[cfg(test)]
pub mod tests;
pub mod types;

pub use alive_check::AliveCheck;
pub use connection_group::ConnectionGroup;
pub use session::{LogStatus, Session};
pub use types::{GroupKind, SessionRole, SessionTimer, SocketInfo};
