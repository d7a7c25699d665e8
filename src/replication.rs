//! Replication of entity changes.
//!
//! On the active server every applied delta goes to subscribed GUI sessions, to a
//! synchronized standby peer and to the database writer. A standby server pulls the
//! full state from its active peer and then follows the delta stream.

pub mod hub;
pub mod standby;

pub use hub::{delta_packet, snapshot_packets, sync_packets, ReplicationHub};
pub use standby::{LinkState, StandbyReplica, RECONNECT_INTERVAL};
