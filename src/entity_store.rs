//! Entity store.
//!
//! The authoritative in-memory configuration of the adapter: the
//! Manager -> Connector -> Connection tree plus the DataHandler, SubProc,
//! CommandAuthority and subscriber configuration tables.
//!
//! - [`EntityStore`]: applies CREATE/MODIFY/DELETE deltas with the cascade rules
//!   and drives the status triad of controllable rows.
//! - [`types`]: records, keys, deltas and the status triad.

pub mod store;
#[cfg(test)]
pub mod tests;
pub mod types;

pub use store::{ApplyMode, EntityStore};
pub use types::{
    Action, CommandAuthority, Connection, Connector, CurStatus, DataHandler, EntityDelta, EntityKey,
    EntityKind, EntityRecord, Manager, RequestStatus, SettingStatus, StatusTriad, SubProc,
    SubscriberCfg,
};
