//! Storage subsystem
//!
//! Persists the configuration tree and the MMC global id counter.
//!
//! Components:
//! - `storage_trait`: the `ConfigDatabase` trait, the blocking API the server consumes.
//! - `database_storage`: SQLite implementation on SeaORM, driven from its own thread.
//! - `db_entities`: SeaORM entity models for the database backend.
//! - `persist_world`: writer world so the main world never waits on the database.

pub mod database_storage;
pub mod db_entities;
pub mod persist_world;
pub mod storage_trait;

pub use database_storage::DatabaseStorage;
pub use persist_world::{PersistJob, PersistLink, PersistReply, PersistSink};
pub use storage_trait::{ConfigDatabase, MSG_ID_COUNTER};
