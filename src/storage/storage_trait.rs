//! Storage Trait
//!
//! This module defines the `ConfigDatabase` trait, the blocking CRUD API the server
//! uses to persist its configuration tree and the global MMC id counter.
//!
//! Implementors provide five primitives (load a table, upsert a row, delete a row,
//! read and write a named counter). The typed operations used by the server are
//! provided on top of them, so every backend persists the same way.

use crate::entity_store::types::{
    Action, CommandAuthority, Connection, Connector, DataHandler, EntityDelta, EntityKey, EntityKind,
    EntityRecord, Manager, SubProc, SubscriberCfg,
};
use crate::error_handling::types::StorageError;

/// Counter row holding the last reserved MMC global id.
pub const MSG_ID_COUNTER: &str = "current_msg_id";

macro_rules! typed_rows {
    ($db:expr, $kind:ident) => {
        $db.load_records(EntityKind::$kind)?
            .into_iter()
            .filter_map(|record| match record {
                EntityRecord::$kind(row) => Some(row),
                _ => None,
            })
            .collect()
    };
}

/// Blocking configuration database.
///
/// Calls may block; the server only issues them during boot or from worker worlds.
pub trait ConfigDatabase: Send + Sync {
    /// Every persisted row of `kind`.
    fn load_records(&self, kind: EntityKind) -> Result<Vec<EntityRecord>, StorageError>;

    /// Inserts the row or replaces the one stored under the same key.
    fn upsert_record(&self, record: &EntityRecord) -> Result<(), StorageError>;

    /// Removes the row; a missing row is not an error.
    fn delete_record(&self, key: &EntityKey) -> Result<(), StorageError>;

    fn get_counter(&self, name: &str) -> Result<Option<i64>, StorageError>;

    fn set_counter(&self, name: &str, value: i64) -> Result<(), StorageError>;

    fn get_manager_info(&self) -> Result<Vec<Manager>, StorageError> {
        Ok(typed_rows!(self, Manager))
    }

    fn get_connector_info(&self) -> Result<Vec<Connector>, StorageError> {
        Ok(typed_rows!(self, Connector))
    }

    fn get_connection_info(&self) -> Result<Vec<Connection>, StorageError> {
        Ok(typed_rows!(self, Connection))
    }

    fn get_data_handler_info(&self) -> Result<Vec<DataHandler>, StorageError> {
        Ok(typed_rows!(self, DataHandler))
    }

    fn get_sub_proc_info(&self) -> Result<Vec<SubProc>, StorageError> {
        Ok(typed_rows!(self, SubProc))
    }

    fn get_command_authority_info(&self) -> Result<Vec<CommandAuthority>, StorageError> {
        Ok(typed_rows!(self, CommandAuthority))
    }

    fn get_subscriber_cfg_info(&self) -> Result<Vec<SubscriberCfg>, StorageError> {
        Ok(typed_rows!(self, SubscriberCfg))
    }

    /// Every persisted row, parents first.
    fn load_all(&self) -> Result<Vec<EntityRecord>, StorageError> {
        let mut records = Vec::new();
        for kind in EntityKind::ALL {
            records.extend(self.load_records(kind)?);
        }
        Ok(records)
    }

    /// Persists one applied delta. A MODIFY that renamed or moved the row drops the old key.
    fn apply_delta(&self, delta: &EntityDelta) -> Result<(), StorageError> {
        match delta.action {
            Action::Create => self.upsert_record(&delta.record),
            Action::Modify => {
                if let Some(old_key) = &delta.old_key {
                    if *old_key != delta.record.key() {
                        self.delete_record(old_key)?;
                    }
                }
                self.upsert_record(&delta.record)
            }
            Action::Delete => self.delete_record(&delta.target_key()),
        }
    }

    /// Persists the deltas of one edit. Backends with transactions write all or none.
    fn apply_deltas(&self, deltas: &[EntityDelta]) -> Result<(), StorageError> {
        for delta in deltas {
            self.apply_delta(delta)?;
        }
        Ok(())
    }

    fn update_manager_status(&self, manager: &Manager) -> Result<(), StorageError> {
        self.upsert_record(&EntityRecord::Manager(manager.clone()))
    }

    fn update_connector_status(&self, connector: &Connector) -> Result<(), StorageError> {
        self.upsert_record(&EntityRecord::Connector(connector.clone()))
    }

    fn update_connection_status(&self, connection: &Connection) -> Result<(), StorageError> {
        self.upsert_record(&EntityRecord::Connection(connection.clone()))
    }

    fn update_data_handler_status(&self, data_handler: &DataHandler) -> Result<(), StorageError> {
        self.upsert_record(&EntityRecord::DataHandler(data_handler.clone()))
    }

    fn update_sub_proc_status(&self, sub_proc: &SubProc) -> Result<(), StorageError> {
        self.upsert_record(&EntityRecord::SubProc(sub_proc.clone()))
    }

    /// Persists the status of any controllable row.
    fn update_status(&self, record: &EntityRecord) -> Result<(), StorageError> {
        match record {
            EntityRecord::Manager(m) => self.update_manager_status(m),
            EntityRecord::Connector(c) => self.update_connector_status(c),
            EntityRecord::Connection(c) => self.update_connection_status(c),
            EntityRecord::DataHandler(d) => self.update_data_handler_status(d),
            EntityRecord::SubProc(s) => self.update_sub_proc_status(s),
            other => self.upsert_record(other),
        }
    }

    fn get_current_msg_id(&self) -> Result<u64, StorageError> {
        Ok(self.get_counter(MSG_ID_COUNTER)?.unwrap_or(0).max(0) as u64)
    }

    fn set_current_msg_id(&self, value: u64) -> Result<(), StorageError> {
        let value = i64::try_from(value)
            .map_err(|_| StorageError::WriteFailed(format!("msg id {} out of range", value)))?;
        self.set_counter(MSG_ID_COUNTER, value)
    }
}
