//! In-memory doubles for the blocking collaborators of the server.

use crate::entity_store::types::{EntityKey, EntityKind, EntityRecord};
use crate::error_handling::types::{StorageError, SupervisorError};
use crate::process_supervision::remote_launcher::RemoteLauncher;
use crate::process_supervision::types::HostAccess;
use crate::storage::storage_trait::ConfigDatabase;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// `ConfigDatabase` kept in maps; `fail_writes` makes every write fail.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    rows: Mutex<BTreeMap<String, EntityRecord>>,
    counters: Mutex<HashMap<String, i64>>,
    pub fail_writes: Mutex<bool>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<EntityRecord>) -> Self {
        let db = Self::new();
        for record in records {
            db.rows.lock().unwrap().insert(record.key().storage_id(), record);
        }
        db
    }

    pub fn row(&self, key: &EntityKey) -> Option<EntityRecord> {
        self.rows.lock().unwrap().get(&key.storage_id()).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn check_write(&self) -> Result<(), StorageError> {
        if *self.fail_writes.lock().unwrap() {
            return Err(StorageError::WriteFailed("disk full".to_string()));
        }
        Ok(())
    }
}

impl ConfigDatabase for MemoryDatabase {
    fn load_records(&self, kind: EntityKind) -> Result<Vec<EntityRecord>, StorageError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.kind() == kind)
            .cloned()
            .collect())
    }

    fn upsert_record(&self, record: &EntityRecord) -> Result<(), StorageError> {
        self.check_write()?;
        self.rows
            .lock()
            .unwrap()
            .insert(record.key().storage_id(), record.clone());
        Ok(())
    }

    fn delete_record(&self, key: &EntityKey) -> Result<(), StorageError> {
        self.check_write()?;
        self.rows.lock().unwrap().remove(&key.storage_id());
        Ok(())
    }

    fn get_counter(&self, name: &str) -> Result<Option<i64>, StorageError> {
        Ok(self.counters.lock().unwrap().get(name).copied())
    }

    fn set_counter(&self, name: &str, value: i64) -> Result<(), StorageError> {
        self.check_write()?;
        self.counters.lock().unwrap().insert(name.to_string(), value);
        Ok(())
    }
}

/// Records every command; commands containing a string from `failing` fail.
#[derive(Debug, Default)]
pub struct RecordingLauncher {
    pub calls: Mutex<Vec<(String, String)>>,
    pub failing: Mutex<Vec<String>>,
}

impl RecordingLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn starts(&self) -> Vec<String> {
        self.commands().into_iter().filter(|c| c.contains("nohup")).collect()
    }
}

impl RemoteLauncher for RecordingLauncher {
    fn exec(&self, access: &HostAccess, command: &str) -> Result<String, SupervisorError> {
        self.calls
            .lock()
            .unwrap()
            .push((access.host.clone(), command.to_string()));
        if self.failing.lock().unwrap().iter().any(|f| command.contains(f.as_str())) {
            return Err(SupervisorError::RemoteExecFailed(format!("{}: refused", access.host)));
        }
        Ok(String::new())
    }
}
