use crate::error_handling::types::StorageError;
use crate::storage::storage_trait::ConfigDatabase;
use log::info;
use std::sync::Arc;

/// Ids reserved per database write.
pub const RESERVE_BLOCK: u64 = 1000;

/// Source of the global MMC ids (`GId`).
///
/// Ids are handed out from a block whose upper bound is persisted before the
/// first id of the block is used, so a restart resumes above anything issued.
pub struct MsgIdCounter {
    db: Arc<dyn ConfigDatabase>,
    last: u64,
    reserved_until: u64,
    block: u64,
}

impl MsgIdCounter {
    /// Restores from `GetCurrentMsgId`.
    pub fn restore(db: Arc<dyn ConfigDatabase>) -> Result<Self, StorageError> {
        Self::with_block(db, RESERVE_BLOCK)
    }

    pub fn with_block(db: Arc<dyn ConfigDatabase>, block: u64) -> Result<Self, StorageError> {
        let stored = db.get_current_msg_id()?;
        info!("[mmc] Restored msg id counter at {}", stored);
        Ok(Self {
            db,
            last: stored,
            reserved_until: stored,
            block: block.max(1),
        })
    }

    pub fn last(&self) -> u64 {
        self.last
    }

    pub fn next_gid(&mut self) -> Result<u64, StorageError> {
        let next = self.last + 1;
        if next > self.reserved_until {
            let until = self.reserved_until.max(self.last) + self.block;
            self.db.set_current_msg_id(until)?;
            self.reserved_until = until;
        }
        self.last = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryDatabase;

    #[test]
    fn test_ids_increase_and_blocks_are_persisted() {
        let db = Arc::new(MemoryDatabase::new());
        let mut counter = MsgIdCounter::with_block(db.clone(), 3).unwrap();
        let ids: Vec<u64> = (0..4).map(|_| counter.next_gid().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(db.get_current_msg_id().unwrap(), 6);
    }

    #[test]
    fn test_restart_never_goes_backwards() {
        let db = Arc::new(MemoryDatabase::new());
        db.set_current_msg_id(500).unwrap();
        let mut first = MsgIdCounter::with_block(db.clone(), 10).unwrap();
        let issued = first.next_gid().unwrap();
        assert_eq!(issued, 501);
        drop(first);

        let mut second = MsgIdCounter::with_block(db, 10).unwrap();
        assert!(second.next_gid().unwrap() > issued);
    }

    #[test]
    fn test_write_failure_does_not_issue_an_id() {
        let db = Arc::new(MemoryDatabase::new());
        let mut counter = MsgIdCounter::with_block(db.clone(), 1).unwrap();
        *db.fail_writes.lock().unwrap() = true;
        assert!(counter.next_gid().is_err());
        assert_eq!(counter.last(), 0);
        *db.fail_writes.lock().unwrap() = false;
        assert_eq!(counter.next_gid().unwrap(), 1);
    }
}
