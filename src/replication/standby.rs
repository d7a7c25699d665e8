use crate::entity_store::store::{ApplyMode, EntityStore};
use crate::entity_store::types::{EntityDelta, EntityKind, EntityRecord};
use crate::error_handling::types::StoreError;
use crate::protocol::messages::{DbSyncInfoList, DbSyncInfoReq, DbSyncKind};
use log::{info, warn};
use std::collections::BTreeSet;
use std::time::Duration;

/// Delay between two connection attempts to the active peer.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    /// Identified, waiting for the full state.
    Syncing,
    /// Full state applied, following the delta stream.
    Streaming,
}

/// Standby side of replication: rebuilds the store from the active peer's full
/// state, then applies its deltas verbatim.
#[derive(Debug)]
pub struct StandbyReplica {
    state: LinkState,
    staged: Vec<EntityRecord>,
    staged_kinds: BTreeSet<EntityKind>,
    rounds: u64,
}

impl Default for StandbyReplica {
    fn default() -> Self {
        Self::new()
    }
}

impl StandbyReplica {
    pub fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
            staged: Vec::new(),
            staged_kinds: BTreeSet::new(),
            rounds: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Completed sync rounds since start.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn connecting(&mut self) {
        self.state = LinkState::Connecting;
    }

    /// Identified to the active peer; returns the request to send.
    pub fn begin_sync(&mut self) -> DbSyncInfoReq {
        self.staged.clear();
        self.staged_kinds.clear();
        self.state = LinkState::Syncing;
        DbSyncInfoReq::default()
    }

    pub fn disconnected(&mut self) {
        if self.state != LinkState::Disconnected {
            warn!("[replication] Lost the active peer, retrying every {}s", RECONNECT_INTERVAL.as_secs());
        }
        self.staged.clear();
        self.staged_kinds.clear();
        self.state = LinkState::Disconnected;
    }

    pub fn on_list(&mut self, list: DbSyncInfoList) {
        if self.state != LinkState::Syncing {
            warn!("[replication] Unexpected {} list outside a sync round", list.kind);
            return;
        }
        self.staged_kinds.insert(list.kind);
        self.staged.retain(|r| r.kind() != list.kind);
        self.staged.extend(list.records);
    }

    /// Closes the sync round: swaps in the staged state and returns the deltas
    /// that turned the old store into the new one.
    pub fn on_sync_kind(&mut self, done: DbSyncKind, store: &mut EntityStore) -> Vec<EntityDelta> {
        if self.state != LinkState::Syncing || !done.complete {
            return Vec::new();
        }
        let records: Vec<EntityRecord> = EntityKind::ALL
            .into_iter()
            .flat_map(|kind| {
                if self.staged_kinds.contains(&kind) {
                    self.staged.iter().filter(|r| r.kind() == kind).cloned().collect::<Vec<_>>()
                } else {
                    store.records(kind)
                }
            })
            .collect();
        let (rebuilt, rejected) = EntityStore::from_records(records, ApplyMode::Replica);
        for (key, e) in &rejected {
            warn!("[replication] Dropped replicated row {}: {}", key, e);
        }
        let deltas = store.diff(&rebuilt);
        *store = rebuilt;
        self.staged.clear();
        self.staged_kinds.clear();
        self.state = LinkState::Streaming;
        self.rounds += 1;
        info!("[replication] Synchronized with the active peer, {} changes", deltas.len());
        deltas
    }

    /// Applies one streamed delta verbatim.
    pub fn on_delta(&mut self, delta: EntityDelta, store: &mut EntityStore) -> Result<Vec<EntityDelta>, StoreError> {
        if self.state != LinkState::Streaming {
            return Ok(Vec::new());
        }
        store.apply(delta, ApplyMode::Replica)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_store::types::{Action, CurStatus, Manager, SettingStatus, StatusTriad};

    fn manager(id: &str, cur: CurStatus) -> EntityRecord {
        let mut status = StatusTriad::new(SettingStatus::Start);
        status.cur_status = cur;
        EntityRecord::Manager(Manager {
            manager_id: id.to_string(),
            ip: "10.0.0.1".to_string(),
            ssh_id: "naa".to_string(),
            ssh_pass: "pw".to_string(),
            status,
        })
    }

    #[test]
    fn test_full_sync_replaces_the_store() {
        let (mut store, _) = EntityStore::from_records(vec![manager("old", CurStatus::Stop)], ApplyMode::Replica);
        let mut replica = StandbyReplica::new();
        replica.connecting();
        replica.begin_sync();
        replica.on_list(DbSyncInfoList {
            kind: EntityKind::Manager,
            records: vec![manager("m1", CurStatus::Start)],
        });
        let deltas = replica.on_sync_kind(
            DbSyncKind {
                kinds: vec![EntityKind::Manager],
                complete: true,
            },
            &mut store,
        );

        assert_eq!(replica.state(), LinkState::Streaming);
        assert!(store.manager("old").is_none());
        // replica rows keep the runtime status they were sent with
        assert_eq!(store.manager("m1").unwrap().status.cur_status, CurStatus::Start);
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].action, Action::Delete);
        assert_eq!(replica.rounds(), 1);
    }

    #[test]
    fn test_deltas_only_apply_while_streaming() {
        let mut store = EntityStore::new();
        let mut replica = StandbyReplica::new();
        let delta = EntityDelta::create(manager("m1", CurStatus::Start));
        assert!(replica.on_delta(delta.clone(), &mut store).unwrap().is_empty());
        assert!(store.manager("m1").is_none());

        replica.begin_sync();
        replica.on_sync_kind(
            DbSyncKind {
                kinds: vec![],
                complete: true,
            },
            &mut store,
        );
        assert_eq!(replica.on_delta(delta, &mut store).unwrap().len(), 1);
        assert!(store.manager("m1").is_some());
    }

    #[test]
    fn test_disconnect_drops_staged_rows() {
        let mut store = EntityStore::new();
        let mut replica = StandbyReplica::new();
        replica.begin_sync();
        replica.on_list(DbSyncInfoList {
            kind: EntityKind::Manager,
            records: vec![manager("m1", CurStatus::Start)],
        });
        replica.disconnected();
        let deltas = replica.on_sync_kind(
            DbSyncKind {
                kinds: vec![EntityKind::Manager],
                complete: true,
            },
            &mut store,
        );
        assert!(deltas.is_empty());
        assert_eq!(replica.state(), LinkState::Disconnected);
    }
}
