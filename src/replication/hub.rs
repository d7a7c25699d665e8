use crate::configuration::types::ServerRole;
use crate::entity_store::store::EntityStore;
use crate::entity_store::types::{EntityDelta, EntityKind};
use crate::error_handling::types::TransportError;
use crate::protocol::messages::{info_msg_id, DbSyncInfoList, DbSyncInfoReq, DbSyncKind, InitInfo};
use crate::protocol::msg_id::{AS_DB_SYNC_INFO_LIST, AS_DB_SYNC_KIND, INIT_INFO_END, INIT_INFO_START};
use crate::protocol::session_type::SubscriptionMask;
use crate::reactor::context::WorldContext;
use crate::reactor::sensor::{SensorId, WorldState};
use crate::session_management::connection_group::ConnectionGroup;
use crate::session_management::session::Session;
use crate::session_management::types::{SessionRole, SessionTimer};
use crate::storage::persist_world::{PersistJob, PersistLink};
use crate::transport::packet::Packet;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeSet;

/// Delta stream packet for one applied change.
pub fn delta_packet(delta: &EntityDelta) -> Result<Packet, TransportError> {
    Packet::json(info_msg_id(delta.kind()), delta)
}

/// Initial snapshot for a GUI: `INIT_INFO_START`, one CREATE per row, `INIT_INFO_END`.
pub fn snapshot_packets(store: &EntityStore, mask: SubscriptionMask) -> Result<Vec<Packet>, TransportError> {
    let records = store.snapshot(mask);
    let count = records.len();
    let mut packets = Vec::with_capacity(count + 2);
    packets.push(Packet::json(INIT_INFO_START, &InitInfo { count })?);
    for record in records {
        packets.push(delta_packet(&EntityDelta::create(record))?);
    }
    packets.push(Packet::json(INIT_INFO_END, &InitInfo { count })?);
    Ok(packets)
}

/// Answer to `AS_DB_SYNC_INFO_REQ`: one list per kind, then the closing `AS_DB_SYNC_KIND`.
pub fn sync_packets(store: &EntityStore, req: &DbSyncInfoReq) -> Result<Vec<Packet>, TransportError> {
    let kinds: Vec<EntityKind> = if req.kinds.is_empty() {
        EntityKind::ALL.to_vec()
    } else {
        EntityKind::ALL
            .into_iter()
            .filter(|kind| req.kinds.contains(kind))
            .collect()
    };
    let mut packets = Vec::with_capacity(kinds.len() + 1);
    for kind in &kinds {
        packets.push(Packet::json(
            AS_DB_SYNC_INFO_LIST,
            &DbSyncInfoList {
                kind: *kind,
                records: store.records(*kind),
            },
        )?);
    }
    packets.push(Packet::json(AS_DB_SYNC_KIND, &DbSyncKind { kinds, complete: true })?);
    Ok(packets)
}

/// Fans applied deltas out to subscribed GUIs and the standby peer, and owns the
/// link to the database writer.
pub struct ReplicationHub {
    role: ServerRole,
    synced_peers: BTreeSet<SensorId>,
    persist: Option<PersistLink>,
}

impl ReplicationHub {
    pub fn new(role: ServerRole) -> Self {
        Self {
            role,
            synced_peers: BTreeSet::new(),
            persist: None,
        }
    }

    pub fn role(&self) -> ServerRole {
        self.role
    }

    pub fn set_persist(&mut self, link: PersistLink) {
        self.persist = Some(link);
    }

    pub fn persist(&self) -> Option<&PersistLink> {
        self.persist.as_ref()
    }

    /// Stores a runtime status change without a full delta write.
    pub fn persist_status(&self, delta: &EntityDelta) {
        if let Some(link) = &self.persist {
            link.submit(PersistJob::Status(delta.record.clone()));
        }
    }

    /// Queues the deltas of one edit. None without a writer; false when the writer is gone.
    pub fn persist_edit(&self, ticket: u64, deltas: Vec<EntityDelta>) -> Option<bool> {
        let link = self.persist.as_ref()?;
        Some(link.submit(PersistJob::Edit { ticket, deltas }))
    }

    pub fn is_synced(&self, peer: SensorId) -> bool {
        self.synced_peers.contains(&peer)
    }

    pub fn synced_peers(&self) -> usize {
        self.synced_peers.len()
    }

    /// Forgets a standby peer; it re-reads the full state when it comes back.
    pub fn peer_gone(&mut self, peer: SensorId) {
        if self.synced_peers.remove(&peer) {
            info!("[replication] Standby peer {} detached", peer);
        }
    }

    /// Publishes deltas that are already persisted. Returns the sessions whose send failed.
    pub fn publish<S>(
        &mut self,
        ctx: &mut WorldContext<'_, S>,
        gui: &mut ConnectionGroup,
        standby: &mut ConnectionGroup,
        deltas: &[EntityDelta],
    ) -> Vec<(SensorId, TransportError)>
    where
        S: WorldState,
        S::Timer: From<SessionTimer>,
    {
        let mut failures = Vec::new();
        for delta in deltas {
            failures.extend(self.fan_out(ctx, gui, standby, delta));
        }
        failures
    }

    /// Publishes one delta to subscribed GUIs and synced standby peers.
    pub fn fan_out<S>(
        &mut self,
        ctx: &mut WorldContext<'_, S>,
        gui: &mut ConnectionGroup,
        standby: &mut ConnectionGroup,
        delta: &EntityDelta,
    ) -> Vec<(SensorId, TransportError)>
    where
        S: WorldState,
        S::Timer: From<SessionTimer>,
    {
        let packet = match delta_packet(delta) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("[replication] Cannot encode {}: {}", delta.target_key(), e);
                return Vec::new();
            }
        };
        let subscribers = delta.kind().subscribers();
        let mut failures = gui.broadcast(ctx, |s| s.role.subscription().intersects(subscribers), &packet);
        if self.role == ServerRole::Active && !self.synced_peers.is_empty() {
            let synced = &self.synced_peers;
            failures.extend(standby.broadcast(
                ctx,
                |s| s.role == SessionRole::StandbyPeer && synced.contains(&s.id),
                &packet,
            ));
        }
        debug!("[replication] {:?} {} published", delta.action, delta.target_key());
        failures
    }

    /// Sends `body` to every STATUS GUI.
    pub fn notify_status<S, T>(
        &self,
        ctx: &mut WorldContext<'_, S>,
        gui: &mut ConnectionGroup,
        msg_id: u32,
        body: &T,
    ) -> Vec<(SensorId, TransportError)>
    where
        S: WorldState,
        S::Timer: From<SessionTimer>,
        T: Serialize,
    {
        match Packet::json(msg_id, body) {
            Ok(packet) => gui.broadcast(
                ctx,
                |s| s.role.subscription().contains(SubscriptionMask::STATUS),
                &packet,
            ),
            Err(e) => {
                warn!("[replication] Cannot encode status message: {}", e);
                Vec::new()
            }
        }
    }

    /// Sends the initial snapshot to a freshly identified GUI.
    pub fn send_snapshot<S>(
        &self,
        ctx: &mut WorldContext<'_, S>,
        session: &mut Session,
        store: &EntityStore,
    ) -> Result<usize, TransportError>
    where
        S: WorldState,
        S::Timer: From<SessionTimer>,
    {
        let packets = snapshot_packets(store, session.role.subscription())?;
        let rows = packets.len().saturating_sub(2);
        for packet in &packets {
            session.packet_send(ctx, packet)?;
        }
        info!("[replication] Snapshot of {} rows sent to {}", rows, session.label());
        Ok(rows)
    }

    /// Answers a standby peer's sync request; deltas follow once it is answered.
    pub fn answer_sync<S>(
        &mut self,
        ctx: &mut WorldContext<'_, S>,
        peer: &mut Session,
        store: &EntityStore,
        req: &DbSyncInfoReq,
    ) -> Result<(), TransportError>
    where
        S: WorldState,
        S::Timer: From<SessionTimer>,
    {
        for packet in sync_packets(store, req)? {
            peer.packet_send(ctx, &packet)?;
        }
        self.synced_peers.insert(peer.id);
        info!("[replication] Standby peer {} synchronized", peer.label());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_store::store::ApplyMode;
    use crate::entity_store::types::{CommandAuthority, EntityRecord, Manager, SettingStatus, StatusTriad};
    use crate::protocol::msg_id::{AS_COMMAND_AUTHORITY_INFO, AS_MANAGER_INFO};

    fn manager(id: &str) -> EntityRecord {
        EntityRecord::Manager(Manager {
            manager_id: id.to_string(),
            ip: "10.0.0.1".to_string(),
            ssh_id: "naa".to_string(),
            ssh_pass: "pw".to_string(),
            status: StatusTriad::new(SettingStatus::Stop),
        })
    }

    fn authority(name: &str) -> EntityRecord {
        EntityRecord::CommandAuthority(CommandAuthority {
            name: name.to_string(),
            priority: 3,
            max_cmd_queue: 10,
            max_session_cnt: 2,
            ack_mode: true,
            log_mode: 0,
            status: StatusTriad::new(SettingStatus::Start),
        })
    }

    fn store() -> EntityStore {
        let (store, rejected) = EntityStore::from_records(vec![manager("m1"), authority("ops1")], ApplyMode::Authoritative);
        assert!(rejected.is_empty());
        store
    }

    #[test]
    fn test_snapshot_is_framed_by_init_info() {
        let packets = snapshot_packets(&store(), SubscriptionMask::STATUS).unwrap();
        assert_eq!(packets.first().unwrap().msg_id, INIT_INFO_START);
        assert_eq!(packets.last().unwrap().msg_id, INIT_INFO_END);
        let start: InitInfo = packets[0].decode_body().unwrap();
        assert_eq!(start.count, 1);
        assert_eq!(packets[1].msg_id, AS_MANAGER_INFO);

        let config = snapshot_packets(&store(), SubscriptionMask::CONFIG).unwrap();
        assert_eq!(config.len(), 4);
        assert!(config.iter().any(|p| p.msg_id == AS_COMMAND_AUTHORITY_INFO));
    }

    #[test]
    fn test_sync_packets_cover_requested_kinds() {
        let all = sync_packets(&store(), &DbSyncInfoReq::default()).unwrap();
        assert_eq!(all.len(), EntityKind::ALL.len() + 1);
        let done: DbSyncKind = all.last().unwrap().decode_body().unwrap();
        assert!(done.complete);

        let req = DbSyncInfoReq {
            kinds: vec![EntityKind::CommandAuthority],
        };
        let one = sync_packets(&store(), &req).unwrap();
        assert_eq!(one.len(), 2);
        let list: DbSyncInfoList = one[0].decode_body().unwrap();
        assert_eq!(list.kind, EntityKind::CommandAuthority);
        assert_eq!(list.records, vec![authority("ops1")]);
    }

    #[test]
    fn test_delta_packet_uses_kind_stream() {
        let packet = delta_packet(&EntityDelta::delete(manager("m1"))).unwrap();
        assert_eq!(packet.msg_id, AS_MANAGER_INFO);
        let delta: EntityDelta = packet.decode_body().unwrap();
        assert_eq!(delta.record, manager("m1"));
    }
}
