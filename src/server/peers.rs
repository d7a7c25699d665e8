//! Active/standby replication links, router info queries and the health log.

use super::dispatch::{unexpected, HandlerResult};
use super::state::{Ctx, ServerState, ServerTimer};
use crate::entity_store::types::EntityDelta;
use crate::protocol::messages::{
    info_kind, DbSyncInfoList, DbSyncInfoReq, DbSyncKind, IdentifyResult, RouterInfoReq, RouterInfoRes,
    SessionIdentify,
};
use crate::protocol::msg_id::{
    self, AS_DB_SYNC_INFO_LIST, AS_DB_SYNC_INFO_REQ, AS_DB_SYNC_KIND, AS_PROCESS_INFO, AS_ROUTER_INFO_REQ,
    AS_ROUTER_INFO_RES, AS_SYSTEM_INFO, ASCII_ERROR_MSG, SESSION_IDENTIFY, SESSION_IDENTIFY_RES,
};
use crate::protocol::session_type::SessionType;
use crate::reactor::SensorId;
use crate::replication::RECONNECT_INTERVAL;
use crate::session_management::{GroupKind, Session, SessionRole};
use crate::transport::{spawn_connect, CloseReason, ListenAddr, Packet, Socket, SocketStream};
use log::{debug, info, warn};
use std::net::SocketAddr;

impl ServerState {
    /// Requests from a standby server connected to this active one.
    pub fn on_standby_peer_packet(&mut self, ctx: &mut Ctx<'_>, id: SensorId, packet: &Packet) -> HandlerResult {
        if packet.msg_id != AS_DB_SYNC_INFO_REQ {
            return unexpected(packet);
        }
        let req: DbSyncInfoReq = packet.decode_body()?;
        let Some(peer) = self.groups.standby.get_mut(id) else {
            return Ok(());
        };
        if let Err(e) = self.hub.answer_sync(ctx, peer, &self.store, &req) {
            warn!("[replication] Sync answer to {} failed: {}", id, e);
            self.close_session(ctx, id, CloseReason::from(&e));
        }
        Ok(())
    }

    /// Traffic from the active server, as seen by a standby.
    pub fn on_active_peer_packet(&mut self, ctx: &mut Ctx<'_>, packet: &Packet) -> HandlerResult {
        match packet.msg_id {
            SESSION_IDENTIFY_RES => {
                let res: IdentifyResult = packet.decode_body()?;
                if res.result != 1 {
                    warn!("[replication] The active peer refused us: {}", res.reason);
                    if let Some(link) = self.active_link {
                        self.close_session(ctx, link, CloseReason::Local(res.reason));
                    }
                }
                Ok(())
            }
            AS_DB_SYNC_INFO_LIST => {
                let list: DbSyncInfoList = packet.decode_body()?;
                self.replica.on_list(list);
                Ok(())
            }
            AS_DB_SYNC_KIND => {
                let done: DbSyncKind = packet.decode_body()?;
                let deltas = self.replica.on_sync_kind(done, &mut self.store);
                self.mirror(ctx, &deltas);
                Ok(())
            }
            AS_PROCESS_INFO | AS_SYSTEM_INFO | ASCII_ERROR_MSG => {
                debug!("[replication] Ignoring {} from the active peer", msg_id::name(packet.msg_id));
                Ok(())
            }
            msg if info_kind(msg).is_some() => {
                let delta: EntityDelta = packet.decode_body()?;
                let applied = self.replica.on_delta(delta, &mut self.store)?;
                self.mirror(ctx, &applied);
                Ok(())
            }
            _ => unexpected(packet),
        }
    }

    /// A standby shows the replicated state to its GUIs but never persists it.
    fn mirror(&mut self, ctx: &mut Ctx<'_>, deltas: &[EntityDelta]) {
        for delta in deltas {
            let failures = self
                .hub
                .fan_out(ctx, &mut self.groups.gui, &mut self.groups.standby, delta);
            self.close_failed(ctx, failures);
        }
    }

    /// `AS_ROUTER_INFO_REQ` from SIMS, netfinder or a router info client.
    pub fn on_router_info_packet(&mut self, ctx: &mut Ctx<'_>, id: SensorId, packet: &Packet) -> HandlerResult {
        if packet.msg_id != AS_ROUTER_INFO_REQ {
            return unexpected(packet);
        }
        let req: RouterInfoReq = packet.decode_body()?;
        let store = &self.store;
        let entries = self.router.entries(req.ne.as_deref(), |manager_id| {
            store
                .manager(manager_id)
                .map(|m| m.ip.clone())
                .unwrap_or_default()
        });
        debug!("[server] Router info for {} carries {} entries", id, entries.len());
        self.send(ctx, id, AS_ROUTER_INFO_RES, &RouterInfoRes { entries });
        Ok(())
    }

    pub fn log_health(&mut self) {
        for kind in GroupKind::ALL {
            let rows = self.groups.get(kind).snapshot();
            if rows.is_empty() {
                continue;
            }
            let stuck = rows.iter().filter(|r| !r.writable).count();
            info!("[health] {}: {} sessions, {} not writable", kind, rows.len(), stuck);
            for row in rows.iter().filter(|r| r.pending_bytes > 0) {
                debug!(
                    "[health] {} {} ({:?}) has {} bytes pending since {}",
                    kind, row.name, row.session_type, row.pending_bytes, row.created_at
                );
            }
        }
        info!(
            "[health] {} queued MMC requests, {} outstanding",
            self.queues.pending_requests(),
            self.correlator.len()
        );
    }

    /// Standby only: dials the active server.
    pub fn reconnect_active(&mut self, ctx: &mut Ctx<'_>) {
        if self.shutting_down {
            return;
        }
        let (Some(link), Some((ip, port))) = (self.active_link, self.settings.active_peer.clone()) else {
            return;
        };
        let addr: SocketAddr = match format!("{}:{}", ip, port).parse() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("[replication] Bad active peer address {}:{}: {}", ip, port, e);
                return;
            }
        };
        debug!("[replication] Connecting to the active peer {}", addr);
        self.replica.connecting();
        spawn_connect(ListenAddr::Tcp(addr), link, ctx.io_sender());
    }

    pub fn on_active_connected(&mut self, ctx: &mut Ctx<'_>, link: SensorId, stream: SocketStream, peer: String) {
        if self.shutting_down {
            return;
        }
        let peer_ip = stream.peer_ip();
        let socket = Socket::open(stream, link, ctx.io_sender(), self.settings.max_data_buf_size);
        self.groups
            .active_link
            .accept(Session::new(link, GroupKind::ActiveLink, socket, peer_ip));
        let name = self.settings.name.clone();
        match self.groups.active_link.identify(link, SessionType::AsciiServer, &name) {
            Ok(session) => session.role = SessionRole::ActivePeer,
            Err(e) => {
                warn!("[replication] Cannot register the active link: {}", e);
                self.close_session(ctx, link, CloseReason::Local(e.to_string()));
                return;
            }
        }
        info!("[replication] Connected to the active peer {}", peer);

        let identify = SessionIdentify {
            session_type: SessionType::AsciiServer,
            name,
        };
        if !self.send(ctx, link, SESSION_IDENTIFY, &identify) {
            return;
        }
        let req = self.replica.begin_sync();
        if !self.send(ctx, link, AS_DB_SYNC_INFO_REQ, &req) {
            return;
        }
        let interval = self.settings.alive_interval;
        let limit = self.settings.alive_limit;
        if let Some(session) = self.groups.active_link.get_mut(link) {
            session.start_alive_check(ctx, interval, limit);
        }
    }

    pub fn on_active_connect_failed(&mut self, ctx: &mut Ctx<'_>, error: &str) {
        debug!("[replication] Active peer unreachable: {}", error);
        self.replica.disconnected();
        self.schedule_reconnect(ctx);
    }

    pub fn active_link_lost(&mut self, ctx: &mut Ctx<'_>) {
        self.replica.disconnected();
        self.schedule_reconnect(ctx);
    }

    fn schedule_reconnect(&mut self, ctx: &mut Ctx<'_>) {
        if !self.shutting_down {
            ctx.set_timer_for(SensorId::WORLD, RECONNECT_INTERVAL, ServerTimer::StandbyReconnect);
        }
    }
}
