//! Accept, identify handshake and per-role packet dispatch.

use super::sensors::SessionSensor;
use super::state::{Ctx, ServerState};
use crate::configuration::types::ServerRole;
use crate::error_handling::types::{ServerError, SessionError};
use crate::process_supervision::ProcessKind;
use crate::protocol::messages::{IdentifyResult, SessionIdentify};
use crate::protocol::msg_id::{self, CMD_ALIVE_RECEIVE, CMD_ALIVE_SEND, SESSION_IDENTIFY, SESSION_IDENTIFY_RES};
use crate::protocol::session_type::SessionType;
use crate::reactor::{SensorId, SensorRegistry};
use crate::session_management::{GroupKind, Session, SessionRole, SessionTimer};
use crate::transport::{CloseReason, Packet, Socket, SocketStream};
use log::{debug, info, warn};

pub type HandlerResult = Result<(), ServerError>;

pub fn unexpected(packet: &Packet) -> HandlerResult {
    Err(SessionError::UnexpectedMessage(packet.msg_id).into())
}

impl ServerState {
    pub fn on_accept(&mut self, ctx: &mut Ctx<'_>, kind: GroupKind, stream: SocketStream, peer: String) {
        if self.shutting_down {
            return;
        }
        let id = SensorRegistry::global().allocate();
        let peer_ip = stream.peer_ip();
        let socket = Socket::open(stream, id, ctx.io_sender(), self.settings.max_data_buf_size);
        ctx.register_with_id(id, Box::new(SessionSensor::new(id, kind)));
        self.groups
            .get_mut(kind)
            .accept(Session::new(id, kind, socket, peer_ip));
        info!("[server] {} connection from {} as {}", kind, peer, id);
    }

    pub fn on_packets(&mut self, ctx: &mut Ctx<'_>, id: SensorId, packets: Vec<Packet>) {
        for packet in packets {
            if self.groups.kind_of(id).is_none() {
                debug!("[server] Dropping packets of closed session {}", id);
                return;
            }
            self.on_packet(ctx, id, packet);
        }
    }

    pub fn on_packet(&mut self, ctx: &mut Ctx<'_>, id: SensorId, packet: Packet) {
        let Some(kind) = self.groups.kind_of(id) else {
            return;
        };
        let role = match self.groups.get_mut(kind).get_mut(id) {
            Some(session) => {
                session.note_receive();
                session.role.clone()
            }
            None => return,
        };
        match packet.msg_id {
            CMD_ALIVE_SEND => {
                self.send_packet(ctx, id, &Packet::empty(CMD_ALIVE_RECEIVE));
                return;
            }
            CMD_ALIVE_RECEIVE => return,
            _ => {}
        }
        if role == SessionRole::Unidentified {
            self.identify(ctx, kind, id, &packet);
            return;
        }
        if let Err(e) = self.dispatch_role(ctx, id, role, &packet) {
            warn!(
                "[server] {} from {} on {}: {}",
                msg_id::name(packet.msg_id),
                id,
                kind,
                e
            );
        }
    }

    fn dispatch_role(&mut self, ctx: &mut Ctx<'_>, id: SensorId, role: SessionRole, packet: &Packet) -> HandlerResult {
        match role {
            SessionRole::Manager { manager_id } => self.on_child_packet(ctx, id, ProcessKind::Manager, &manager_id, packet),
            SessionRole::DataHandler { data_handler_id } => {
                self.on_child_packet(ctx, id, ProcessKind::DataHandler, &data_handler_id, packet)
            }
            SessionRole::SubProc { sub_proc_id } => self.on_child_packet(ctx, id, ProcessKind::SubProc, &sub_proc_id, packet),
            SessionRole::Gui { mask } => self.on_gui_packet(ctx, id, mask, packet),
            SessionRole::ExternalMmc { .. } | SessionRole::MmcScheduler => self.on_originator_packet(ctx, id, packet),
            SessionRole::MmcGenerator => self.on_generator_packet(ctx, id, packet),
            SessionRole::RuleDownloader => self.on_rule_ack(ctx, packet),
            SessionRole::StandbyPeer => self.on_standby_peer_packet(ctx, id, packet),
            SessionRole::ActivePeer => self.on_active_peer_packet(ctx, packet),
            SessionRole::Sims | SessionRole::Netfinder | SessionRole::RouterInfo => {
                self.on_router_info_packet(ctx, id, packet)
            }
            SessionRole::JobMonitor => unexpected(packet),
            SessionRole::Unidentified => Err(SessionError::NotIdentified.into()),
        }
    }

    fn identify(&mut self, ctx: &mut Ctx<'_>, kind: GroupKind, id: SensorId, packet: &Packet) {
        let result = if kind == GroupKind::External {
            self.identify_external(ctx, id, packet)
        } else {
            self.identify_session(ctx, kind, id, packet)
        };
        if let Err(e) = result {
            warn!("[server] Identify on {} refused: {}", kind, e);
            let reason = match &e {
                SessionError::DuplicateName(_) => CloseReason::DuplicateName,
                other => CloseReason::Local(other.to_string()),
            };
            self.close_session(ctx, id, reason);
        }
    }

    fn identify_session(&mut self, ctx: &mut Ctx<'_>, kind: GroupKind, id: SensorId, packet: &Packet) -> Result<(), SessionError> {
        if packet.msg_id != SESSION_IDENTIFY {
            return Err(SessionError::NotIdentified);
        }
        let req: SessionIdentify = packet.decode_body()?;
        let refusal = if kind.accepts(req.session_type) {
            self.admit(req.session_type, &req.name).err()
        } else {
            Some(format!("{} cannot identify on the {} listener", req.session_type, kind))
        };
        if let Some(reason) = refusal {
            self.send(ctx, id, SESSION_IDENTIFY_RES, &IdentifyResult { result: 0, reason: reason.clone() });
            return Err(SessionError::Unauthorized(reason));
        }
        if let Err(e) = self.groups.get_mut(kind).identify(id, req.session_type, &req.name) {
            self.send(ctx, id, SESSION_IDENTIFY_RES, &IdentifyResult { result: 0, reason: e.to_string() });
            return Err(e);
        }
        self.send(ctx, id, SESSION_IDENTIFY_RES, &IdentifyResult { result: 1, reason: String::new() });
        self.on_identified(ctx, kind, id);
        Ok(())
    }

    /// Children must be configured; only an active server takes standby peers.
    fn admit(&self, session_type: SessionType, name: &str) -> Result<(), String> {
        let known = match session_type {
            SessionType::AsciiManager => self.store.manager(name).is_some(),
            SessionType::AsciiDataHandler => self.store.data_handler(name).is_some(),
            SessionType::AsciiSubProc => self.store.sub_proc(name).is_some(),
            SessionType::AsciiServer => {
                if self.settings.role != ServerRole::Active {
                    return Err("This server is not the active server".to_string());
                }
                true
            }
            _ => true,
        };
        if known {
            Ok(())
        } else {
            Err(format!("{} {} is not configured", session_type, name))
        }
    }

    /// Type-specific startup of a freshly identified session.
    pub fn on_identified(&mut self, ctx: &mut Ctx<'_>, kind: GroupKind, id: SensorId) {
        let interval = self.settings.alive_interval;
        let limit = self.settings.alive_limit;
        let role = match self.groups.get_mut(kind).get_mut(id) {
            Some(session) => {
                session.start_alive_check(ctx, interval, limit);
                session.role.clone()
            }
            None => return,
        };
        match role {
            SessionRole::Manager { manager_id } => self.child_identified(ctx, id, ProcessKind::Manager, &manager_id),
            SessionRole::DataHandler { data_handler_id } => {
                self.child_identified(ctx, id, ProcessKind::DataHandler, &data_handler_id)
            }
            SessionRole::SubProc { sub_proc_id } => self.child_identified(ctx, id, ProcessKind::SubProc, &sub_proc_id),
            SessionRole::Gui { mask } => self.gui_identified(ctx, id, mask),
            SessionRole::MmcScheduler => self.open_originator(ctx, id),
            SessionRole::StandbyPeer => info!("[replication] Standby peer {} identified, waiting for its sync request", id),
            _ => {}
        }
    }

    pub fn on_session_timer(&mut self, ctx: &mut Ctx<'_>, id: SensorId, timer: SessionTimer) {
        let result = match self.groups.session_mut(id) {
            Some(session) => session.on_timer(ctx, timer),
            None => return,
        };
        match result {
            Ok(None) => {}
            Ok(Some(count)) => self.close_session(ctx, id, CloseReason::AliveCheckFail(count)),
            Err(e) => self.close_session(ctx, id, CloseReason::from(&e)),
        }
    }

    /// Disconnect hook of each role.
    pub fn on_session_closed(&mut self, ctx: &mut Ctx<'_>, kind: GroupKind, session: Session) {
        let id = session.id;
        if self.originators.remove(&id).is_some() {
            let dropped = self.queues.close(id);
            let orphaned = self.correlator.orphan(id);
            if dropped + orphaned > 0 {
                info!(
                    "[mmc] {} left with {} queued and {} outstanding requests",
                    session.label(),
                    dropped,
                    orphaned
                );
            }
        }
        self.drop_pending_rules(ctx, id);
        match &session.role {
            SessionRole::Manager { manager_id } => self.child_lost(ctx, id, ProcessKind::Manager, manager_id),
            SessionRole::DataHandler { data_handler_id } => {
                self.child_lost(ctx, id, ProcessKind::DataHandler, data_handler_id)
            }
            SessionRole::SubProc { sub_proc_id } => self.child_lost(ctx, id, ProcessKind::SubProc, sub_proc_id),
            SessionRole::MmcGenerator => self.generator_lost(ctx, id),
            SessionRole::StandbyPeer => self.hub.peer_gone(id),
            _ => {}
        }
        if kind == GroupKind::ActiveLink {
            self.active_link_lost(ctx);
        }
    }
}
