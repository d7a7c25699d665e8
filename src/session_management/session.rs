use super::alive_check::AliveCheck;
use super::types::{GroupKind, SessionRole, SessionTimer};
use crate::error_handling::types::TransportError;
use crate::protocol::messages::LogAction;
use crate::protocol::msg_id;
use crate::protocol::session_type::SessionType;
use crate::reactor::context::WorldContext;
use crate::reactor::sensor::{SensorId, WorldState};
use crate::transport::packet::Packet;
use crate::transport::socket::{SendOutcome, Socket};
use chrono::{DateTime, Utc};
use log::trace;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Log streams a GUI session asked for; the last request per name wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogStatus {
    entries: HashMap<String, LogAction>,
}

impl LogStatus {
    pub fn update(&mut self, name: &str, status: LogAction) {
        self.entries.insert(name.to_string(), status);
    }

    pub fn wants(&self, name: &str) -> bool {
        self.entries.get(name) == Some(&LogAction::Add)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A framed connection plus its identification and heartbeat state.
#[derive(Debug)]
pub struct Session {
    pub id: SensorId,
    pub group: GroupKind,
    pub name: Option<String>,
    pub session_type: Option<SessionType>,
    pub role: SessionRole,
    pub log_status: LogStatus,
    pub created_at: DateTime<Utc>,
    peer_ip: Option<String>,
    socket: Socket,
    alive: Option<AliveCheck>,
}

impl Session {
    pub fn new(id: SensorId, group: GroupKind, socket: Socket, peer_ip: Option<String>) -> Self {
        Self {
            id,
            group,
            name: None,
            session_type: None,
            role: SessionRole::Unidentified,
            log_status: LogStatus::default(),
            created_at: Utc::now(),
            peer_ip,
            socket,
            alive: None,
        }
    }

    pub fn is_identified(&self) -> bool {
        self.name.is_some()
    }

    pub fn peer(&self) -> &str {
        self.socket.peer()
    }

    pub fn peer_ip(&self) -> Option<&str> {
        self.peer_ip.as_deref()
    }

    /// Name for logs: the identified name or the peer address.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{}({})", name, self.socket.peer()),
            None => self.socket.peer().to_string(),
        }
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut Socket {
        &mut self.socket
    }

    pub fn alive(&self) -> Option<&AliveCheck> {
        self.alive.as_ref()
    }

    /// Sends a packet; a queued tail drains on its own once the peer reads.
    pub fn packet_send<S>(
        &mut self,
        ctx: &mut WorldContext<'_, S>,
        packet: &Packet,
    ) -> Result<SendOutcome, TransportError>
    where
        S: WorldState,
        S::Timer: From<SessionTimer>,
    {
        let outcome = self.socket.packet_send(packet)?;
        trace!(
            "[session] {} <- {} ({:?})",
            self.label(),
            msg_id::name(packet.msg_id),
            outcome
        );
        Ok(outcome)
    }

    pub fn send_json<S, T>(
        &mut self,
        ctx: &mut WorldContext<'_, S>,
        msg_id: u32,
        body: &T,
    ) -> Result<SendOutcome, TransportError>
    where
        S: WorldState,
        S::Timer: From<SessionTimer>,
        T: Serialize,
    {
        let packet = Packet::json(msg_id, body)?;
        self.packet_send(ctx, &packet)
    }

    pub fn start_alive_check<S>(&mut self, ctx: &mut WorldContext<'_, S>, interval: Duration, limit: u32)
    where
        S: WorldState,
        S::Timer: From<SessionTimer>,
    {
        self.stop_alive_check(ctx);
        let mut alive = AliveCheck::new(interval, limit);
        alive.send_timer = Some(ctx.set_timer_for(self.id, interval, SessionTimer::AliveSend.into()));
        alive.recv_timer = Some(ctx.set_timer_for(self.id, interval, SessionTimer::AliveRecv.into()));
        self.alive = Some(alive);
    }

    pub fn stop_alive_check<S: WorldState>(&mut self, ctx: &mut WorldContext<'_, S>) {
        if let Some(alive) = self.alive.take() {
            for key in [alive.send_timer, alive.recv_timer].into_iter().flatten() {
                ctx.cancel_timer(key);
            }
        }
    }

    /// Any inbound packet proves the peer alive.
    pub fn note_receive(&mut self) {
        if let Some(alive) = self.alive.as_mut() {
            alive.on_receive();
        }
    }

    /// Dispatches one of the session's own timers. Returns the fail count when the
    /// heartbeat gave up.
    pub fn on_timer<S>(
        &mut self,
        ctx: &mut WorldContext<'_, S>,
        timer: SessionTimer,
    ) -> Result<Option<u32>, TransportError>
    where
        S: WorldState,
        S::Timer: From<SessionTimer>,
    {
        match timer {
            SessionTimer::AliveSend => {
                let Some(interval) = self.alive.as_ref().map(|a| a.interval()) else {
                    return Ok(None);
                };
                let key = ctx.set_timer_for(self.id, interval, SessionTimer::AliveSend.into());
                if let Some(alive) = self.alive.as_mut() {
                    alive.send_timer = Some(key);
                }
                self.packet_send(ctx, &Packet::empty(msg_id::CMD_ALIVE_SEND))?;
                Ok(None)
            }
            SessionTimer::AliveRecv => {
                let Some(alive) = self.alive.as_mut() else {
                    return Ok(None);
                };
                if alive.on_recv_tick() {
                    let count = alive.fail_count();
                    alive.recv_timer = None;
                    return Ok(Some(count));
                }
                let interval = alive.interval();
                let key = ctx.set_timer_for(self.id, interval, SessionTimer::AliveRecv.into());
                if let Some(alive) = self.alive.as_mut() {
                    alive.recv_timer = Some(key);
                }
                Ok(None)
            }
        }
    }

    /// Cancels every timer of the session and shuts the socket.
    pub fn close<S: WorldState>(&mut self, ctx: &mut WorldContext<'_, S>) {
        ctx.cancel_all_timers(self.id);
        self.alive = None;
        self.socket.close();
    }
}
