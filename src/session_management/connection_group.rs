use super::session::Session;
use super::types::{GroupKind, SessionRole, SessionTimer, SocketInfo};
use crate::error_handling::types::{SessionError, TransportError};
use crate::protocol::session_type::SessionType;
use crate::reactor::context::WorldContext;
use crate::reactor::sensor::{SensorId, WorldState};
use crate::transport::packet::Packet;
use log::{debug, info};
use std::collections::HashMap;

/// Sessions accepted on one listener, indexed by sensor id and by identified name.
///
/// A group lives inside one world state and is only touched by that world's handlers,
/// so it needs no lock. Broadcasts iterate a copy of the id list and report failed
/// sessions instead of removing them, so callers close them after the loop.
#[derive(Debug)]
pub struct ConnectionGroup {
    kind: GroupKind,
    sessions: HashMap<SensorId, Session>,
    names: HashMap<String, SensorId>,
}

impl ConnectionGroup {
    pub fn new(kind: GroupKind) -> Self {
        Self {
            kind,
            sessions: HashMap::new(),
            names: HashMap::new(),
        }
    }

    pub fn kind(&self) -> GroupKind {
        self.kind
    }

    pub fn accept(&mut self, session: Session) {
        debug!("[session] {} accepted {}", self.kind, session.label());
        self.sessions.insert(session.id, session);
    }

    /// Registers the session under `name`. A name already held by another session is refused.
    pub fn identify(
        &mut self,
        id: SensorId,
        session_type: SessionType,
        name: &str,
    ) -> Result<&mut Session, SessionError> {
        if let Some(holder) = self.names.get(name) {
            if *holder != id {
                return Err(SessionError::DuplicateName(name.to_string()));
            }
        }
        let session = self.sessions.get_mut(&id).ok_or(SessionError::NotFound)?;
        if let Some(previous) = session.name.take() {
            self.names.remove(&previous);
        }
        session.name = Some(name.to_string());
        session.session_type = Some(session_type);
        session.role = SessionRole::for_identify(session_type, name);
        self.names.insert(name.to_string(), id);
        info!("[session] {} identified {} as {}", self.kind, session.label(), session_type);
        Ok(session)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Session> {
        self.names.get(name).and_then(|id| self.sessions.get(id))
    }

    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut Session> {
        let id = *self.names.get(name)?;
        self.sessions.get_mut(&id)
    }

    pub fn id_by_name(&self, name: &str) -> Option<SensorId> {
        self.names.get(name).copied()
    }

    pub fn get(&self, id: SensorId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SensorId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn contains(&self, id: SensorId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<SensorId> {
        let mut ids: Vec<SensorId> = self.sessions.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn identified(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values().filter(|s| s.is_identified())
    }

    /// Number of identified sessions matching `pred`.
    pub fn count_where(&self, pred: impl Fn(&Session) -> bool) -> usize {
        self.identified().filter(|s| pred(s)).count()
    }

    /// Unlinks the session, cancels its timers and closes its socket.
    pub fn remove<S: WorldState>(&mut self, ctx: &mut WorldContext<'_, S>, id: SensorId) -> Option<Session> {
        let mut session = self.sessions.remove(&id)?;
        if let Some(name) = &session.name {
            if self.names.get(name) == Some(&id) {
                self.names.remove(name);
            }
        }
        session.close(ctx);
        debug!("[session] {} removed {}", self.kind, session.label());
        Some(session)
    }

    /// Sends `packet` to every identified session matching `pred`.
    pub fn broadcast<S>(
        &mut self,
        ctx: &mut WorldContext<'_, S>,
        pred: impl Fn(&Session) -> bool,
        packet: &Packet,
    ) -> Vec<(SensorId, TransportError)>
    where
        S: WorldState,
        S::Timer: From<SessionTimer>,
    {
        let mut failures = Vec::new();
        for id in self.ids() {
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            if !session.is_identified() || !pred(session) {
                continue;
            }
            if let Err(e) = session.packet_send(ctx, packet) {
                failures.push((id, e));
            }
        }
        failures
    }

    /// Health rows for every session.
    pub fn snapshot(&self) -> Vec<SocketInfo> {
        let mut rows: Vec<SocketInfo> = self
            .sessions
            .values()
            .map(|session| {
                let writable = session.socket().is_writable();
                SocketInfo {
                    name: session.name.clone().unwrap_or_default(),
                    peer: session.peer().to_string(),
                    session_type: session.session_type,
                    identified: session.is_identified(),
                    pending_bytes: session.socket().pending_bytes(),
                    writable,
                    created_at: session.created_at,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.peer.cmp(&b.peer)));
        rows
    }

    /// Closes every session, e.g. at shutdown.
    pub fn close_all<S: WorldState>(&mut self, ctx: &mut WorldContext<'_, S>) -> Vec<Session> {
        let ids = self.ids();
        ids.into_iter().filter_map(|id| self.remove(ctx, id)).collect()
    }
}
