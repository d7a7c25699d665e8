//! Sensors of the main world: listeners, sessions, the standby link and signals.

use super::state::{Ctx, ServerState, ServerTimer};
use crate::error_handling::types::ReactorError;
use crate::logging::rotate_now;
use crate::process_supervision::ProcessKind;
use crate::protocol::msg_id::CMD_PROC_TERMINATE;
use crate::reactor::{IoEvent, Sensor, SensorId, SignalKind, SignalSensor, TimerKey};
use crate::session_management::GroupKind;
use crate::transport::Packet;
use log::{debug, info, warn};

/// Accept loop of one listener.
pub struct ListenerSensor {
    kind: GroupKind,
    name: String,
}

impl ListenerSensor {
    pub fn new(kind: GroupKind) -> Self {
        Self {
            kind,
            name: format!("{}-listener", kind),
        }
    }
}

impl Sensor<ServerState> for ListenerSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_io(&mut self, state: &mut ServerState, ctx: &mut Ctx<'_>, event: IoEvent) {
        match event {
            IoEvent::Accepted { stream, peer } => state.on_accept(ctx, self.kind, stream, peer),
            other => debug!("[server] {} ignored {:?}", self.name, other),
        }
    }
}

/// One accepted session; its id is the session id.
pub struct SessionSensor {
    id: SensorId,
    name: String,
}

impl SessionSensor {
    pub fn new(id: SensorId, kind: GroupKind) -> Self {
        Self {
            id,
            name: format!("{}-session", kind),
        }
    }
}

impl Sensor<ServerState> for SessionSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_io(&mut self, state: &mut ServerState, ctx: &mut Ctx<'_>, event: IoEvent) {
        match event {
            IoEvent::Packets(packets) => state.on_packets(ctx, self.id, packets),
            IoEvent::Closed(reason) => state.close_session(ctx, self.id, reason),
            other => debug!("[server] {} {} ignored {:?}", self.name, self.id, other),
        }
    }

    fn on_timer(&mut self, state: &mut ServerState, ctx: &mut Ctx<'_>, _key: TimerKey, timer: ServerTimer) {
        if let ServerTimer::Session(timer) = timer {
            state.on_session_timer(ctx, self.id, timer);
        }
    }
}

/// Outbound link of a standby server to its active peer. Survives disconnects
/// and reconnects under the same id.
pub struct ActiveLinkSensor {
    id: SensorId,
}

impl ActiveLinkSensor {
    pub fn new(id: SensorId) -> Self {
        Self { id }
    }
}

impl Sensor<ServerState> for ActiveLinkSensor {
    fn name(&self) -> &str {
        "active-link"
    }

    fn on_io(&mut self, state: &mut ServerState, ctx: &mut Ctx<'_>, event: IoEvent) {
        match event {
            IoEvent::Connected { stream, peer } => state.on_active_connected(ctx, self.id, stream, peer),
            IoEvent::ConnectFailed(e) => state.on_active_connect_failed(ctx, &e),
            IoEvent::Packets(packets) => state.on_packets(ctx, self.id, packets),
            IoEvent::Closed(reason) => state.close_session(ctx, self.id, reason),
            other => debug!("[server] active link ignored {:?}", other),
        }
    }

    fn on_timer(&mut self, state: &mut ServerState, ctx: &mut Ctx<'_>, _key: TimerKey, timer: ServerTimer) {
        if let ServerTimer::Session(timer) = timer {
            state.on_session_timer(ctx, self.id, timer);
        }
    }
}

pub fn install_signals(ctx: &mut Ctx<'_>) -> Result<SensorId, ReactorError> {
    SignalSensor::install(
        ctx,
        &[
            SignalKind::Interrupt,
            SignalKind::Terminate,
            SignalKind::Child,
            SignalKind::Hangup,
        ],
        |state: &mut ServerState, ctx: &mut Ctx<'_>, signal| state.on_signal(ctx, signal),
    )
}

impl ServerState {
    pub fn on_signal(&mut self, ctx: &mut Ctx<'_>, signal: SignalKind) {
        match signal {
            SignalKind::Interrupt | SignalKind::Terminate => {
                info!("[server] Received {:?}", signal);
                self.shutdown(ctx, 0);
            }
            SignalKind::Child => {
                for dead in self.children.reap() {
                    warn!(
                        "[supervisor] {} (pid {}) exited with {:?}",
                        dead.name, dead.pid, dead.code
                    );
                }
            }
            SignalKind::Hangup => {
                if let Some(file) = &self.log_file {
                    if let Err(e) = rotate_now(file) {
                        warn!("[server] Log reopen failed: {}", e);
                    }
                }
            }
        }
    }

    /// Graceful stop: children are told to terminate, local ones are killed,
    /// every session and listener is closed and the worker worlds stop.
    pub fn shutdown(&mut self, ctx: &mut Ctx<'_>, code: i32) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        info!("[server] Shutting down");

        let terminate = Packet::empty(CMD_PROC_TERMINATE);
        let children: Vec<SensorId> = ProcessKind::ALL
            .into_iter()
            .flat_map(|kind| {
                self.groups
                    .get(super::children::group_of(kind))
                    .identified()
                    .map(|s| s.id)
                    .collect::<Vec<_>>()
            })
            .collect();
        for id in children {
            self.send_packet(ctx, id, &terminate);
        }
        for dead in self.children.kill_all() {
            info!("[supervisor] {} (pid {}) stopped", dead.name, dead.pid);
        }

        for kind in GroupKind::ALL {
            for session in self.groups.get_mut(kind).close_all(ctx) {
                if kind != GroupKind::ActiveLink {
                    ctx.unregister(session.id);
                }
            }
        }
        self.listeners.clear();
        self.stop_workers();
        ctx.exit(code);
    }
}
