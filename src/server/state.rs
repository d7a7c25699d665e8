use crate::configuration::config::ServerSettings;
use crate::entity_store::store::EntityStore;
use crate::entity_store::types::{Action, EntityDelta, EntityRecord};
use crate::error_handling::types::TransportError;
use crate::logging::{rotate_now, LogRotation, SharedLogFile};
use crate::mmc_pipeline::{
    Correlator, MmcQueues, MmcWorlds, NeRouter, PipelineEvent, PipelineSink, GARBAGE_LONG, GARBAGE_SHORT,
};
use crate::process_supervision::{
    ChildSupervisor, LaunchOutcome, LaunchSink, LauncherLink, ProcessKind, StartupTimeouts,
};
use crate::protocol::messages::ErrorMsg;
use crate::protocol::msg_id::ASCII_ERROR_MSG;
use crate::reactor::{SensorId, TimerKey, WorldContext, WorldHandle, WorldState};
use crate::replication::{ReplicationHub, StandbyReplica};
use crate::session_management::{ConnectionGroup, GroupKind, Session, SessionTimer};
use crate::storage::{PersistReply, PersistSink};
use crate::transport::{CloseReason, ListenSocket, Packet};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub type Ctx<'a> = WorldContext<'a, ServerState>;

/// Period of the connection health log.
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Cross-world messages handled by the main world.
#[derive(Debug)]
pub enum ServerMsg {
    Launched(LaunchOutcome),
    Pipeline(PipelineEvent),
    Persisted(PersistReply),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerTimer {
    Session(SessionTimer),
    StartupTimeout { kind: ProcessKind, id: String },
    KillGrace { pid: u32 },
    MmcResponse { gid: u64 },
    GarbageShort,
    GarbageLong,
    HealthSnapshot,
    LogRotate,
    StandbyReconnect,
}

impl From<SessionTimer> for ServerTimer {
    fn from(timer: SessionTimer) -> Self {
        ServerTimer::Session(timer)
    }
}

/// Policy of a session allowed to originate MMC requests.
#[derive(Debug, Clone, PartialEq)]
pub struct Originator {
    pub identity: String,
    pub ack_mode: bool,
    pub priority: u8,
    pub log_mode: u8,
    pub display: String,
}

/// A GUI edit staged on a copy of the store, waiting for its database write.
#[derive(Debug, Clone)]
pub struct PendingModify {
    pub ticket: u64,
    pub gui: SensorId,
    pub msg_id: u32,
    pub ack_id: u32,
    pub action: Action,
    pub requested: Vec<EntityDelta>,
}

/// A rule download waiting for its ack.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRule {
    pub gui: SensorId,
    pub target: SensorId,
    pub ack_id: u32,
    pub rule_id: String,
    /// Transaction the GUI sent, echoed in its ack.
    pub gui_transaction: Option<Uuid>,
}

/// One connection group per listener.
pub struct Groups {
    pub external: ConnectionGroup,
    pub mmc: ConnectionGroup,
    pub rule_downloader: ConnectionGroup,
    pub manager: ConnectionGroup,
    pub data_handler: ConnectionGroup,
    pub sub_proc: ConnectionGroup,
    pub gui: ConnectionGroup,
    pub sims: ConnectionGroup,
    pub netfinder: ConnectionGroup,
    pub standby: ConnectionGroup,
    pub router_info: ConnectionGroup,
    pub active_link: ConnectionGroup,
}

impl Default for Groups {
    fn default() -> Self {
        Self::new()
    }
}

impl Groups {
    pub fn new() -> Self {
        Self {
            external: ConnectionGroup::new(GroupKind::External),
            mmc: ConnectionGroup::new(GroupKind::Mmc),
            rule_downloader: ConnectionGroup::new(GroupKind::RuleDownloader),
            manager: ConnectionGroup::new(GroupKind::Manager),
            data_handler: ConnectionGroup::new(GroupKind::DataHandler),
            sub_proc: ConnectionGroup::new(GroupKind::SubProc),
            gui: ConnectionGroup::new(GroupKind::Gui),
            sims: ConnectionGroup::new(GroupKind::Sims),
            netfinder: ConnectionGroup::new(GroupKind::Netfinder),
            standby: ConnectionGroup::new(GroupKind::StandbyPeer),
            router_info: ConnectionGroup::new(GroupKind::RouterInfo),
            active_link: ConnectionGroup::new(GroupKind::ActiveLink),
        }
    }

    pub fn get(&self, kind: GroupKind) -> &ConnectionGroup {
        match kind {
            GroupKind::External => &self.external,
            GroupKind::Mmc => &self.mmc,
            GroupKind::RuleDownloader => &self.rule_downloader,
            GroupKind::Manager => &self.manager,
            GroupKind::DataHandler => &self.data_handler,
            GroupKind::SubProc => &self.sub_proc,
            GroupKind::Gui => &self.gui,
            GroupKind::Sims => &self.sims,
            GroupKind::Netfinder => &self.netfinder,
            GroupKind::StandbyPeer => &self.standby,
            GroupKind::RouterInfo => &self.router_info,
            GroupKind::ActiveLink => &self.active_link,
        }
    }

    pub fn get_mut(&mut self, kind: GroupKind) -> &mut ConnectionGroup {
        match kind {
            GroupKind::External => &mut self.external,
            GroupKind::Mmc => &mut self.mmc,
            GroupKind::RuleDownloader => &mut self.rule_downloader,
            GroupKind::Manager => &mut self.manager,
            GroupKind::DataHandler => &mut self.data_handler,
            GroupKind::SubProc => &mut self.sub_proc,
            GroupKind::Gui => &mut self.gui,
            GroupKind::Sims => &mut self.sims,
            GroupKind::Netfinder => &mut self.netfinder,
            GroupKind::StandbyPeer => &mut self.standby,
            GroupKind::RouterInfo => &mut self.router_info,
            GroupKind::ActiveLink => &mut self.active_link,
        }
    }

    pub fn kind_of(&self, id: SensorId) -> Option<GroupKind> {
        GroupKind::ALL.into_iter().find(|kind| self.get(*kind).contains(id))
    }

    pub fn session(&self, id: SensorId) -> Option<&Session> {
        self.kind_of(id).and_then(|kind| self.get(kind).get(id))
    }

    pub fn session_mut(&mut self, id: SensorId) -> Option<&mut Session> {
        let kind = self.kind_of(id)?;
        self.get_mut(kind).get_mut(id)
    }

    pub fn total(&self) -> usize {
        GroupKind::ALL.iter().map(|kind| self.get(*kind).len()).sum()
    }
}

/// State of the main world: every socket, the entity store and the MMC bookkeeping.
pub struct ServerState {
    pub settings: ServerSettings,
    pub started_at: DateTime<Utc>,
    pub store: EntityStore,
    pub groups: Groups,
    pub hub: ReplicationHub,
    pub correlator: Correlator,
    pub router: NeRouter,
    pub queues: Arc<MmcQueues>,
    pub pipeline: Option<MmcWorlds>,
    pub launcher: Option<LauncherLink>,
    pub children: ChildSupervisor,
    pub timeouts: HashMap<ProcessKind, StartupTimeouts>,
    pub originators: HashMap<SensorId, Originator>,
    /// `gid -> generator session` for expansions in flight.
    pub generating: HashMap<u64, SensorId>,
    pub rules: HashMap<Uuid, PendingRule>,
    /// The edit being persisted; later edits wait in `modify_backlog`.
    pub pending_modify: Option<PendingModify>,
    pub modify_backlog: VecDeque<(SensorId, Packet)>,
    pub next_ticket: u64,
    pub listeners: Vec<ListenSocket>,
    pub replica: StandbyReplica,
    /// Sensor of the outbound link to the active peer (standby only).
    pub active_link: Option<SensorId>,
    pub log_file: Option<SharedLogFile>,
    pub shutting_down: bool,
}

impl ServerState {
    pub fn new(settings: ServerSettings, store: EntityStore) -> Self {
        let hub = ReplicationHub::new(settings.role);
        Self {
            settings,
            started_at: Utc::now(),
            store,
            groups: Groups::new(),
            hub,
            correlator: Correlator::new(),
            router: NeRouter::new(),
            queues: Arc::new(MmcQueues::new()),
            pipeline: None,
            launcher: None,
            children: ChildSupervisor::new(),
            timeouts: HashMap::new(),
            originators: HashMap::new(),
            generating: HashMap::new(),
            rules: HashMap::new(),
            pending_modify: None,
            modify_backlog: VecDeque::new(),
            next_ticket: 0,
            listeners: Vec::new(),
            replica: StandbyReplica::new(),
            active_link: None,
            log_file: None,
            shutting_down: false,
        }
    }

    pub fn timeouts_mut(&mut self, kind: ProcessKind) -> &mut StartupTimeouts {
        self.timeouts
            .entry(kind)
            .or_insert_with(|| StartupTimeouts::new(kind))
    }

    /// Sends `body` to session `id`; a failed send closes the session.
    pub fn send<T: Serialize>(&mut self, ctx: &mut Ctx<'_>, id: SensorId, msg_id: u32, body: &T) -> bool {
        match Packet::json(msg_id, body) {
            Ok(packet) => self.send_packet(ctx, id, &packet),
            Err(e) => {
                warn!("[server] Cannot encode msg_id {}: {}", msg_id, e);
                false
            }
        }
    }

    pub fn send_packet(&mut self, ctx: &mut Ctx<'_>, id: SensorId, packet: &Packet) -> bool {
        let result = match self.groups.session_mut(id) {
            Some(session) => session.packet_send(ctx, packet),
            None => {
                debug!("[server] Session {} gone, dropping msg_id {}", id, packet.msg_id);
                return false;
            }
        };
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!("[server] Send to {} failed: {}", id, e);
                self.close_session(ctx, id, CloseReason::from(&e));
                false
            }
        }
    }

    /// Removes the session from its group, then runs the role's disconnect hook.
    pub fn close_session(&mut self, ctx: &mut Ctx<'_>, id: SensorId, reason: CloseReason) {
        let Some(kind) = self.groups.kind_of(id) else {
            return;
        };
        let Some(session) = self.groups.get_mut(kind).remove(ctx, id) else {
            return;
        };
        // the active link sensor outlives its sessions and reconnects
        if kind != GroupKind::ActiveLink {
            ctx.unregister(id);
        }
        info!("[server] {} session {} closed: {}", kind, session.label(), reason);
        self.on_session_closed(ctx, kind, session);
    }

    pub fn close_failed(&mut self, ctx: &mut Ctx<'_>, failures: Vec<(SensorId, TransportError)>) {
        for (id, e) in failures {
            warn!("[server] Send to {} failed: {}", id, e);
            self.close_session(ctx, id, CloseReason::from(&e));
        }
    }

    /// Operator notice to every GUI.
    pub fn report_error(&mut self, ctx: &mut Ctx<'_>, message: String) {
        error!("[server] {}", message);
        let body = ErrorMsg {
            priority: 1,
            message,
            time: Utc::now(),
        };
        let packet = match Packet::json(ASCII_ERROR_MSG, &body) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("[server] Cannot encode error message: {}", e);
                return;
            }
        };
        let failures = self.groups.gui.broadcast(ctx, |_| true, &packet);
        self.close_failed(ctx, failures);
    }

    /// Publishes applied deltas to GUIs and the standby peer, and persists them.
    pub fn publish(&mut self, ctx: &mut Ctx<'_>, deltas: &[EntityDelta]) {
        if deltas.is_empty() {
            return;
        }
        let failures = self
            .hub
            .publish(ctx, &mut self.groups.gui, &mut self.groups.standby, deltas);
        self.close_failed(ctx, failures);
    }

    /// Publishes a runtime status change of one row.
    pub fn publish_status(&mut self, ctx: &mut Ctx<'_>, record: EntityRecord) {
        let delta = EntityDelta::modify(record);
        self.hub.persist_status(&delta);
        let failures = self
            .hub
            .fan_out(ctx, &mut self.groups.gui, &mut self.groups.standby, &delta);
        self.close_failed(ctx, failures);
    }

    /// Sends `body` to every STATUS GUI.
    pub fn notify_status<T: Serialize>(&mut self, ctx: &mut Ctx<'_>, msg_id: u32, body: &T) {
        let failures = self.hub.notify_status(ctx, &mut self.groups.gui, msg_id, body);
        self.close_failed(ctx, failures);
    }

    /// Stops the worker worlds; the main world keeps running.
    pub fn stop_workers(&mut self) {
        if let Some(worlds) = &self.pipeline {
            worlds.stop();
        }
        if let Some(launcher) = &self.launcher {
            launcher.stop();
        }
        if let Some(persist) = self.hub.persist() {
            persist.stop();
        }
    }

    pub(crate) fn on_garbage(&mut self, ctx: &mut Ctx<'_>, timer: ServerTimer) {
        let now = Utc::now();
        let horizon = self.settings.mmc_result_horizon;
        let (period, swept) = match timer {
            ServerTimer::GarbageShort => (GARBAGE_SHORT, self.queues.sweep_garbage(now, horizon)),
            _ => {
                let swept = self.correlator.sweep_stored(now, horizon) + self.queues.sweep_garbage(now, horizon);
                (GARBAGE_LONG, swept)
            }
        };
        if swept > 0 {
            debug!("[mmc] Swept {} stale entries", swept);
        }
        ctx.set_timer_for(SensorId::WORLD, period, timer);
    }

    fn on_log_rotate(&mut self, ctx: &mut Ctx<'_>) {
        if let Some(file) = &self.log_file {
            match rotate_now(file) {
                Ok(true) => info!("[server] Log file rotated"),
                Ok(false) => {}
                Err(e) => warn!("[server] Log rotation failed: {}", e),
            }
        }
        let delay = LogRotation::new(self.settings.log_cycle).delay_from_now();
        ctx.set_timer_for(SensorId::WORLD, delay, ServerTimer::LogRotate);
    }
}

/// Delivers pipeline events to the main world.
pub struct MainSink(pub WorldHandle<ServerState>);

impl PipelineSink for MainSink {
    fn deliver(&self, event: PipelineEvent) -> bool {
        self.0.send_message(ServerMsg::Pipeline(event)).is_ok()
    }
}

/// Launch results travel back to the main world as messages.
pub fn launch_sink(handle: WorldHandle<ServerState>) -> LaunchSink {
    Box::new(move |outcome| handle.send_message(ServerMsg::Launched(outcome)).is_ok())
}

pub fn persist_sink(handle: WorldHandle<ServerState>) -> PersistSink {
    Box::new(move |reply| handle.send_message(ServerMsg::Persisted(reply)).is_ok())
}

impl WorldState for ServerState {
    type Message = ServerMsg;
    type Timer = ServerTimer;

    fn on_message(&mut self, ctx: &mut Ctx<'_>, msg: ServerMsg) {
        match msg {
            ServerMsg::Launched(outcome) => self.on_launched(ctx, outcome),
            ServerMsg::Pipeline(event) => self.on_pipeline_event(ctx, event),
            ServerMsg::Persisted(reply) => self.on_persisted(ctx, reply),
        }
    }

    fn on_timer(&mut self, ctx: &mut Ctx<'_>, key: TimerKey, timer: ServerTimer) {
        match timer {
            ServerTimer::StartupTimeout { kind, id } => self.on_startup_timeout(ctx, kind, &id, key),
            ServerTimer::KillGrace { pid } => self.on_kill_grace(pid),
            ServerTimer::MmcResponse { gid } => self.on_mmc_timeout(ctx, gid, key),
            ServerTimer::GarbageShort | ServerTimer::GarbageLong => self.on_garbage(ctx, timer),
            ServerTimer::HealthSnapshot => {
                self.log_health();
                ctx.set_timer_for(SensorId::WORLD, HEALTH_INTERVAL, ServerTimer::HealthSnapshot);
            }
            ServerTimer::LogRotate => self.on_log_rotate(ctx),
            ServerTimer::StandbyReconnect => self.reconnect_active(ctx),
            ServerTimer::Session(timer) => debug!("[server] Stray session timer {:?}", timer),
        }
    }

    fn on_stop(&mut self, _ctx: &mut Ctx<'_>) {
        info!("[server] Main world stopped");
        self.stop_workers();
    }
}
