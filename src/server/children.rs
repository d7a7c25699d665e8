//! Start, stop and restart of managers, data handlers and sub processes.

use super::dispatch::{unexpected, HandlerResult};
use super::state::{Ctx, ServerState, ServerTimer};
use crate::entity_store::types::{Connection, Connector, CurStatus, EntityKey, EntityRecord, SettingStatus};
use crate::error_handling::types::StoreError;
use crate::process_supervision::{is_local_host, HostAccess, LaunchOutcome, LaunchPlan, ProcessKind, KILL_GRACE};
use crate::protocol::messages::{LogInfo, MmcPublishRes, OpenPort, ProcInit, ProcessInfo, ProcessType};
use crate::protocol::msg_id::{
    AS_LOG_INFO, AS_PROCESS_INFO, CMD_MMC_PUBLISH_RES, CMD_OPEN_PORT, CMD_PROC_INIT, CMD_PROC_TERMINATE,
    PROCESS_INFO, PROC_INIT_END,
};
use crate::reactor::{SensorId, TimerKey};
use crate::session_management::GroupKind;
use crate::transport::Packet;
use log::{debug, info, warn};

pub fn group_of(kind: ProcessKind) -> GroupKind {
    match kind {
        ProcessKind::Manager => GroupKind::Manager,
        ProcessKind::DataHandler => GroupKind::DataHandler,
        ProcessKind::SubProc => GroupKind::SubProc,
    }
}

fn setting_of(record: &EntityRecord) -> Option<SettingStatus> {
    match record {
        EntityRecord::Manager(m) => Some(m.status.setting_status),
        EntityRecord::Connector(c) => Some(c.status.setting_status),
        EntityRecord::DataHandler(d) => Some(d.status.setting_status),
        EntityRecord::SubProc(s) => Some(s.status.setting_status),
        _ => None,
    }
}

impl ServerState {
    /// Command line of a child, from its configuration row.
    pub fn launch_plan(&self, kind: ProcessKind, id: &str) -> Option<LaunchPlan> {
        let settings = &self.settings;
        let (access, binary, log_cycle, extra) = match kind {
            ProcessKind::Manager => {
                let manager = self.store.manager(id)?;
                (
                    HostAccess::for_manager(manager),
                    kind.default_binary().to_string(),
                    settings.log_cycle,
                    Vec::new(),
                )
            }
            ProcessKind::DataHandler => {
                let data_handler = self.store.data_handler(id)?;
                (
                    HostAccess::for_data_handler(data_handler),
                    kind.default_binary().to_string(),
                    data_handler.log_cycle,
                    Vec::new(),
                )
            }
            ProcessKind::SubProc => {
                let sub_proc = self.store.sub_proc(id)?;
                let binary = if sub_proc.binary.is_empty() {
                    kind.default_binary().to_string()
                } else {
                    sub_proc.binary.clone()
                };
                let extra = sub_proc.args.split_whitespace().map(str::to_string).collect();
                (HostAccess::for_sub_proc(sub_proc), binary, settings.log_cycle, extra)
            }
        };
        let port = match kind {
            ProcessKind::Manager => settings.ports.manager,
            ProcessKind::DataHandler => settings.ports.datahandler,
            ProcessKind::SubProc => settings.ports.subproc,
        };
        let local = is_local_host(&access.host, &settings.advertise_ip);
        let mut args = vec![
            "--name".to_string(),
            id.to_string(),
            "--svrip".to_string(),
            settings.advertise_ip.clone(),
            "--svrport".to_string(),
            port.to_string(),
            "--logcycle".to_string(),
            log_cycle.to_string(),
        ];
        args.extend(extra);
        let bin_dir = if local {
            settings.layout.bin_dir.display().to_string()
        } else {
            settings.remote_bin_dir.clone()
        };
        Some(LaunchPlan {
            kind,
            id: id.to_string(),
            access,
            binary,
            args,
            bin_dir,
            local,
        })
    }

    /// Children whose setting is START at boot.
    pub fn start_configured_children(&mut self, ctx: &mut Ctx<'_>) {
        let mut wanted: Vec<(ProcessKind, String)> = Vec::new();
        wanted.extend(
            self.store
                .data_handlers()
                .filter(|d| d.status.setting_status == SettingStatus::Start)
                .map(|d| (ProcessKind::DataHandler, d.data_handler_id.clone())),
        );
        wanted.extend(
            self.store
                .sub_procs()
                .filter(|s| s.status.setting_status == SettingStatus::Start)
                .map(|s| (ProcessKind::SubProc, s.sub_proc_id.clone())),
        );
        wanted.extend(
            self.store
                .managers()
                .filter(|m| m.status.setting_status == SettingStatus::Start)
                .map(|m| (ProcessKind::Manager, m.manager_id.clone())),
        );
        for (kind, id) in wanted {
            if let Err(e) = self.start_child(ctx, kind, &id) {
                warn!("[supervisor] Cannot start {}({}): {}", kind, id, e);
            }
        }
    }

    pub fn start_child(&mut self, ctx: &mut Ctx<'_>, kind: ProcessKind, id: &str) -> Result<(), StoreError> {
        let record = self.store.request_control(&kind.key(id), SettingStatus::Start)?;
        self.publish_status(ctx, record);
        self.launch(ctx, kind, id);
        Ok(())
    }

    /// Arms the startup deadline, then starts the child locally or through the launcher.
    fn launch(&mut self, ctx: &mut Ctx<'_>, kind: ProcessKind, id: &str) {
        let Some(plan) = self.launch_plan(kind, id) else {
            warn!("[supervisor] {}({}) is not configured", kind, id);
            return;
        };
        let delay = self.timeouts_mut(kind).next_delay();
        let key = ctx.set_timer_for(
            SensorId::WORLD,
            delay,
            ServerTimer::StartupTimeout {
                kind,
                id: id.to_string(),
            },
        );
        if let Some(old) = self.timeouts_mut(kind).insert(id, key) {
            ctx.cancel_timer(old);
        }
        info!("[supervisor] Starting {} (timeout {}s)", plan.label(), delay.as_secs());

        let outcome = if plan.local {
            let name = plan.label();
            self.kill_local(ctx, &name);
            let result = self
                .children
                .spawn(&name, &plan.argv())
                .map(|_| ())
                .map_err(|e| e.to_string());
            Some(LaunchOutcome {
                kind,
                id: id.to_string(),
                result,
            })
        } else {
            match &self.launcher {
                Some(launcher) => launcher.start(plan),
                None => Some(LaunchOutcome {
                    kind,
                    id: id.to_string(),
                    result: Err("no remote launcher".to_string()),
                }),
            }
        };
        if let Some(outcome) = outcome {
            self.on_launched(ctx, outcome);
        }
    }

    pub fn stop_child(&mut self, ctx: &mut Ctx<'_>, kind: ProcessKind, id: &str) -> Result<(), StoreError> {
        let key = kind.key(id);
        let record = self.store.request_control(&key, SettingStatus::Stop)?;
        self.publish_status(ctx, record);
        if let Some(timer) = self.timeouts_mut(kind).remove(id) {
            ctx.cancel_timer(timer);
        }
        match self.groups.get(group_of(kind)).id_by_name(id) {
            Some(session) => {
                self.send_packet(ctx, session, &Packet::empty(CMD_PROC_TERMINATE));
            }
            None => {
                self.kill_child(ctx, kind, id);
                let record = self.store.confirm_status(&key, CurStatus::Stop)?;
                self.publish_status(ctx, record);
            }
        }
        Ok(())
    }

    fn kill_child(&mut self, ctx: &mut Ctx<'_>, kind: ProcessKind, id: &str) {
        let Some(plan) = self.launch_plan(kind, id) else {
            return;
        };
        if plan.local {
            self.kill_local(ctx, &plan.label());
        } else if let Some(launcher) = &self.launcher {
            launcher.kill(plan);
        }
    }

    /// SIGTERM now, SIGKILL from a timer once the grace period is over.
    fn kill_local(&mut self, ctx: &mut Ctx<'_>, name: &str) {
        if let Some(pid) = self.children.terminate(name) {
            ctx.set_timer_for(SensorId::WORLD, KILL_GRACE, ServerTimer::KillGrace { pid });
        }
    }

    pub fn on_kill_grace(&mut self, pid: u32) {
        if self.children.force_kill(pid) {
            info!("[supervisor] pid {} killed after its grace period", pid);
        }
    }

    pub fn on_launched(&mut self, ctx: &mut Ctx<'_>, outcome: LaunchOutcome) {
        let LaunchOutcome { kind, id, result } = outcome;
        let Err(e) = result else {
            debug!("[supervisor] {}({}) launched, waiting for identify", kind, id);
            return;
        };
        if let Some(key) = self.timeouts_mut(kind).remove(&id) {
            ctx.cancel_timer(key);
        }
        match self.store.abandon_start(&kind.key(&id)) {
            Ok(record) => self.publish_status(ctx, record),
            Err(err) => warn!("[supervisor] {}({}): {}", kind, id, err),
        }
        self.report_error(ctx, format!("The {}({}) start failed: {}", kind, id, e));
    }

    pub fn on_startup_timeout(&mut self, ctx: &mut Ctx<'_>, kind: ProcessKind, id: &str, key: TimerKey) {
        if !self.timeouts_mut(kind).expire(id, key) {
            return;
        }
        match self.store.abandon_start(&kind.key(id)) {
            Ok(record) => self.publish_status(ctx, record),
            Err(e) => warn!("[supervisor] {}({}): {}", kind, id, e),
        }
        self.report_error(ctx, format!("The {}({}) did not identify in time.", kind, id));
        self.kill_child(ctx, kind, id);
    }

    pub fn child_identified(&mut self, ctx: &mut Ctx<'_>, session: SensorId, kind: ProcessKind, id: &str) {
        if let Some(key) = self.timeouts_mut(kind).remove(id) {
            ctx.cancel_timer(key);
        }
        match self.store.confirm_status(&kind.key(id), CurStatus::Start) {
            Ok(record) => self.publish_status(ctx, record),
            Err(e) => warn!("[supervisor] {}({}): {}", kind, id, e),
        }
        let (connectors, connections) = if kind == ProcessKind::Manager {
            self.router.attach_manager(id, session);
            (
                self.store.connectors_of(id).into_iter().cloned().collect(),
                self.store.connections_of_manager(id).into_iter().cloned().collect(),
            )
        } else {
            (Vec::new(), Vec::new())
        };
        let init = ProcInit {
            id: id.to_string(),
            server_name: self.settings.name.clone(),
            log_cycle: self.settings.log_cycle,
            alive_interval_secs: self.settings.alive_interval.as_secs(),
            connectors,
            connections,
        };
        self.send(ctx, session, CMD_PROC_INIT, &init);
    }

    /// `CMD_OPEN_PORT` for every connection of the manager's started connectors.
    fn open_ports(&mut self, ctx: &mut Ctx<'_>, session: SensorId, manager_id: &str) {
        let connectors: Vec<Connector> = self
            .store
            .connectors_of(manager_id)
            .into_iter()
            .filter(|c| c.status.setting_status == SettingStatus::Start)
            .cloned()
            .collect();
        for connector in connectors {
            if !self.open_connector_ports(ctx, session, &connector) {
                return;
            }
        }
    }

    pub fn open_connector_ports(&mut self, ctx: &mut Ctx<'_>, session: SensorId, connector: &Connector) -> bool {
        let connections: Vec<Connection> = self
            .store
            .connections_of(&connector.manager_id, &connector.connector_id)
            .into_iter()
            .cloned()
            .collect();
        for connection in connections {
            if !self.send(ctx, session, CMD_OPEN_PORT, &OpenPort::new(connector, &connection)) {
                return false;
            }
            if connection.command_port_flag {
                self.router
                    .add(&connector.manager_id, &connector.ne_name, connection.sequence);
            }
        }
        true
    }

    pub fn on_child_packet(
        &mut self,
        ctx: &mut Ctx<'_>,
        session: SensorId,
        kind: ProcessKind,
        id: &str,
        packet: &Packet,
    ) -> HandlerResult {
        match packet.msg_id {
            PROC_INIT_END if kind == ProcessKind::Manager => {
                self.open_ports(ctx, session, id);
                Ok(())
            }
            PROC_INIT_END => {
                debug!("[supervisor] {}({}) initialized", kind, id);
                Ok(())
            }
            PROCESS_INFO => {
                let info: ProcessInfo = packet.decode_body()?;
                self.on_process_info(ctx, id, info)
            }
            AS_LOG_INFO => {
                let log: LogInfo = packet.decode_body()?;
                self.relay_child_log(ctx, &log);
                Ok(())
            }
            CMD_MMC_PUBLISH_RES if kind == ProcessKind::Manager => {
                let res: MmcPublishRes = packet.decode_body()?;
                self.on_publish_res(ctx, &res);
                Ok(())
            }
            _ => unexpected(packet),
        }
    }

    /// Status report of a child process or of a connector/connection inside a manager.
    fn on_process_info(&mut self, ctx: &mut Ctx<'_>, reporter: &str, info: ProcessInfo) -> HandlerResult {
        let key = match info.process_type {
            ProcessType::Connector => EntityKey::Connector {
                manager_id: if info.manager_id.is_empty() {
                    reporter.to_string()
                } else {
                    info.manager_id.clone()
                },
                connector_id: info.id.clone(),
            },
            ProcessType::Connection => match info.sequence {
                Some(sequence) => EntityKey::Connection { sequence },
                None => return Err(StoreError::InvalidDelta("connection status without sequence".to_string()).into()),
            },
            other => match ProcessKind::from_process_type(other) {
                Some(kind) => kind.key(&info.id),
                None => return Err(StoreError::InvalidDelta(format!("status of {:?}", other)).into()),
            },
        };
        let record = self.store.confirm_status(&key, info.status)?;
        if info.status != CurStatus::Start {
            match &record {
                EntityRecord::Connector(c) => {
                    self.router.remove_ne(&c.manager_id, &c.ne_name);
                }
                EntityRecord::Connection(c) => {
                    self.router.remove_connection(c.sequence);
                }
                _ => {}
            }
        }
        self.publish_status(ctx, record);
        self.notify_status(ctx, AS_PROCESS_INFO, &info);
        Ok(())
    }

    /// A child's session went away; restarts it when its setting is still START.
    pub fn child_lost(&mut self, ctx: &mut Ctx<'_>, session: SensorId, kind: ProcessKind, id: &str) {
        let key = kind.key(id);
        let records = match kind {
            ProcessKind::Manager => self.store.manager_lost(id),
            _ => self.store.mark_lost(&key).map(|r| vec![r]).unwrap_or_default(),
        };
        for record in records {
            self.publish_status(ctx, record);
        }
        if kind == ProcessKind::Manager {
            let nes = self.router.remove_manager(id);
            if !nes.is_empty() {
                info!("[mmc] {} NEs of MANAGER({}) are unroutable", nes.len(), id);
            }
            let reason = format!("The MANAGER({}) is disconnected", id);
            for gid in self.correlator.dispatched_to(session) {
                self.fail_request(ctx, gid, &reason);
            }
        }

        let restart = self.store.record(&key).and_then(|r| setting_of(&r)) == Some(SettingStatus::Start);
        if !restart || self.shutting_down {
            return;
        }
        self.report_error(ctx, format!("The {}({}) is killed abnormal.", kind, id));
        match self.start_child(ctx, kind, id) {
            Ok(()) => self.report_error(ctx, format!("The {}({}) is reexecuted.", kind, id)),
            Err(e) => warn!("[supervisor] Restart of {}({}) refused: {}", kind, id, e),
        }
    }
}
