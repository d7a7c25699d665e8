//! GUI sessions: configuration edits, process control, log subscriptions and
//! the rule download relay.

use super::dispatch::{unexpected, HandlerResult};
use super::state::{Ctx, PendingModify, PendingRule, ServerState};
use crate::configuration::types::ServerRole;
use crate::entity_store::store::{ApplyMode, EntityStore};
use crate::entity_store::types::{
    Action, CurStatus, EntityDelta, EntityKey, EntityRecord, SettingStatus,
};
use crate::error_handling::types::{ServerError, StoreError, SupervisorError, TransportError};
use crate::process_supervision::ProcessKind;
use crate::protocol::messages::{
    modify_ack_id, rule_down_ack_id, ConnectionListModify, EntityModify, ErrorMsg, LogInfo, ModifyAck,
    OpenPort, ProcControl, ProcessInfo, ProcessType, RuleDown, RuleDownAck, SessionControl, SystemInfo,
};
use crate::protocol::msg_id::{self, *};
use crate::protocol::SubscriptionMask;
use crate::reactor::SensorId;
use crate::storage::PersistReply;
use crate::session_management::SessionRole;
use crate::transport::{CloseReason, Packet};
use chrono::Utc;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use uuid::Uuid;

fn decode_modify<T: DeserializeOwned>(
    packet: &Packet,
    wrap: fn(T) -> EntityRecord,
) -> Result<(Action, Vec<EntityDelta>), TransportError> {
    let modify: EntityModify<T> = packet.decode_body()?;
    let delta = EntityDelta {
        action: modify.action,
        record: wrap(modify.record),
        old_key: modify.old_key,
    };
    Ok((modify.action, vec![delta]))
}

/// Applies `deltas` in order, returning every resulting change.
fn stage_all(store: &mut EntityStore, deltas: &[EntityDelta]) -> Result<Vec<EntityDelta>, StoreError> {
    let mut applied = Vec::new();
    for delta in deltas {
        applied.extend(store.apply(delta.clone(), ApplyMode::Authoritative)?);
    }
    Ok(applied)
}

impl ServerState {
    pub fn on_gui_packet(&mut self, ctx: &mut Ctx<'_>, id: SensorId, mask: SubscriptionMask, packet: &Packet) -> HandlerResult {
        match packet.msg_id {
            msg if modify_ack_id(msg).is_some() => self.on_modify(ctx, id, packet),
            PROC_CONTROL => self.on_proc_control(ctx, id, packet),
            SESSION_CONTROL => self.on_session_control(ctx, id, packet),
            AS_LOG_INFO => {
                let log: LogInfo = packet.decode_body()?;
                if let Some(session) = self.groups.gui.get_mut(id) {
                    session.log_status.update(&log.name, log.status);
                }
                Ok(())
            }
            AS_MMC_REQ | AS_MMC_REQ_OLD if mask.contains(SubscriptionMask::COMMAND) => {
                self.on_originator_packet(ctx, id, packet)
            }
            msg if rule_down_ack_id(msg).is_some() && mask.contains(SubscriptionMask::RULE_EDITOR) => {
                self.on_rule_down(ctx, id, packet)
            }
            _ => unexpected(packet),
        }
    }

    /// `AS_*_MODIFY`: staged on a copy of the store and written to the database.
    /// The store changes, GUIs hear of it and the editor gets its ack only once the
    /// write succeeded. Edits are handled one at a time.
    fn on_modify(&mut self, ctx: &mut Ctx<'_>, gui: SensorId, packet: &Packet) -> HandlerResult {
        let Some(ack_id) = modify_ack_id(packet.msg_id) else {
            return unexpected(packet);
        };
        if self.pending_modify.is_some() {
            self.modify_backlog.push_back((gui, packet.clone()));
            return Ok(());
        }
        let (action, deltas) = match packet.msg_id {
            AS_MANAGER_MODIFY => decode_modify(packet, EntityRecord::Manager)?,
            AS_CONNECTOR_MODIFY => decode_modify(packet, EntityRecord::Connector)?,
            AS_CONNECTION_MODIFY => decode_modify(packet, EntityRecord::Connection)?,
            AS_DATAHANDLER_MODIFY => decode_modify(packet, EntityRecord::DataHandler)?,
            AS_COMMAND_AUTHORITY_MODIFY => decode_modify(packet, EntityRecord::CommandAuthority)?,
            AS_SUB_PROC_MODIFY => decode_modify(packet, EntityRecord::SubProc)?,
            AS_SESSION_CFG_MODIFY => decode_modify(packet, EntityRecord::SubscriberCfg)?,
            _ => {
                let list: ConnectionListModify = packet.decode_body()?;
                let action = list.action;
                let deltas = list
                    .records
                    .into_iter()
                    .map(|record| EntityDelta {
                        action,
                        record: EntityRecord::Connection(record),
                        old_key: None,
                    })
                    .collect();
                (action, deltas)
            }
        };
        let edit = PendingModify {
            ticket: self.next_ticket,
            gui,
            msg_id: packet.msg_id,
            ack_id,
            action,
            requested: deltas,
        };
        self.next_ticket += 1;

        if self.settings.role != ServerRole::Active {
            self.finish_modify(ctx, &edit, Err(StoreError::ReadOnly.to_string()));
            return Ok(());
        }
        let mut staged = self.store.clone();
        let written = match stage_all(&mut staged, &edit.requested) {
            Ok(written) => written,
            Err(e) => {
                self.finish_modify(ctx, &edit, Err(e.to_string()));
                return Ok(());
            }
        };
        match self.hub.persist_edit(edit.ticket, written) {
            Some(true) => {
                debug!("[store] {} waits for edit #{}", msg_id::name(edit.msg_id), edit.ticket);
                self.pending_modify = Some(edit);
            }
            Some(false) => self.finish_modify(ctx, &edit, Err("database writer is not running".to_string())),
            None => self.finish_modify(ctx, &edit, Ok(())),
        }
        Ok(())
    }

    /// The database answered the pending edit; later edits are taken up next.
    pub fn on_persisted(&mut self, ctx: &mut Ctx<'_>, reply: PersistReply) {
        let edit = match self.pending_modify.take() {
            Some(edit) if edit.ticket == reply.ticket => edit,
            other => {
                warn!("[store] Reply for unknown edit #{}", reply.ticket);
                self.pending_modify = other;
                return;
            }
        };
        let result = reply.result.map_err(|e| format!("database write failed: {}", e));
        self.finish_modify(ctx, &edit, result);

        while self.pending_modify.is_none() {
            let Some((gui, packet)) = self.modify_backlog.pop_front() else {
                break;
            };
            if let Err(e) = self.on_modify(ctx, gui, &packet) {
                warn!("[store] Queued {} from {} dropped: {}", msg_id::name(packet.msg_id), gui, e);
            }
        }
    }

    /// Applies a persisted edit to the live store, publishes it and acks the editor;
    /// a failed edit leaves the store untouched.
    fn finish_modify(&mut self, ctx: &mut Ctx<'_>, edit: &PendingModify, persisted: Result<(), String>) {
        let result = persisted.and_then(|()| self.apply_all(edit.requested.clone()).map_err(|e| e.to_string()));
        let ack = match result {
            Ok(applied) => {
                info!("[store] {} applied {} changes", msg_id::name(edit.msg_id), applied.len());
                self.after_apply(&applied);
                self.publish(ctx, &applied);
                ModifyAck {
                    action: edit.action,
                    result: 1,
                    reason: String::new(),
                }
            }
            Err(reason) => {
                warn!("[store] {} refused: {}", msg_id::name(edit.msg_id), reason);
                ModifyAck {
                    action: edit.action,
                    result: 0,
                    reason,
                }
            }
        };
        self.send(ctx, edit.gui, edit.ack_id, &ack);
    }

    /// All or nothing: a list is staged on a copy of the store.
    fn apply_all(&mut self, deltas: Vec<EntityDelta>) -> Result<Vec<EntityDelta>, StoreError> {
        if deltas.len() == 1 {
            let mut deltas = deltas;
            return match deltas.pop() {
                Some(delta) => self.store.apply(delta, ApplyMode::Authoritative),
                None => Ok(Vec::new()),
            };
        }
        let mut staged = self.store.clone();
        let applied = stage_all(&mut staged, &deltas)?;
        self.store = staged;
        Ok(applied)
    }

    /// Deleted rows no longer route MMC traffic.
    fn after_apply(&mut self, applied: &[EntityDelta]) {
        for delta in applied.iter().filter(|d| d.action == Action::Delete) {
            match &delta.record {
                EntityRecord::Manager(m) => {
                    self.router.remove_manager(&m.manager_id);
                }
                EntityRecord::Connector(c) => {
                    self.router.remove_ne(&c.manager_id, &c.ne_name);
                }
                EntityRecord::Connection(c) => {
                    self.router.remove_connection(c.sequence);
                }
                _ => {}
            }
        }
    }

    fn on_proc_control(&mut self, ctx: &mut Ctx<'_>, gui: SensorId, packet: &Packet) -> HandlerResult {
        let control: ProcControl = packet.decode_body()?;
        let result = if self.settings.role != ServerRole::Active {
            Err(StoreError::ReadOnly.into())
        } else {
            match control.process_type {
                ProcessType::Connector => self.control_connector(ctx, &control),
                other => match ProcessKind::from_process_type(other) {
                    Some(kind) => {
                        let controlled = match control.status {
                            SettingStatus::Start => self.start_child(ctx, kind, &control.id),
                            SettingStatus::Stop => self.stop_child(ctx, kind, &control.id),
                        };
                        controlled.map_err(ServerError::from)
                    }
                    None => Err(StoreError::InvalidDelta(format!("{:?} cannot be controlled", other)).into()),
                },
            }
        };
        if let Err(e) = result {
            self.refuse_control(ctx, gui, e);
        }
        Ok(())
    }

    /// Connector start/stop goes through its manager.
    fn control_connector(&mut self, ctx: &mut Ctx<'_>, control: &ProcControl) -> Result<(), ServerError> {
        let manager = self
            .groups
            .manager
            .id_by_name(&control.manager_id)
            .ok_or_else(|| SupervisorError::NotRunning(format!("MANAGER({})", control.manager_id)))?;
        let key = EntityKey::Connector {
            manager_id: control.manager_id.clone(),
            connector_id: control.id.clone(),
        };
        let record = self.store.request_control(&key, control.status)?;
        self.publish_status(ctx, record);
        if !self.send(ctx, manager, PROC_CONTROL, control) {
            return Ok(());
        }
        let Some(connector) = self.store.connector(&control.manager_id, &control.id).cloned() else {
            return Ok(());
        };
        match control.status {
            SettingStatus::Start => {
                self.open_connector_ports(ctx, manager, &connector);
            }
            SettingStatus::Stop => {
                self.router.remove_ne(&connector.manager_id, &connector.ne_name);
            }
        }
        Ok(())
    }

    fn on_session_control(&mut self, ctx: &mut Ctx<'_>, gui: SensorId, packet: &Packet) -> HandlerResult {
        let control: SessionControl = packet.decode_body()?;
        let result = if self.settings.role == ServerRole::Active {
            self.control_connection(ctx, &control)
        } else {
            Err(StoreError::ReadOnly.into())
        };
        if let Err(e) = result {
            self.refuse_control(ctx, gui, e);
        }
        Ok(())
    }

    /// Connection start opens its port; stop is forwarded to the manager.
    fn control_connection(&mut self, ctx: &mut Ctx<'_>, control: &SessionControl) -> Result<(), ServerError> {
        let manager = self
            .groups
            .manager
            .id_by_name(&control.manager_id)
            .ok_or_else(|| SupervisorError::NotRunning(format!("MANAGER({})", control.manager_id)))?;
        let connector = self
            .store
            .connector(&control.manager_id, &control.connector_id)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!("CONNECTOR({}/{})", control.manager_id, control.connector_id))
            })?;
        let key = EntityKey::Connection {
            sequence: control.sequence,
        };
        let record = self.store.request_control(&key, control.status)?;
        let EntityRecord::Connection(connection) = record.clone() else {
            return Ok(());
        };
        self.publish_status(ctx, record);
        match control.status {
            SettingStatus::Start => {
                if self.send(ctx, manager, CMD_OPEN_PORT, &OpenPort::new(&connector, &connection))
                    && connection.command_port_flag
                {
                    self.router
                        .add(&connector.manager_id, &connector.ne_name, connection.sequence);
                }
            }
            SettingStatus::Stop => {
                self.send(ctx, manager, SESSION_CONTROL, control);
                self.router.remove_connection(connection.sequence);
            }
        }
        Ok(())
    }

    fn refuse_control(&mut self, ctx: &mut Ctx<'_>, gui: SensorId, e: ServerError) {
        warn!("[server] Control request of {} refused: {}", gui, e);
        let notice = ErrorMsg {
            priority: 1,
            message: e.to_string(),
            time: Utc::now(),
        };
        self.send(ctx, gui, ASCII_ERROR_MSG, &notice);
    }

    /// Forwards a child's log lines to the GUIs that asked for them.
    pub fn relay_child_log(&mut self, ctx: &mut Ctx<'_>, log: &LogInfo) {
        let packet = match Packet::json(AS_LOG_INFO, log) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("[server] Cannot encode log of {}: {}", log.name, e);
                return;
            }
        };
        let failures = self
            .groups
            .gui
            .broadcast(ctx, |s| s.log_status.wants(&log.name), &packet);
        self.close_failed(ctx, failures);
    }

    /// Relays a rule to its downloader under a fresh transaction id.
    fn on_rule_down(&mut self, ctx: &mut Ctx<'_>, gui: SensorId, packet: &Packet) -> HandlerResult {
        let Some(ack_id) = rule_down_ack_id(packet.msg_id) else {
            return unexpected(packet);
        };
        let mut rule: RuleDown = packet.decode_body()?;
        let gui_transaction = rule.transaction;
        let transaction = Uuid::new_v4();
        rule.transaction = Some(transaction);

        let target = if packet.msg_id == CMD_COMMAND_RULE_DOWN {
            self.groups
                .mmc
                .identified()
                .find(|s| s.role == SessionRole::MmcGenerator)
                .map(|s| s.id)
        } else {
            self.groups
                .rule_downloader
                .identified()
                .find(|s| s.role == SessionRole::RuleDownloader)
                .map(|s| s.id)
        };
        let refusal = match target {
            Some(target) if self.send(ctx, target, packet.msg_id, &rule) => {
                debug!("[server] Rule {} relayed to {} as {}", rule.rule_id, target, transaction);
                self.rules.insert(
                    transaction,
                    PendingRule {
                        gui,
                        target,
                        ack_id,
                        rule_id: rule.rule_id.clone(),
                        gui_transaction,
                    },
                );
                return Ok(());
            }
            Some(_) => "The rule downloader is not reachable",
            None => "No rule downloader is connected",
        };
        let ack = RuleDownAck {
            transaction: gui_transaction,
            rule_id: rule.rule_id,
            result: 0,
            reason: refusal.to_string(),
        };
        self.send(ctx, gui, ack_id, &ack);
        Ok(())
    }

    /// `CMD_*_RULE_DOWN_ACK` from a downloader, routed back to the GUI.
    pub fn on_rule_ack(&mut self, ctx: &mut Ctx<'_>, packet: &Packet) -> HandlerResult {
        if !matches!(
            packet.msg_id,
            CMD_PARSING_RULE_DOWN_ACK | CMD_MAPPING_RULE_DOWN_ACK | CMD_SCHEDULER_RULE_DOWN_ACK | CMD_COMMAND_RULE_DOWN_ACK
        ) {
            return unexpected(packet);
        }
        let ack: RuleDownAck = packet.decode_body()?;
        let Some(pending) = ack.transaction.and_then(|t| self.rules.remove(&t)) else {
            debug!("[server] Ack of rule {} matches no pending download", ack.rule_id);
            return Ok(());
        };
        let reply = RuleDownAck {
            transaction: pending.gui_transaction,
            rule_id: pending.rule_id,
            result: ack.result,
            reason: ack.reason,
        };
        self.send(ctx, pending.gui, pending.ack_id, &reply);
        Ok(())
    }

    /// Pending downloads of a closed GUI are forgotten; those of a closed
    /// downloader are acked with a failure.
    pub fn drop_pending_rules(&mut self, ctx: &mut Ctx<'_>, id: SensorId) {
        let mut affected: Vec<Uuid> = self
            .rules
            .iter()
            .filter(|(_, p)| p.gui == id || p.target == id)
            .map(|(t, _)| *t)
            .collect();
        affected.sort();
        for transaction in affected {
            let Some(pending) = self.rules.remove(&transaction) else {
                continue;
            };
            if pending.gui == id {
                continue;
            }
            let ack = RuleDownAck {
                transaction: pending.gui_transaction,
                rule_id: pending.rule_id,
                result: 0,
                reason: "The rule downloader is disconnected".to_string(),
            };
            self.send(ctx, pending.gui, pending.ack_id, &ack);
        }
    }

    pub fn system_info(&self) -> SystemInfo {
        SystemInfo {
            name: self.settings.name.clone(),
            role: self.settings.role,
            pid: std::process::id(),
            started_at: self.started_at,
            sessions: self.groups.total(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn own_process_info(&self) -> ProcessInfo {
        ProcessInfo {
            process_type: ProcessType::AsciiServer,
            manager_id: String::new(),
            id: self.settings.name.clone(),
            sequence: None,
            status: CurStatus::Start,
            pid: Some(std::process::id()),
        }
    }

    pub fn publish_own_status(&mut self, ctx: &mut Ctx<'_>) {
        let info = self.own_process_info();
        self.notify_status(ctx, AS_PROCESS_INFO, &info);
    }

    /// Subscriber settings, the initial snapshot, then the per-stream extras.
    pub fn gui_identified(&mut self, ctx: &mut Ctx<'_>, id: SensorId, mask: SubscriptionMask) {
        let Some(session) = self.groups.gui.get_mut(id) else {
            return;
        };
        let name = session.name.clone().unwrap_or_default();
        if let Some(cfg) = self.store.subscriber_cfg(&name) {
            let socket = session.socket_mut();
            socket.set_writerable_check(cfg.writerable_check);
            if cfg.max_data_buf_size > 0 {
                socket.set_max_data_buf_size(cfg.max_data_buf_size);
            }
            debug!(
                "[server] {} buffers sends up to {} bytes",
                name,
                socket.max_data_buf_size()
            );
        }
        if let Err(e) = self.hub.send_snapshot(ctx, session, &self.store) {
            warn!("[server] Snapshot to {} failed: {}", name, e);
            self.close_session(ctx, id, CloseReason::from(&e));
            return;
        }
        if mask.contains(SubscriptionMask::STATUS) {
            let system = self.system_info();
            let process = self.own_process_info();
            if !self.send(ctx, id, AS_SYSTEM_INFO, &system) {
                return;
            }
            self.send(ctx, id, AS_PROCESS_INFO, &process);
        }
        if mask.contains(SubscriptionMask::COMMAND) {
            self.open_originator(ctx, id);
        }
    }
}
