use super::types::*;
use crate::error_handling::types::StoreError;
use crate::protocol::session_type::SubscriptionMask;
use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};

/// How status fields of an incoming record are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Edits coming from operators: runtime status is owned by the store.
    Authoritative,
    /// Rows replicated from the Active peer are taken verbatim.
    Replica,
}

#[derive(Debug, Clone)]
struct ConnectorNode {
    info: Connector,
    connections: BTreeMap<u32, Connection>,
}

#[derive(Debug, Clone)]
struct ManagerNode {
    info: Manager,
    connectors: BTreeMap<String, ConnectorNode>,
}

/// Authoritative Manager -> Connector -> Connection tree plus the standalone tables.
///
/// Single writer: only the main world mutates it. Every mutation validates first and
/// touches the maps only once it cannot fail, so a failed `apply` leaves the store as it was.
#[derive(Debug, Clone, Default)]
pub struct EntityStore {
    managers: BTreeMap<String, ManagerNode>,
    connection_index: HashMap<u32, (String, String)>,
    data_handlers: BTreeMap<String, DataHandler>,
    sub_procs: BTreeMap<String, SubProc>,
    authorities: BTreeMap<String, CommandAuthority>,
    subscriber_cfgs: BTreeMap<String, SubscriberCfg>,
}

fn fresh(status: StatusTriad, mode: ApplyMode) -> StatusTriad {
    match mode {
        ApplyMode::Authoritative => StatusTriad::new(status.setting_status),
        ApplyMode::Replica => status,
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from persisted rows. Rows that break the tree invariants are
    /// skipped and returned with the reason.
    pub fn from_records(
        mut records: Vec<EntityRecord>,
        mode: ApplyMode,
    ) -> (Self, Vec<(EntityKey, StoreError)>) {
        records.sort_by_key(|r| r.kind());
        let mut store = Self::new();
        let mut rejected = Vec::new();
        for record in records {
            let key = record.key();
            if let Err(e) = store.apply(EntityDelta::create(record), mode) {
                warn!("[store] skipping persisted row {}: {}", key, e);
                rejected.push((key, e));
            }
        }
        (store, rejected)
    }

    pub fn apply(&mut self, delta: EntityDelta, mode: ApplyMode) -> Result<Vec<EntityDelta>, StoreError> {
        let applied = match delta.action {
            Action::Create => self.create(delta.record, mode)?,
            Action::Modify => {
                let target = delta.target_key();
                if target.kind() != delta.record.kind() {
                    return Err(StoreError::InvalidDelta(format!(
                        "old key {} does not match a {} record",
                        target,
                        delta.record.kind()
                    )));
                }
                self.modify(target, delta.record, mode)?
            }
            Action::Delete => self.delete(&delta.target_key())?,
        };
        debug!("[store] applied {:?} producing {} delta(s)", delta.action, applied.len());
        Ok(applied)
    }

    fn create(&mut self, record: EntityRecord, mode: ApplyMode) -> Result<Vec<EntityDelta>, StoreError> {
        let key = record.key();
        let stored = match record {
            EntityRecord::Manager(mut m) => {
                if self.managers.contains_key(&m.manager_id) {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                m.status = fresh(m.status, mode);
                self.managers.insert(
                    m.manager_id.clone(),
                    ManagerNode {
                        info: m.clone(),
                        connectors: BTreeMap::new(),
                    },
                );
                EntityRecord::Manager(m)
            }
            EntityRecord::Connector(mut c) => {
                let node = self
                    .managers
                    .get_mut(&c.manager_id)
                    .ok_or_else(|| StoreError::MissingParent(format!("MANAGER({})", c.manager_id)))?;
                if node.connectors.contains_key(&c.connector_id) {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                c.status = fresh(c.status, mode);
                node.connectors.insert(
                    c.connector_id.clone(),
                    ConnectorNode {
                        info: c.clone(),
                        connections: BTreeMap::new(),
                    },
                );
                EntityRecord::Connector(c)
            }
            EntityRecord::Connection(mut c) => {
                if self.connection_index.contains_key(&c.sequence) {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                let parent = self
                    .connector_node_mut(&c.manager_id, &c.connector_id)
                    .ok_or_else(|| {
                        StoreError::MissingParent(format!("CONNECTOR({}/{})", c.manager_id, c.connector_id))
                    })?;
                if mode == ApplyMode::Authoritative {
                    c.cur_status = CurStatus::Stop;
                    c.request_status = RequestStatus::WaitNo;
                }
                parent.connections.insert(c.sequence, c.clone());
                self.connection_index
                    .insert(c.sequence, (c.manager_id.clone(), c.connector_id.clone()));
                EntityRecord::Connection(c)
            }
            EntityRecord::DataHandler(mut d) => {
                if self.data_handlers.contains_key(&d.data_handler_id) {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                d.status = fresh(d.status, mode);
                self.data_handlers.insert(d.data_handler_id.clone(), d.clone());
                EntityRecord::DataHandler(d)
            }
            EntityRecord::SubProc(mut s) => {
                if self.sub_procs.contains_key(&s.sub_proc_id) {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                s.status = fresh(s.status, mode);
                self.sub_procs.insert(s.sub_proc_id.clone(), s.clone());
                EntityRecord::SubProc(s)
            }
            EntityRecord::CommandAuthority(mut a) => {
                if self.authorities.contains_key(&a.name) {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                a.status = fresh(a.status, mode);
                self.authorities.insert(a.name.clone(), a.clone());
                EntityRecord::CommandAuthority(a)
            }
            EntityRecord::SubscriberCfg(s) => {
                if self.subscriber_cfgs.contains_key(&s.name) {
                    return Err(StoreError::AlreadyExists(key.to_string()));
                }
                self.subscriber_cfgs.insert(s.name.clone(), s.clone());
                EntityRecord::SubscriberCfg(s)
            }
        };
        Ok(vec![EntityDelta::create(stored)])
    }

    fn modify(
        &mut self,
        target: EntityKey,
        record: EntityRecord,
        mode: ApplyMode,
    ) -> Result<Vec<EntityDelta>, StoreError> {
        let new_key = record.key();
        let renamed = new_key != target;
        if renamed && self.record(&new_key).is_some() {
            return Err(StoreError::AlreadyExists(new_key.to_string()));
        }
        let mut out = Vec::new();
        match (target, record) {
            (EntityKey::Manager { manager_id }, EntityRecord::Manager(mut m)) => {
                let mut node = self
                    .managers
                    .remove(&manager_id)
                    .ok_or_else(|| StoreError::NotFound(format!("MANAGER({})", manager_id)))?;
                m.status = match mode {
                    ApplyMode::Replica => m.status,
                    ApplyMode::Authoritative if renamed => {
                        let mut status = node.info.status;
                        status.lost();
                        status
                    }
                    ApplyMode::Authoritative => node.info.status,
                };
                node.info = m.clone();
                if renamed {
                    for connector in node.connectors.values_mut() {
                        let old = connector.info.clone();
                        connector.info.manager_id = m.manager_id.clone();
                        out.push(moved_delta(EntityRecord::Connector(connector.info.clone()), EntityRecord::Connector(old)));
                        for connection in connector.connections.values_mut() {
                            let old = connection.clone();
                            connection.manager_id = m.manager_id.clone();
                            self.connection_index.insert(
                                connection.sequence,
                                (m.manager_id.clone(), connection.connector_id.clone()),
                            );
                            out.push(moved_delta(
                                EntityRecord::Connection(connection.clone()),
                                EntityRecord::Connection(old),
                            ));
                        }
                    }
                }
                self.managers.insert(m.manager_id.clone(), node);
                let mut delta = EntityDelta::modify(EntityRecord::Manager(m));
                if renamed {
                    delta.old_key = Some(EntityKey::Manager { manager_id });
                }
                out.insert(0, delta);
            }
            (
                EntityKey::Connector {
                    manager_id,
                    connector_id,
                },
                EntityRecord::Connector(mut c),
            ) => {
                if self.connector_node(&manager_id, &connector_id).is_none() {
                    return Err(StoreError::NotFound(format!(
                        "CONNECTOR({}/{})",
                        manager_id, connector_id
                    )));
                }
                if !self.managers.contains_key(&c.manager_id) {
                    return Err(StoreError::MissingParent(format!("MANAGER({})", c.manager_id)));
                }
                let mut node = match self
                    .managers
                    .get_mut(&manager_id)
                    .and_then(|m| m.connectors.remove(&connector_id))
                {
                    Some(node) => node,
                    None => return Err(StoreError::NotFound(connector_id)),
                };
                c.status = match mode {
                    ApplyMode::Replica => c.status,
                    ApplyMode::Authoritative if renamed => {
                        let mut status = node.info.status;
                        status.lost();
                        status
                    }
                    ApplyMode::Authoritative => node.info.status,
                };
                node.info = c.clone();
                if renamed {
                    for connection in node.connections.values_mut() {
                        let old = connection.clone();
                        connection.manager_id = c.manager_id.clone();
                        connection.connector_id = c.connector_id.clone();
                        self.connection_index.insert(
                            connection.sequence,
                            (c.manager_id.clone(), c.connector_id.clone()),
                        );
                        out.push(moved_delta(
                            EntityRecord::Connection(connection.clone()),
                            EntityRecord::Connection(old),
                        ));
                    }
                }
                if let Some(parent) = self.managers.get_mut(&c.manager_id) {
                    parent.connectors.insert(c.connector_id.clone(), node);
                }
                let mut delta = EntityDelta::modify(EntityRecord::Connector(c));
                if renamed {
                    delta.old_key = Some(EntityKey::Connector {
                        manager_id,
                        connector_id,
                    });
                }
                out.insert(0, delta);
            }
            (EntityKey::Connection { sequence }, EntityRecord::Connection(mut c)) => {
                let (old_manager, old_connector) = self
                    .connection_index
                    .get(&sequence)
                    .cloned()
                    .ok_or_else(|| StoreError::NotFound(format!("CONNECTION({})", sequence)))?;
                if self.connector_node(&c.manager_id, &c.connector_id).is_none() {
                    return Err(StoreError::MissingParent(format!(
                        "CONNECTOR({}/{})",
                        c.manager_id, c.connector_id
                    )));
                }
                let previous = self
                    .connector_node_mut(&old_manager, &old_connector)
                    .and_then(|n| n.connections.remove(&sequence))
                    .ok_or_else(|| StoreError::NotFound(format!("CONNECTION({})", sequence)))?;
                let moved = renamed
                    || previous.manager_id != c.manager_id
                    || previous.connector_id != c.connector_id;
                if mode == ApplyMode::Authoritative {
                    if moved {
                        c.cur_status = CurStatus::Stop;
                        c.request_status = RequestStatus::WaitNo;
                    } else {
                        c.cur_status = previous.cur_status;
                        c.request_status = previous.request_status;
                    }
                }
                self.connection_index.remove(&sequence);
                self.connection_index
                    .insert(c.sequence, (c.manager_id.clone(), c.connector_id.clone()));
                if let Some(parent) = self.connector_node_mut(&c.manager_id, &c.connector_id) {
                    parent.connections.insert(c.sequence, c.clone());
                }
                let mut delta = EntityDelta::modify(EntityRecord::Connection(c));
                if moved {
                    delta.old_key = Some(EntityKey::Connection { sequence });
                }
                out.push(delta);
            }
            (EntityKey::DataHandler { data_handler_id }, EntityRecord::DataHandler(mut d)) => {
                let previous = self
                    .data_handlers
                    .remove(&data_handler_id)
                    .ok_or_else(|| StoreError::NotFound(format!("DATAHANDLER({})", data_handler_id)))?;
                d.status = carried(previous.status, d.status, mode, renamed);
                self.data_handlers.insert(d.data_handler_id.clone(), d.clone());
                out.push(with_old_key(
                    EntityRecord::DataHandler(d),
                    renamed.then_some(EntityKey::DataHandler { data_handler_id }),
                ));
            }
            (EntityKey::SubProc { sub_proc_id }, EntityRecord::SubProc(mut s)) => {
                let previous = self
                    .sub_procs
                    .remove(&sub_proc_id)
                    .ok_or_else(|| StoreError::NotFound(format!("SUBPROC({})", sub_proc_id)))?;
                s.status = carried(previous.status, s.status, mode, renamed);
                self.sub_procs.insert(s.sub_proc_id.clone(), s.clone());
                out.push(with_old_key(
                    EntityRecord::SubProc(s),
                    renamed.then_some(EntityKey::SubProc { sub_proc_id }),
                ));
            }
            (EntityKey::CommandAuthority { name }, EntityRecord::CommandAuthority(mut a)) => {
                let previous = self
                    .authorities
                    .remove(&name)
                    .ok_or_else(|| StoreError::NotFound(format!("COMMAND_AUTHORITY({})", name)))?;
                a.status = carried(previous.status, a.status, mode, renamed);
                self.authorities.insert(a.name.clone(), a.clone());
                out.push(with_old_key(
                    EntityRecord::CommandAuthority(a),
                    renamed.then_some(EntityKey::CommandAuthority { name }),
                ));
            }
            (EntityKey::SubscriberCfg { name }, EntityRecord::SubscriberCfg(s)) => {
                self.subscriber_cfgs
                    .remove(&name)
                    .ok_or_else(|| StoreError::NotFound(format!("SESSION_CFG({})", name)))?;
                self.subscriber_cfgs.insert(s.name.clone(), s.clone());
                out.push(with_old_key(
                    EntityRecord::SubscriberCfg(s),
                    renamed.then_some(EntityKey::SubscriberCfg { name }),
                ));
            }
            (target, record) => {
                return Err(StoreError::InvalidDelta(format!(
                    "{} cannot be modified with a {} record",
                    target,
                    record.kind()
                )))
            }
        }
        Ok(out)
    }

    fn delete(&mut self, key: &EntityKey) -> Result<Vec<EntityDelta>, StoreError> {
        let not_found = || StoreError::NotFound(key.to_string());
        let out = match key {
            EntityKey::Manager { manager_id } => {
                let node = self.managers.get(manager_id).ok_or_else(not_found)?;
                if !node.connectors.is_empty() {
                    return Err(StoreError::HasChildren(key.to_string()));
                }
                let node = self.managers.remove(manager_id).ok_or_else(not_found)?;
                vec![EntityDelta::delete(EntityRecord::Manager(node.info))]
            }
            EntityKey::Connector {
                manager_id,
                connector_id,
            } => {
                let node = self
                    .managers
                    .get_mut(manager_id)
                    .and_then(|m| m.connectors.remove(connector_id))
                    .ok_or_else(not_found)?;
                let mut out = Vec::new();
                for (sequence, connection) in node.connections {
                    self.connection_index.remove(&sequence);
                    out.push(EntityDelta::delete(EntityRecord::Connection(connection)));
                }
                out.push(EntityDelta::delete(EntityRecord::Connector(node.info)));
                out
            }
            EntityKey::Connection { sequence } => {
                let (manager_id, connector_id) =
                    self.connection_index.remove(sequence).ok_or_else(not_found)?;
                let connection = self
                    .connector_node_mut(&manager_id, &connector_id)
                    .and_then(|n| n.connections.remove(sequence))
                    .ok_or_else(not_found)?;
                vec![EntityDelta::delete(EntityRecord::Connection(connection))]
            }
            EntityKey::DataHandler { data_handler_id } => {
                let d = self.data_handlers.remove(data_handler_id).ok_or_else(not_found)?;
                vec![EntityDelta::delete(EntityRecord::DataHandler(d))]
            }
            EntityKey::SubProc { sub_proc_id } => {
                let s = self.sub_procs.remove(sub_proc_id).ok_or_else(not_found)?;
                vec![EntityDelta::delete(EntityRecord::SubProc(s))]
            }
            EntityKey::CommandAuthority { name } => {
                let a = self.authorities.remove(name).ok_or_else(not_found)?;
                vec![EntityDelta::delete(EntityRecord::CommandAuthority(a))]
            }
            EntityKey::SubscriberCfg { name } => {
                let s = self.subscriber_cfgs.remove(name).ok_or_else(not_found)?;
                vec![EntityDelta::delete(EntityRecord::SubscriberCfg(s))]
            }
        };
        Ok(out)
    }

    /// Accepts a start/stop request on a controllable row.
    pub fn request_control(
        &mut self,
        key: &EntityKey,
        desired: SettingStatus,
    ) -> Result<EntityRecord, StoreError> {
        if let EntityKey::Connection { sequence } = key {
            let connection = self
                .connection_mut(*sequence)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            if connection.request_status != RequestStatus::WaitNo {
                return Err(StoreError::RequestPending(key.to_string()));
            }
            connection.request_status = match desired {
                SettingStatus::Start => RequestStatus::WaitStart,
                SettingStatus::Stop => RequestStatus::WaitStop,
            };
            return Ok(EntityRecord::Connection(connection.clone()));
        }
        let what = key.to_string();
        self.triad_mut(key)?.request(desired, &what)?;
        self.require(key)
    }

    /// Status report from the controlled process.
    pub fn confirm_status(&mut self, key: &EntityKey, reported: CurStatus) -> Result<EntityRecord, StoreError> {
        if let EntityKey::Connection { sequence } = key {
            let connection = self
                .connection_mut(*sequence)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            connection.cur_status = reported;
            connection.request_status = RequestStatus::WaitNo;
            return Ok(EntityRecord::Connection(connection.clone()));
        }
        self.triad_mut(key)?.confirm(reported);
        self.require(key)
    }

    /// Timeout or disconnect of a single row; the setting survives.
    pub fn mark_lost(&mut self, key: &EntityKey) -> Result<EntityRecord, StoreError> {
        if let EntityKey::Connection { sequence } = key {
            let connection = self
                .connection_mut(*sequence)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            connection.cur_status = CurStatus::Undefined;
            connection.request_status = RequestStatus::WaitNo;
            return Ok(EntityRecord::Connection(connection.clone()));
        }
        self.triad_mut(key)?.lost();
        self.require(key)
    }

    /// Startup timed out: `SettingStatus <- STOP` as well.
    pub fn abandon_start(&mut self, key: &EntityKey) -> Result<EntityRecord, StoreError> {
        self.triad_mut(key)?.abandon();
        self.require(key)
    }

    /// A Manager went away: itself and its Connectors stop, its Connections become UNDEFINED.
    pub fn manager_lost(&mut self, manager_id: &str) -> Vec<EntityRecord> {
        let node = match self.managers.get_mut(manager_id) {
            Some(node) => node,
            None => return Vec::new(),
        };
        node.info.status.lost();
        let mut out = vec![EntityRecord::Manager(node.info.clone())];
        for connector in node.connectors.values_mut() {
            connector.info.status.lost();
            out.push(EntityRecord::Connector(connector.info.clone()));
            for connection in connector.connections.values_mut() {
                connection.cur_status = CurStatus::Undefined;
                connection.request_status = RequestStatus::WaitNo;
                out.push(EntityRecord::Connection(connection.clone()));
            }
        }
        out
    }

    fn triad_mut(&mut self, key: &EntityKey) -> Result<&mut StatusTriad, StoreError> {
        let not_found = || StoreError::NotFound(key.to_string());
        match key {
            EntityKey::Manager { manager_id } => self
                .managers
                .get_mut(manager_id)
                .map(|n| &mut n.info.status)
                .ok_or_else(not_found),
            EntityKey::Connector {
                manager_id,
                connector_id,
            } => self
                .connector_node_mut(manager_id, connector_id)
                .map(|n| &mut n.info.status)
                .ok_or_else(not_found),
            EntityKey::DataHandler { data_handler_id } => self
                .data_handlers
                .get_mut(data_handler_id)
                .map(|d| &mut d.status)
                .ok_or_else(not_found),
            EntityKey::SubProc { sub_proc_id } => self
                .sub_procs
                .get_mut(sub_proc_id)
                .map(|s| &mut s.status)
                .ok_or_else(not_found),
            EntityKey::CommandAuthority { name } => self
                .authorities
                .get_mut(name)
                .map(|a| &mut a.status)
                .ok_or_else(not_found),
            EntityKey::Connection { .. } | EntityKey::SubscriberCfg { .. } => Err(
                StoreError::InvalidDelta(format!("{} has no status triad", key)),
            ),
        }
    }

    fn require(&self, key: &EntityKey) -> Result<EntityRecord, StoreError> {
        self.record(key).ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn connector_node(&self, manager_id: &str, connector_id: &str) -> Option<&ConnectorNode> {
        self.managers.get(manager_id)?.connectors.get(connector_id)
    }

    fn connector_node_mut(&mut self, manager_id: &str, connector_id: &str) -> Option<&mut ConnectorNode> {
        self.managers.get_mut(manager_id)?.connectors.get_mut(connector_id)
    }

    fn connection_mut(&mut self, sequence: u32) -> Option<&mut Connection> {
        let (manager_id, connector_id) = self.connection_index.get(&sequence)?.clone();
        self.connector_node_mut(&manager_id, &connector_id)?
            .connections
            .get_mut(&sequence)
    }

    pub fn record(&self, key: &EntityKey) -> Option<EntityRecord> {
        match key {
            EntityKey::Manager { manager_id } => self.manager(manager_id).cloned().map(EntityRecord::Manager),
            EntityKey::Connector {
                manager_id,
                connector_id,
            } => self
                .connector(manager_id, connector_id)
                .cloned()
                .map(EntityRecord::Connector),
            EntityKey::Connection { sequence } => self.connection(*sequence).cloned().map(EntityRecord::Connection),
            EntityKey::DataHandler { data_handler_id } => self
                .data_handler(data_handler_id)
                .cloned()
                .map(EntityRecord::DataHandler),
            EntityKey::SubProc { sub_proc_id } => self.sub_proc(sub_proc_id).cloned().map(EntityRecord::SubProc),
            EntityKey::CommandAuthority { name } => {
                self.authority(name).cloned().map(EntityRecord::CommandAuthority)
            }
            EntityKey::SubscriberCfg { name } => {
                self.subscriber_cfg(name).cloned().map(EntityRecord::SubscriberCfg)
            }
        }
    }

    pub fn manager(&self, manager_id: &str) -> Option<&Manager> {
        self.managers.get(manager_id).map(|n| &n.info)
    }

    pub fn managers(&self) -> impl Iterator<Item = &Manager> {
        self.managers.values().map(|n| &n.info)
    }

    pub fn connector(&self, manager_id: &str, connector_id: &str) -> Option<&Connector> {
        self.connector_node(manager_id, connector_id).map(|n| &n.info)
    }

    pub fn connectors_of(&self, manager_id: &str) -> Vec<&Connector> {
        self.managers
            .get(manager_id)
            .map(|m| m.connectors.values().map(|c| &c.info).collect())
            .unwrap_or_default()
    }

    pub fn connections_of(&self, manager_id: &str, connector_id: &str) -> Vec<&Connection> {
        self.connector_node(manager_id, connector_id)
            .map(|c| c.connections.values().collect())
            .unwrap_or_default()
    }

    pub fn connections_of_manager(&self, manager_id: &str) -> Vec<&Connection> {
        self.managers
            .get(manager_id)
            .map(|m| {
                m.connectors
                    .values()
                    .flat_map(|c| c.connections.values())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn connection(&self, sequence: u32) -> Option<&Connection> {
        let (manager_id, connector_id) = self.connection_index.get(&sequence)?;
        self.connector_node(manager_id, connector_id)?.connections.get(&sequence)
    }

    pub fn data_handler(&self, id: &str) -> Option<&DataHandler> {
        self.data_handlers.get(id)
    }

    pub fn data_handlers(&self) -> impl Iterator<Item = &DataHandler> {
        self.data_handlers.values()
    }

    pub fn sub_proc(&self, id: &str) -> Option<&SubProc> {
        self.sub_procs.get(id)
    }

    pub fn sub_procs(&self) -> impl Iterator<Item = &SubProc> {
        self.sub_procs.values()
    }

    pub fn authority(&self, name: &str) -> Option<&CommandAuthority> {
        self.authorities.get(name)
    }

    pub fn subscriber_cfg(&self, name: &str) -> Option<&SubscriberCfg> {
        self.subscriber_cfgs.get(name)
    }

    pub fn records(&self, kind: EntityKind) -> Vec<EntityRecord> {
        match kind {
            EntityKind::Manager => self.managers().cloned().map(EntityRecord::Manager).collect(),
            EntityKind::Connector => self
                .managers
                .values()
                .flat_map(|m| m.connectors.values())
                .map(|c| EntityRecord::Connector(c.info.clone()))
                .collect(),
            EntityKind::Connection => self
                .managers
                .values()
                .flat_map(|m| m.connectors.values())
                .flat_map(|c| c.connections.values())
                .cloned()
                .map(EntityRecord::Connection)
                .collect(),
            EntityKind::DataHandler => self.data_handlers.values().cloned().map(EntityRecord::DataHandler).collect(),
            EntityKind::SubProc => self.sub_procs.values().cloned().map(EntityRecord::SubProc).collect(),
            EntityKind::CommandAuthority => self
                .authorities
                .values()
                .cloned()
                .map(EntityRecord::CommandAuthority)
                .collect(),
            EntityKind::SubscriberCfg => self
                .subscriber_cfgs
                .values()
                .cloned()
                .map(EntityRecord::SubscriberCfg)
                .collect(),
        }
    }

    /// Every row a GUI with `mask` is entitled to, parents first.
    pub fn snapshot(&self, mask: SubscriptionMask) -> Vec<EntityRecord> {
        EntityKind::ALL
            .iter()
            .filter(|kind| kind.subscribers().intersects(mask))
            .flat_map(|kind| self.records(*kind))
            .collect()
    }

    pub fn all_records(&self) -> Vec<EntityRecord> {
        EntityKind::ALL.iter().flat_map(|kind| self.records(*kind)).collect()
    }

    /// Deltas that turn `self` into `next`: deletes children first, creates parents first.
    pub fn diff(&self, next: &EntityStore) -> Vec<EntityDelta> {
        let mut deletes = Vec::new();
        let mut upserts = Vec::new();
        for kind in EntityKind::ALL.iter().rev() {
            for record in self.records(*kind) {
                if next.record(&record.key()).is_none() {
                    deletes.push(EntityDelta::delete(record));
                }
            }
        }
        for kind in EntityKind::ALL {
            for record in next.records(kind) {
                match self.record(&record.key()) {
                    None => upserts.push(EntityDelta::create(record)),
                    Some(current) if current != record => upserts.push(EntityDelta::modify(record)),
                    Some(_) => {}
                }
            }
        }
        deletes.extend(upserts);
        deletes
    }

    /// Checks the tree invariants; used by tests and after replica rebuilds.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (manager_id, node) in &self.managers {
            if &node.info.manager_id != manager_id {
                return Err(format!("manager {} stored under {}", node.info.manager_id, manager_id));
            }
            for (connector_id, connector) in &node.connectors {
                if &connector.info.manager_id != manager_id || &connector.info.connector_id != connector_id {
                    return Err(format!("connector {} has a stale parent", connector_id));
                }
                for (sequence, connection) in &connector.connections {
                    if &connection.manager_id != manager_id || &connection.connector_id != connector_id {
                        return Err(format!("connection {} has a stale parent", sequence));
                    }
                    match self.connection_index.get(sequence) {
                        Some((m, c)) if m == manager_id && c == connector_id => {}
                        _ => return Err(format!("connection {} missing from index", sequence)),
                    }
                }
            }
        }
        let indexed = self
            .managers
            .values()
            .flat_map(|m| m.connectors.values())
            .map(|c| c.connections.len())
            .sum::<usize>();
        if indexed != self.connection_index.len() {
            return Err("connection index out of sync".to_string());
        }
        Ok(())
    }
}

fn carried(previous: StatusTriad, incoming: StatusTriad, mode: ApplyMode, renamed: bool) -> StatusTriad {
    match mode {
        ApplyMode::Replica => incoming,
        ApplyMode::Authoritative if renamed => {
            let mut status = previous;
            status.lost();
            status
        }
        ApplyMode::Authoritative => previous,
    }
}

fn with_old_key(record: EntityRecord, old_key: Option<EntityKey>) -> EntityDelta {
    let mut delta = EntityDelta::modify(record);
    delta.old_key = old_key;
    delta
}

fn moved_delta(record: EntityRecord, previous: EntityRecord) -> EntityDelta {
    with_old_key(record, Some(previous.key()))
}
