use crate::configuration::types::LogCycle;
use crate::error_handling::types::StoreError;
use crate::protocol::session_type::{SessionType, SubscriptionMask};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SettingStatus {
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CurStatus {
    Start,
    Stop,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    WaitNo,
    WaitStart,
    WaitStop,
}

impl From<SettingStatus> for CurStatus {
    fn from(status: SettingStatus) -> Self {
        match status {
            SettingStatus::Start => CurStatus::Start,
            SettingStatus::Stop => CurStatus::Stop,
        }
    }
}

/// `(SettingStatus, CurStatus, RequestStatus)` carried by every controllable entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTriad {
    pub setting_status: SettingStatus,
    pub cur_status: CurStatus,
    pub request_status: RequestStatus,
}

impl StatusTriad {
    pub fn new(setting_status: SettingStatus) -> Self {
        Self {
            setting_status,
            cur_status: CurStatus::Stop,
            request_status: RequestStatus::WaitNo,
        }
    }

    /// Accepts a control request. Only allowed while no other request is pending.
    pub fn request(&mut self, desired: SettingStatus, what: &str) -> Result<(), StoreError> {
        if self.request_status != RequestStatus::WaitNo {
            return Err(StoreError::RequestPending(what.to_string()));
        }
        self.setting_status = desired;
        self.request_status = match desired {
            SettingStatus::Start => RequestStatus::WaitStart,
            SettingStatus::Stop => RequestStatus::WaitStop,
        };
        Ok(())
    }

    pub fn confirm(&mut self, reported: CurStatus) {
        self.cur_status = reported;
        self.request_status = RequestStatus::WaitNo;
    }

    /// Timeout or disconnect; the setting is kept so the supervisor can restart.
    pub fn lost(&mut self) {
        self.cur_status = CurStatus::Stop;
        self.request_status = RequestStatus::WaitNo;
    }

    /// Startup gave up: the entity stays down until an operator asks again.
    pub fn abandon(&mut self) {
        self.setting_status = SettingStatus::Stop;
        self.lost();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manager {
    pub manager_id: String,
    pub ip: String,
    pub ssh_id: String,
    pub ssh_pass: String,
    #[serde(flatten)]
    pub status: StatusTriad,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub connector_id: String,
    pub manager_id: String,
    pub rule_id: String,
    /// NE fronted by this connector; its command port makes the NE routable.
    pub ne_name: String,
    #[serde(default)]
    pub log_cycle: LogCycle,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub status: StatusTriad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolType {
    Tcp,
    Udp,
    Serial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PortType {
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub sequence: u32,
    pub connector_id: String,
    pub manager_id: String,
    pub port_no: u16,
    pub protocol_type: ProtocolType,
    pub port_type: PortType,
    pub command_port_flag: bool,
    pub cur_status: CurStatus,
    pub request_status: RequestStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataHandler {
    pub data_handler_id: String,
    pub ip: String,
    pub ssh_id: String,
    pub ssh_pass: String,
    #[serde(default)]
    pub log_cycle: LogCycle,
    #[serde(flatten)]
    pub status: StatusTriad,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubProc {
    pub sub_proc_id: String,
    pub ip: String,
    pub ssh_id: String,
    pub ssh_pass: String,
    pub binary: String,
    #[serde(default)]
    pub args: String,
    #[serde(flatten)]
    pub status: StatusTriad,
}

/// Per-identity MMC policy consulted when an external session identifies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAuthority {
    pub name: String,
    pub priority: u8,
    pub max_cmd_queue: usize,
    pub max_session_cnt: usize,
    pub ack_mode: bool,
    #[serde(default)]
    pub log_mode: u8,
    #[serde(flatten)]
    pub status: StatusTriad,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberCfg {
    pub name: String,
    pub session_type: SessionType,
    pub max_data_buf_size: usize,
    pub writerable_check: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Manager,
    Connector,
    Connection,
    DataHandler,
    SubProc,
    CommandAuthority,
    SubscriberCfg,
}

impl EntityKind {
    /// Dependency order: parents before children.
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Manager,
        EntityKind::Connector,
        EntityKind::Connection,
        EntityKind::DataHandler,
        EntityKind::SubProc,
        EntityKind::CommandAuthority,
        EntityKind::SubscriberCfg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Manager => "MANAGER",
            EntityKind::Connector => "CONNECTOR",
            EntityKind::Connection => "CONNECTION",
            EntityKind::DataHandler => "DATA_HANDLER",
            EntityKind::SubProc => "SUB_PROC",
            EntityKind::CommandAuthority => "COMMAND_AUTHORITY",
            EntityKind::SubscriberCfg => "SUBSCRIBER_CFG",
        }
    }

    /// GUI streams that receive deltas of this kind.
    pub fn subscribers(&self) -> SubscriptionMask {
        match self {
            EntityKind::Manager
            | EntityKind::Connector
            | EntityKind::Connection
            | EntityKind::DataHandler
            | EntityKind::SubProc => SubscriptionMask::STATUS.union(SubscriptionMask::CONFIG),
            EntityKind::CommandAuthority | EntityKind::SubscriberCfg => SubscriptionMask::CONFIG,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a row inside the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKey {
    Manager { manager_id: String },
    Connector { manager_id: String, connector_id: String },
    Connection { sequence: u32 },
    DataHandler { data_handler_id: String },
    SubProc { sub_proc_id: String },
    CommandAuthority { name: String },
    SubscriberCfg { name: String },
}

impl EntityKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityKey::Manager { .. } => EntityKind::Manager,
            EntityKey::Connector { .. } => EntityKind::Connector,
            EntityKey::Connection { .. } => EntityKind::Connection,
            EntityKey::DataHandler { .. } => EntityKind::DataHandler,
            EntityKey::SubProc { .. } => EntityKind::SubProc,
            EntityKey::CommandAuthority { .. } => EntityKind::CommandAuthority,
            EntityKey::SubscriberCfg { .. } => EntityKind::SubscriberCfg,
        }
    }

    /// Flat string form used as the persistence key.
    pub fn storage_id(&self) -> String {
        match self {
            EntityKey::Manager { manager_id } => format!("MANAGER:{}", manager_id),
            EntityKey::Connector {
                manager_id,
                connector_id,
            } => format!("CONNECTOR:{}/{}", manager_id, connector_id),
            EntityKey::Connection { sequence } => format!("CONNECTION:{}", sequence),
            EntityKey::DataHandler { data_handler_id } => format!("DATA_HANDLER:{}", data_handler_id),
            EntityKey::SubProc { sub_proc_id } => format!("SUB_PROC:{}", sub_proc_id),
            EntityKey::CommandAuthority { name } => format!("COMMAND_AUTHORITY:{}", name),
            EntityKey::SubscriberCfg { name } => format!("SUBSCRIBER_CFG:{}", name),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Manager { manager_id } => write!(f, "MANAGER({})", manager_id),
            EntityKey::Connector {
                manager_id,
                connector_id,
            } => write!(f, "CONNECTOR({}/{})", manager_id, connector_id),
            EntityKey::Connection { sequence } => write!(f, "CONNECTION({})", sequence),
            EntityKey::DataHandler { data_handler_id } => write!(f, "DATAHANDLER({})", data_handler_id),
            EntityKey::SubProc { sub_proc_id } => write!(f, "SUBPROC({})", sub_proc_id),
            EntityKey::CommandAuthority { name } => write!(f, "COMMAND_AUTHORITY({})", name),
            EntityKey::SubscriberCfg { name } => write!(f, "SESSION_CFG({})", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityRecord {
    Manager(Manager),
    Connector(Connector),
    Connection(Connection),
    DataHandler(DataHandler),
    SubProc(SubProc),
    CommandAuthority(CommandAuthority),
    SubscriberCfg(SubscriberCfg),
}

impl EntityRecord {
    pub fn kind(&self) -> EntityKind {
        self.key().kind()
    }

    pub fn key(&self) -> EntityKey {
        match self {
            EntityRecord::Manager(m) => EntityKey::Manager {
                manager_id: m.manager_id.clone(),
            },
            EntityRecord::Connector(c) => EntityKey::Connector {
                manager_id: c.manager_id.clone(),
                connector_id: c.connector_id.clone(),
            },
            EntityRecord::Connection(c) => EntityKey::Connection {
                sequence: c.sequence,
            },
            EntityRecord::DataHandler(d) => EntityKey::DataHandler {
                data_handler_id: d.data_handler_id.clone(),
            },
            EntityRecord::SubProc(s) => EntityKey::SubProc {
                sub_proc_id: s.sub_proc_id.clone(),
            },
            EntityRecord::CommandAuthority(a) => EntityKey::CommandAuthority {
                name: a.name.clone(),
            },
            EntityRecord::SubscriberCfg(s) => EntityKey::SubscriberCfg {
                name: s.name.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "ACT_CREATE")]
    Create,
    #[serde(rename = "ACT_MODIFY")]
    Modify,
    #[serde(rename = "ACT_DELETE")]
    Delete,
}

/// One mutation of the entity tree. `old_key` locates the row for MODIFY when its
/// identity (or its parent) changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDelta {
    pub action: Action,
    pub record: EntityRecord,
    #[serde(default)]
    pub old_key: Option<EntityKey>,
}

impl EntityDelta {
    pub fn create(record: EntityRecord) -> Self {
        Self {
            action: Action::Create,
            record,
            old_key: None,
        }
    }

    pub fn modify(record: EntityRecord) -> Self {
        Self {
            action: Action::Modify,
            record,
            old_key: None,
        }
    }

    pub fn delete(record: EntityRecord) -> Self {
        Self {
            action: Action::Delete,
            record,
            old_key: None,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.record.kind()
    }

    /// Row the delta applies to before it takes effect.
    pub fn target_key(&self) -> EntityKey {
        self.old_key.clone().unwrap_or_else(|| self.record.key())
    }
}
