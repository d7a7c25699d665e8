//! JSON bodies of the packets exchanged with peers, one struct per message id.

use super::msg_id::*;
use super::session_type::SessionType;
use crate::configuration::types::{LogCycle, ServerRole};
use crate::entity_store::types::{
    Action, Connection, Connector, CurStatus, EntityKey, EntityKind, EntityRecord, PortType,
    ProtocolType, SettingStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest result chunk slot on the wire, terminator included.
pub const MAX_RESULT_MSG: usize = 4096;

/// `SESSION_IDENTIFY` peer -> server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionIdentify {
    pub session_type: SessionType,
    pub name: String,
}

/// `SESSION_IDENTIFY_RES` server -> peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifyResult {
    pub result: u8,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessType {
    AsciiServer,
    AsciiManager,
    Connector,
    Connection,
    AsciiDataHandler,
    AsciiSubProc,
}

/// `PROCESS_INFO` child -> server, `AS_PROCESS_INFO` server -> GUI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub process_type: ProcessType,
    #[serde(default)]
    pub manager_id: String,
    pub id: String,
    #[serde(default)]
    pub sequence: Option<u32>,
    pub status: CurStatus,
    #[serde(default)]
    pub pid: Option<u32>,
}

/// `CMD_PROC_INIT` server -> child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcInit {
    pub id: String,
    pub server_name: String,
    pub log_cycle: LogCycle,
    pub alive_interval_secs: u64,
    #[serde(default)]
    pub connectors: Vec<Connector>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// `CMD_OPEN_PORT` server -> manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPort {
    pub manager_id: String,
    pub connector_id: String,
    pub ne_name: String,
    pub sequence: u32,
    pub port_no: u16,
    pub protocol_type: ProtocolType,
    pub port_type: PortType,
    pub command_port_flag: bool,
}

impl OpenPort {
    pub fn new(connector: &Connector, connection: &Connection) -> Self {
        Self {
            manager_id: connection.manager_id.clone(),
            connector_id: connection.connector_id.clone(),
            ne_name: connector.ne_name.clone(),
            sequence: connection.sequence,
            port_no: connection.port_no,
            protocol_type: connection.protocol_type,
            port_type: connection.port_type,
            command_port_flag: connection.command_port_flag,
        }
    }
}

/// `PROC_CONTROL` GUI -> server -> manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcControl {
    pub process_type: ProcessType,
    #[serde(default)]
    pub manager_id: String,
    #[serde(default)]
    pub id: String,
    pub status: SettingStatus,
}

/// `SESSION_CONTROL` GUI -> server -> manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionControl {
    pub manager_id: String,
    pub connector_id: String,
    pub sequence: u32,
    pub status: SettingStatus,
}

/// `CMD_*_RULE_DOWN`; the server stamps a transaction before forwarding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDown {
    #[serde(default)]
    pub transaction: Option<Uuid>,
    pub rule_id: String,
    pub content: String,
}

/// `CMD_*_RULE_DOWN_ACK`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDownAck {
    #[serde(default)]
    pub transaction: Option<Uuid>,
    pub rule_id: String,
    pub result: u8,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmcIdentReq {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmcIdentRes {
    pub result_mode: u8,
    #[serde(default)]
    pub reason: String,
}

/// `AS_MMC_REQ` and its legacy form `AS_MMC_REQ_OLD`, which omits the optional fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmcReq {
    pub id: u32,
    pub ne: String,
    pub mmc: String,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub log_mode: Option<u8>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub reference_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmcReqAck {
    pub id: u32,
    pub result_mode: u8,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultMode {
    #[serde(rename = "R_ERROR")]
    Error,
    #[serde(rename = "R_CONTINUE")]
    Continue,
    #[serde(rename = "R_COMPLETE")]
    Complete,
}

/// `AS_MMC_RES` server -> originator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmcRes {
    pub id: u32,
    pub result_mode: ResultMode,
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmcGenReq {
    pub gid: u64,
    pub ne: String,
    pub mmc: String,
    #[serde(default)]
    pub user_id: String,
}

/// `MMC_GEN_RES`: the expanded commands of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmcGenRes {
    pub gid: u64,
    pub result_mode: ResultMode,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmcPublishReq {
    pub gid: u64,
    pub ne: String,
    pub mmc: String,
    pub priority: u8,
    pub log_mode: u8,
    pub display: String,
    pub user_id: String,
    pub reference_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MmcPublishRes {
    pub gid: u64,
    pub result_mode: ResultMode,
    #[serde(default)]
    pub result: String,
}

/// `AS_*_MODIFY` GUI -> server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityModify<T> {
    pub action: Action,
    #[serde(default)]
    pub old_key: Option<EntityKey>,
    pub record: T,
}

/// `AS_CONNECTION_LIST_MODIFY` GUI -> server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionListModify {
    pub action: Action,
    pub records: Vec<Connection>,
}

/// `AS_*_MODIFY_ACK` server -> GUI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifyAck {
    pub action: Action,
    pub result: u8,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub name: String,
    pub role: ServerRole,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub sessions: usize,
    pub version: String,
}

/// `ASCII_ERROR_MSG`: priority 1 is an operator notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub priority: u8,
    pub message: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogAction {
    #[serde(rename = "LOG_ADD")]
    Add,
    #[serde(rename = "LOG_DEL")]
    Del,
}

/// `AS_LOG_INFO`: a log stream subscription from a GUI, or log lines from a child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogInfo {
    pub name: String,
    pub status: LogAction,
    #[serde(default)]
    pub logs: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterInfoReq {
    #[serde(default)]
    pub ne: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RouterEntry {
    pub ne: String,
    pub manager_id: String,
    pub manager_ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterInfoRes {
    pub entries: Vec<RouterEntry>,
}

/// `AS_DB_SYNC_INFO_REQ`; an empty list asks for every kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbSyncInfoReq {
    #[serde(default)]
    pub kinds: Vec<EntityKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbSyncInfoList {
    pub kind: EntityKind,
    pub records: Vec<EntityRecord>,
}

/// `AS_DB_SYNC_KIND`: closes a sync round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbSyncKind {
    pub kinds: Vec<EntityKind>,
    pub complete: bool,
}

/// `INIT_INFO_START` / `INIT_INFO_END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitInfo {
    pub count: usize,
}

/// Delta stream message id of an entity kind.
pub fn info_msg_id(kind: EntityKind) -> u32 {
    match kind {
        EntityKind::Manager => AS_MANAGER_INFO,
        EntityKind::Connector => AS_CONNECTOR_INFO,
        EntityKind::Connection => AS_CONNECTION_INFO,
        EntityKind::DataHandler => AS_DATA_HANDLER_INFO,
        EntityKind::SubProc => AS_SUB_PROC_INFO,
        EntityKind::CommandAuthority => AS_COMMAND_AUTHORITY_INFO,
        EntityKind::SubscriberCfg => AS_SESSION_CFG,
    }
}

/// Entity kind carried by a delta stream message, if any.
pub fn info_kind(msg_id: u32) -> Option<EntityKind> {
    EntityKind::ALL.into_iter().find(|kind| info_msg_id(*kind) == msg_id)
}

pub fn modify_ack_id(modify_id: u32) -> Option<u32> {
    match modify_id {
        AS_MANAGER_MODIFY => Some(AS_MANAGER_MODIFY_ACK),
        AS_CONNECTOR_MODIFY => Some(AS_CONNECTOR_MODIFY_ACK),
        AS_CONNECTION_MODIFY => Some(AS_CONNECTION_MODIFY_ACK),
        AS_CONNECTION_LIST_MODIFY => Some(AS_CONNECTION_LIST_MODIFY_ACK),
        AS_DATAHANDLER_MODIFY => Some(AS_DATAHANDLER_MODIFY_ACK),
        AS_COMMAND_AUTHORITY_MODIFY => Some(AS_COMMAND_AUTHORITY_MODIFY_ACK),
        AS_SUB_PROC_MODIFY => Some(AS_SUB_PROC_MODIFY_ACK),
        AS_SESSION_CFG_MODIFY => Some(AS_SESSION_CFG_MODIFY_ACK),
        _ => None,
    }
}

pub fn rule_down_ack_id(rule_down_id: u32) -> Option<u32> {
    match rule_down_id {
        CMD_PARSING_RULE_DOWN => Some(CMD_PARSING_RULE_DOWN_ACK),
        CMD_MAPPING_RULE_DOWN => Some(CMD_MAPPING_RULE_DOWN_ACK),
        CMD_SCHEDULER_RULE_DOWN => Some(CMD_SCHEDULER_RULE_DOWN_ACK),
        CMD_COMMAND_RULE_DOWN => Some(CMD_COMMAND_RULE_DOWN_ACK),
        _ => None,
    }
}
