//! Numeric message ids carried in the packet header.

pub const SESSION_IDENTIFY: u32 = 1;
pub const SESSION_IDENTIFY_RES: u32 = 2;

pub const CMD_ALIVE_SEND: u32 = 10;
pub const CMD_ALIVE_RECEIVE: u32 = 11;

pub const CMD_PROC_INIT: u32 = 20;
pub const PROC_INIT_END: u32 = 21;
pub const CMD_PROC_TERMINATE: u32 = 22;
pub const PROCESS_INFO: u32 = 23;

pub const CMD_OPEN_PORT: u32 = 30;
pub const PROC_CONTROL: u32 = 31;
pub const SESSION_CONTROL: u32 = 32;

pub const CMD_PARSING_RULE_DOWN: u32 = 40;
pub const CMD_PARSING_RULE_DOWN_ACK: u32 = 41;
pub const CMD_MAPPING_RULE_DOWN: u32 = 42;
pub const CMD_MAPPING_RULE_DOWN_ACK: u32 = 43;
pub const CMD_SCHEDULER_RULE_DOWN: u32 = 44;
pub const CMD_SCHEDULER_RULE_DOWN_ACK: u32 = 45;
pub const CMD_COMMAND_RULE_DOWN: u32 = 46;
pub const CMD_COMMAND_RULE_DOWN_ACK: u32 = 47;

pub const AS_MMC_REQ: u32 = 100;
pub const AS_MMC_REQ_OLD: u32 = 101;
pub const AS_MMC_REQ_ACK: u32 = 102;
pub const AS_MMC_IDENT_REQ: u32 = 103;
pub const AS_MMC_IDENT_RES: u32 = 104;
pub const AS_MMC_RES: u32 = 105;

pub const MMC_GEN_REQ: u32 = 110;
pub const MMC_GEN_RES: u32 = 111;

pub const CMD_MMC_PUBLISH_REQ: u32 = 120;
pub const CMD_MMC_PUBLISH_RES: u32 = 121;

pub const AS_MANAGER_MODIFY: u32 = 200;
pub const AS_MANAGER_MODIFY_ACK: u32 = 201;
pub const AS_CONNECTOR_MODIFY: u32 = 202;
pub const AS_CONNECTOR_MODIFY_ACK: u32 = 203;
pub const AS_CONNECTION_MODIFY: u32 = 204;
pub const AS_CONNECTION_MODIFY_ACK: u32 = 205;
pub const AS_CONNECTION_LIST_MODIFY: u32 = 206;
pub const AS_CONNECTION_LIST_MODIFY_ACK: u32 = 207;
pub const AS_DATAHANDLER_MODIFY: u32 = 208;
pub const AS_DATAHANDLER_MODIFY_ACK: u32 = 209;
pub const AS_COMMAND_AUTHORITY_MODIFY: u32 = 210;
pub const AS_COMMAND_AUTHORITY_MODIFY_ACK: u32 = 211;
pub const AS_SUB_PROC_MODIFY: u32 = 212;
pub const AS_SUB_PROC_MODIFY_ACK: u32 = 213;
pub const AS_SESSION_CFG_MODIFY: u32 = 214;
pub const AS_SESSION_CFG_MODIFY_ACK: u32 = 215;

pub const AS_MANAGER_INFO: u32 = 300;
pub const AS_CONNECTOR_INFO: u32 = 301;
pub const AS_CONNECTION_INFO: u32 = 302;
pub const AS_DATA_HANDLER_INFO: u32 = 303;
pub const AS_COMMAND_AUTHORITY_INFO: u32 = 304;
pub const AS_SUB_PROC_INFO: u32 = 305;
pub const AS_PROCESS_INFO: u32 = 306;
pub const AS_SYSTEM_INFO: u32 = 307;
pub const AS_SESSION_CFG: u32 = 308;
pub const AS_LOG_INFO: u32 = 309;
pub const ASCII_ERROR_MSG: u32 = 310;
pub const AS_ROUTER_INFO_REQ: u32 = 311;
pub const AS_ROUTER_INFO_RES: u32 = 312;
pub const AS_DB_SYNC_INFO_REQ: u32 = 313;
pub const AS_DB_SYNC_INFO_LIST: u32 = 314;
pub const AS_DB_SYNC_KIND: u32 = 315;

pub const INIT_INFO_START: u32 = 400;
pub const INIT_INFO_END: u32 = 401;

/// Human readable name for logs.
pub fn name(msg_id: u32) -> &'static str {
    match msg_id {
        SESSION_IDENTIFY => "SESSION_IDENTIFY",
        SESSION_IDENTIFY_RES => "SESSION_IDENTIFY_RES",
        CMD_ALIVE_SEND => "CMD_ALIVE_SEND",
        CMD_ALIVE_RECEIVE => "CMD_ALIVE_RECEIVE",
        CMD_PROC_INIT => "CMD_PROC_INIT",
        PROC_INIT_END => "PROC_INIT_END",
        CMD_PROC_TERMINATE => "CMD_PROC_TERMINATE",
        PROCESS_INFO => "PROCESS_INFO",
        CMD_OPEN_PORT => "CMD_OPEN_PORT",
        PROC_CONTROL => "PROC_CONTROL",
        SESSION_CONTROL => "SESSION_CONTROL",
        CMD_PARSING_RULE_DOWN => "CMD_PARSING_RULE_DOWN",
        CMD_PARSING_RULE_DOWN_ACK => "CMD_PARSING_RULE_DOWN_ACK",
        CMD_MAPPING_RULE_DOWN => "CMD_MAPPING_RULE_DOWN",
        CMD_MAPPING_RULE_DOWN_ACK => "CMD_MAPPING_RULE_DOWN_ACK",
        CMD_SCHEDULER_RULE_DOWN => "CMD_SCHEDULER_RULE_DOWN",
        CMD_SCHEDULER_RULE_DOWN_ACK => "CMD_SCHEDULER_RULE_DOWN_ACK",
        CMD_COMMAND_RULE_DOWN => "CMD_COMMAND_RULE_DOWN",
        CMD_COMMAND_RULE_DOWN_ACK => "CMD_COMMAND_RULE_DOWN_ACK",
        AS_MMC_REQ => "AS_MMC_REQ",
        AS_MMC_REQ_OLD => "AS_MMC_REQ_OLD",
        AS_MMC_REQ_ACK => "AS_MMC_REQ_ACK",
        AS_MMC_IDENT_REQ => "AS_MMC_IDENT_REQ",
        AS_MMC_IDENT_RES => "AS_MMC_IDENT_RES",
        AS_MMC_RES => "AS_MMC_RES",
        MMC_GEN_REQ => "MMC_GEN_REQ",
        MMC_GEN_RES => "MMC_GEN_RES",
        CMD_MMC_PUBLISH_REQ => "CMD_MMC_PUBLISH_REQ",
        CMD_MMC_PUBLISH_RES => "CMD_MMC_PUBLISH_RES",
        AS_MANAGER_MODIFY => "AS_MANAGER_MODIFY",
        AS_MANAGER_MODIFY_ACK => "AS_MANAGER_MODIFY_ACK",
        AS_CONNECTOR_MODIFY => "AS_CONNECTOR_MODIFY",
        AS_CONNECTOR_MODIFY_ACK => "AS_CONNECTOR_MODIFY_ACK",
        AS_CONNECTION_MODIFY => "AS_CONNECTION_MODIFY",
        AS_CONNECTION_MODIFY_ACK => "AS_CONNECTION_MODIFY_ACK",
        AS_CONNECTION_LIST_MODIFY => "AS_CONNECTION_LIST_MODIFY",
        AS_CONNECTION_LIST_MODIFY_ACK => "AS_CONNECTION_LIST_MODIFY_ACK",
        AS_DATAHANDLER_MODIFY => "AS_DATAHANDLER_MODIFY",
        AS_DATAHANDLER_MODIFY_ACK => "AS_DATAHANDLER_MODIFY_ACK",
        AS_COMMAND_AUTHORITY_MODIFY => "AS_COMMAND_AUTHORITY_MODIFY",
        AS_COMMAND_AUTHORITY_MODIFY_ACK => "AS_COMMAND_AUTHORITY_MODIFY_ACK",
        AS_SUB_PROC_MODIFY => "AS_SUB_PROC_MODIFY",
        AS_SUB_PROC_MODIFY_ACK => "AS_SUB_PROC_MODIFY_ACK",
        AS_SESSION_CFG_MODIFY => "AS_SESSION_CFG_MODIFY",
        AS_SESSION_CFG_MODIFY_ACK => "AS_SESSION_CFG_MODIFY_ACK",
        AS_MANAGER_INFO => "AS_MANAGER_INFO",
        AS_CONNECTOR_INFO => "AS_CONNECTOR_INFO",
        AS_CONNECTION_INFO => "AS_CONNECTION_INFO",
        AS_DATA_HANDLER_INFO => "AS_DATA_HANDLER_INFO",
        AS_COMMAND_AUTHORITY_INFO => "AS_COMMAND_AUTHORITY_INFO",
        AS_SUB_PROC_INFO => "AS_SUB_PROC_INFO",
        AS_PROCESS_INFO => "AS_PROCESS_INFO",
        AS_SYSTEM_INFO => "AS_SYSTEM_INFO",
        AS_SESSION_CFG => "AS_SESSION_CFG",
        AS_LOG_INFO => "AS_LOG_INFO",
        ASCII_ERROR_MSG => "ASCII_ERROR_MSG",
        AS_ROUTER_INFO_REQ => "AS_ROUTER_INFO_REQ",
        AS_ROUTER_INFO_RES => "AS_ROUTER_INFO_RES",
        AS_DB_SYNC_INFO_REQ => "AS_DB_SYNC_INFO_REQ",
        AS_DB_SYNC_INFO_LIST => "AS_DB_SYNC_INFO_LIST",
        AS_DB_SYNC_KIND => "AS_DB_SYNC_KIND",
        INIT_INFO_START => "INIT_INFO_START",
        INIT_INFO_END => "INIT_INFO_END",
        _ => "UNKNOWN",
    }
}
