use serde::{Deserialize, Serialize};
use std::fmt;

/// Rotation period of log files, shared by the server and the children it launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default)]
#[serde(rename_all = "UPPERCASE")]
#[value(rename_all = "UPPERCASE")]
pub enum LogCycle {
    Hour,
    #[default]
    Day,
}

impl fmt::Display for LogCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogCycle::Hour => write!(f, "HOUR"),
            LogCycle::Day => write!(f, "DAY"),
        }
    }
}

/// Role of this server inside the Active/Standby pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum ServerRole {
    #[default]
    Active,
    Standby,
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Active => write!(f, "active"),
            ServerRole::Standby => write!(f, "standby"),
        }
    }
}

fn default_start_dir() -> String {
    "NAA".to_string()
}

fn default_alive_check_maxcount() -> u32 {
    3
}

fn default_alive_check_interval() -> u64 {
    10
}

/// `[COMMON]` table shared by every process of the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonSection {
    #[serde(default = "default_start_dir")]
    pub netadapter_start_dir_name: String,
    #[serde(default = "default_alive_check_maxcount")]
    pub alive_check_maxcount: u32,
    /// Seconds between two heartbeats.
    #[serde(default = "default_alive_check_interval")]
    pub alive_check_interval: u64,
}

impl Default for CommonSection {
    fn default() -> Self {
        Self {
            netadapter_start_dir_name: default_start_dir(),
            alive_check_maxcount: default_alive_check_maxcount(),
            alive_check_interval: default_alive_check_interval(),
        }
    }
}

fn default_server_name() -> String {
    "ascii_server".to_string()
}

fn default_db_path() -> String {
    "netadapter.sqlite3".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_external_port() -> u16 {
    8280
}

fn default_manager_port() -> u16 {
    8281
}

fn default_datahandler_port() -> u16 {
    8282
}

fn default_subproc_port() -> u16 {
    8283
}

fn default_gui_port() -> u16 {
    8284
}

fn default_sims_port() -> u16 {
    8285
}

fn default_standby_port() -> u16 {
    8287
}

fn default_router_info_port() -> u16 {
    8288
}

fn default_max_data_buf_size() -> usize {
    4 * 1024 * 1024
}

fn default_mmc_response_timeout() -> u64 {
    60
}

fn default_mmc_result_horizon() -> u64 {
    3 * 60 * 60
}

fn default_remote_bin_dir() -> String {
    "NAA/Bin".to_string()
}

/// `[ASCII_SERVER]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsciiServerSection {
    #[serde(default = "default_server_name")]
    pub name: String,
    /// SQLite file, relative paths resolve under `System/`.
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Full connection url, takes precedence over `db_path` when set.
    #[serde(default)]
    pub db_url: Option<String>,
    #[serde(default)]
    pub db_user: Option<String>,
    #[serde(default)]
    pub db_password: Option<String>,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_external_port")]
    pub external_listen_port: u16,
    #[serde(default = "default_manager_port")]
    pub manager_listen_port: u16,
    #[serde(default = "default_datahandler_port")]
    pub datahandler_listen_port: u16,
    #[serde(default = "default_subproc_port")]
    pub subproc_listen_port: u16,
    #[serde(default = "default_gui_port")]
    pub gui_listen_port: u16,
    #[serde(default = "default_sims_port")]
    pub sims_listen_port: u16,
    #[serde(default = "default_standby_port")]
    pub standby_listen_port: u16,
    #[serde(default = "default_router_info_port")]
    pub router_info_listen_port: u16,
    #[serde(default)]
    pub active_server_ip: Option<String>,
    #[serde(default)]
    pub active_server_port: Option<u16>,
    #[serde(default = "default_max_data_buf_size")]
    pub max_data_buf_size: usize,
    #[serde(default = "default_mmc_response_timeout")]
    pub mmc_response_timeout_secs: u64,
    #[serde(default = "default_mmc_result_horizon")]
    pub mmc_result_horizon_secs: u64,
    /// Directory holding child binaries on remote hosts, relative to the remote home.
    #[serde(default = "default_remote_bin_dir")]
    pub remote_bin_dir: String,
}

impl Default for AsciiServerSection {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            db_path: default_db_path(),
            db_url: None,
            db_user: None,
            db_password: None,
            bind_address: default_bind_address(),
            external_listen_port: default_external_port(),
            manager_listen_port: default_manager_port(),
            datahandler_listen_port: default_datahandler_port(),
            subproc_listen_port: default_subproc_port(),
            gui_listen_port: default_gui_port(),
            sims_listen_port: default_sims_port(),
            standby_listen_port: default_standby_port(),
            router_info_listen_port: default_router_info_port(),
            active_server_ip: None,
            active_server_port: None,
            max_data_buf_size: default_max_data_buf_size(),
            mmc_response_timeout_secs: default_mmc_response_timeout(),
            mmc_result_horizon_secs: default_mmc_result_horizon(),
            remote_bin_dir: default_remote_bin_dir(),
        }
    }
}
