use super::layout::RuntimeLayout;
use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "NETADAPTER_CONFIG_FILE";

/// Command-line arguments of the `ascii_server` binary.
///
/// Every value is optional and overrides the matching key of the configuration file.
/// `--svrip`/`--svrport` name the Active peer when the server runs as standby, the same
/// way they name the server for the children it launches.
#[derive(Parser, Debug, Clone)]
#[command(name = "ascii_server")]
#[command(about = "Control plane of the network-element adapter")]
#[command(disable_version_flag = true)]
pub struct Args {
    /// Role inside the Active/Standby pair
    #[arg(long = "type", value_enum, default_value_t = ServerRole::Active)]
    pub role: ServerRole,

    /// Address of the Active server (standby role)
    #[arg(long)]
    pub svrip: Option<String>,

    /// Port of the external MMC listener
    #[arg(long)]
    pub portno: Option<u16>,

    /// Process name used in log file names and in the identify handshake
    #[arg(long)]
    pub name: Option<String>,

    /// Standby listener port of the Active server (standby role)
    #[arg(long)]
    pub svrport: Option<u16>,

    /// Log file rotation period
    #[arg(long, value_enum)]
    pub logcycle: Option<LogCycle>,

    /// Print the version and exit
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub ver: bool,
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "COMMON", default)]
    pub common: CommonSection,
    #[serde(rename = "ASCII_SERVER", default)]
    pub ascii_server: AsciiServerSection,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by `NETADAPTER_CONFIG_FILE`, or the defaults when it is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => {
                warn!("[config] {} is not set, using default configuration", CONFIG_ENV);
                Ok(Config::default())
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.common.netadapter_start_dir_name.trim().is_empty() {
            return Err(ConfigError::MissingValue(
                "COMMON.netadapter_start_dir_name".to_string(),
            ));
        }
        if self.common.alive_check_interval == 0 {
            return Err(ConfigError::MissingValue(
                "COMMON.alive_check_interval must be positive".to_string(),
            ));
        }
        let server = &self.ascii_server;
        let ports = [
            ("external_listen_port", server.external_listen_port),
            ("manager_listen_port", server.manager_listen_port),
            ("datahandler_listen_port", server.datahandler_listen_port),
            ("subproc_listen_port", server.subproc_listen_port),
            ("gui_listen_port", server.gui_listen_port),
        ];
        for (key, port) in ports {
            if port == 0 {
                return Err(ConfigError::BadPortsRange(format!(
                    "ASCII_SERVER.{} must not be 0",
                    key
                )));
            }
        }
        Ok(())
    }
}

/// Ports of every TCP listener, in bind order.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenPorts {
    pub external: u16,
    pub manager: u16,
    pub datahandler: u16,
    pub subproc: u16,
    pub gui: u16,
    pub sims: u16,
    pub standby: u16,
    pub router_info: u16,
}

/// Effective settings after merging the configuration file with the command line.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub role: ServerRole,
    pub name: String,
    pub log_cycle: LogCycle,
    pub bind_address: String,
    /// Address handed to launched children as `--svrip`.
    pub advertise_ip: String,
    pub ports: ListenPorts,
    pub active_peer: Option<(String, u16)>,
    pub alive_interval: Duration,
    pub alive_limit: u32,
    pub max_data_buf_size: usize,
    pub mmc_response_timeout: Duration,
    pub mmc_result_horizon: Duration,
    pub db_url: String,
    pub remote_bin_dir: String,
    pub layout: RuntimeLayout,
}

impl ServerSettings {
    pub fn resolve(args: &Args, config: &Config, layout: RuntimeLayout) -> Result<Self, ConfigError> {
        let server = &config.ascii_server;

        let active_peer = match args.role {
            ServerRole::Active => None,
            ServerRole::Standby => {
                let ip = args
                    .svrip
                    .clone()
                    .or_else(|| server.active_server_ip.clone())
                    .ok_or_else(|| {
                        ConfigError::MissingValue(
                            "--svrip or ASCII_SERVER.active_server_ip is required for standby"
                                .to_string(),
                        )
                    })?;
                let port = args
                    .svrport
                    .or(server.active_server_port)
                    .unwrap_or(server.standby_listen_port);
                Some((ip, port))
            }
        };

        let advertise_ip = match server.bind_address.as_str() {
            "0.0.0.0" | "::" | "" => "127.0.0.1".to_string(),
            other => other.to_string(),
        };

        let db_url = match &server.db_url {
            Some(url) => url.clone(),
            None => {
                let path = PathBuf::from(&server.db_path);
                let path = if path.is_absolute() {
                    path
                } else {
                    layout.system_dir.join(path)
                };
                format!("sqlite://{}?mode=rwc", path.display())
            }
        };

        Ok(Self {
            role: args.role,
            name: args.name.clone().unwrap_or_else(|| server.name.clone()),
            log_cycle: args.logcycle.unwrap_or_default(),
            bind_address: server.bind_address.clone(),
            advertise_ip,
            ports: ListenPorts {
                external: args.portno.unwrap_or(server.external_listen_port),
                manager: server.manager_listen_port,
                datahandler: server.datahandler_listen_port,
                subproc: server.subproc_listen_port,
                gui: server.gui_listen_port,
                sims: server.sims_listen_port,
                standby: server.standby_listen_port,
                router_info: server.router_info_listen_port,
            },
            active_peer,
            alive_interval: Duration::from_secs(config.common.alive_check_interval),
            alive_limit: config.common.alive_check_maxcount,
            max_data_buf_size: server.max_data_buf_size,
            mmc_response_timeout: Duration::from_secs(server.mmc_response_timeout_secs),
            mmc_result_horizon: Duration::from_secs(server.mmc_result_horizon_secs),
            db_url,
            remote_bin_dir: server.remote_bin_dir.clone(),
            layout,
        })
    }
}
