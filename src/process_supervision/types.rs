//! Core types used by the process supervision subsystem.

use crate::entity_store::types::{DataHandler, EntityKey, Manager, SubProc};
use crate::protocol::messages::ProcessType;
use crate::protocol::session_type::SessionType;
use std::fmt;

/// Children the server starts and restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProcessKind {
    Manager,
    DataHandler,
    SubProc,
}

impl ProcessKind {
    pub const ALL: [ProcessKind; 3] = [ProcessKind::Manager, ProcessKind::DataHandler, ProcessKind::SubProc];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessKind::Manager => "MANAGER",
            ProcessKind::DataHandler => "DATAHANDLER",
            ProcessKind::SubProc => "SUBPROC",
        }
    }

    pub fn session_type(&self) -> SessionType {
        match self {
            ProcessKind::Manager => SessionType::AsciiManager,
            ProcessKind::DataHandler => SessionType::AsciiDataHandler,
            ProcessKind::SubProc => SessionType::AsciiSubProc,
        }
    }

    pub fn process_type(&self) -> ProcessType {
        match self {
            ProcessKind::Manager => ProcessType::AsciiManager,
            ProcessKind::DataHandler => ProcessType::AsciiDataHandler,
            ProcessKind::SubProc => ProcessType::AsciiSubProc,
        }
    }

    pub fn from_process_type(process_type: ProcessType) -> Option<ProcessKind> {
        match process_type {
            ProcessType::AsciiManager => Some(ProcessKind::Manager),
            ProcessType::AsciiDataHandler => Some(ProcessKind::DataHandler),
            ProcessType::AsciiSubProc => Some(ProcessKind::SubProc),
            _ => None,
        }
    }

    /// Binary started for managers and data handlers; sub processes name their own.
    pub fn default_binary(&self) -> &'static str {
        match self {
            ProcessKind::Manager => "AsciiManager",
            ProcessKind::DataHandler => "AsciiDataHandler",
            ProcessKind::SubProc => "AsciiSubProc",
        }
    }

    pub fn key(&self, id: &str) -> EntityKey {
        match self {
            ProcessKind::Manager => EntityKey::Manager {
                manager_id: id.to_string(),
            },
            ProcessKind::DataHandler => EntityKey::DataHandler {
                data_handler_id: id.to_string(),
            },
            ProcessKind::SubProc => EntityKey::SubProc {
                sub_proc_id: id.to_string(),
            },
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where and how to reach a child's host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAccess {
    pub host: String,
    pub user: String,
    pub password: String,
}

impl HostAccess {
    pub fn for_manager(manager: &Manager) -> Self {
        Self {
            host: manager.ip.clone(),
            user: manager.ssh_id.clone(),
            password: manager.ssh_pass.clone(),
        }
    }

    pub fn for_data_handler(data_handler: &DataHandler) -> Self {
        Self {
            host: data_handler.ip.clone(),
            user: data_handler.ssh_id.clone(),
            password: data_handler.ssh_pass.clone(),
        }
    }

    pub fn for_sub_proc(sub_proc: &SubProc) -> Self {
        Self {
            host: sub_proc.ip.clone(),
            user: sub_proc.ssh_id.clone(),
            password: sub_proc.ssh_pass.clone(),
        }
    }
}

/// Everything needed to (re)start one child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub kind: ProcessKind,
    pub id: String,
    pub access: HostAccess,
    pub binary: String,
    /// Arguments after the binary: `--name id --svrip ip --svrport port --logcycle cycle [extra]`.
    pub args: Vec<String>,
    pub bin_dir: String,
    /// Run on this host as a supervised local child instead of through SSH.
    pub local: bool,
}

impl LaunchPlan {
    pub fn label(&self) -> String {
        format!("{}({})", self.kind, self.id)
    }

    /// Shell line started on a remote host.
    pub fn start_command(&self) -> String {
        format!(
            "cd {dir} && nohup ./{bin} {args} > /dev/null 2>&1 &",
            dir = self.bin_dir,
            bin = self.binary,
            args = self.args.join(" ")
        )
    }

    /// Best-effort kill of a previous instance; matching is on `--name <id>`.
    pub fn kill_command(&self) -> String {
        format!("pkill -f '{} --name {}( |$)' || true", self.binary, self.id)
    }

    pub fn argv(&self) -> Vec<String> {
        let mut argv = vec![format!("{}/{}", self.bin_dir, self.binary)];
        argv.extend(self.args.iter().cloned());
        argv
    }
}

/// Result of a remote start, reported back to the main world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub kind: ProcessKind,
    pub id: String,
    pub result: Result<(), String>,
}

/// A supervised local child that exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDead {
    pub name: String,
    pub pid: u32,
    pub code: Option<i32>,
}
