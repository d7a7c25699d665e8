use super::types::HostAccess;
use crate::error_handling::types::SupervisorError;
use log::{debug, warn};
use std::process::{Command, Output, Stdio};

/// Runs a shell command on a child's host and reports its output.
///
/// Implementations block; the server only calls them from the launcher world.
pub trait RemoteLauncher: Send + Sync {
    fn exec(&self, access: &HostAccess, command: &str) -> Result<String, SupervisorError>;
}

/// Hosts that are this machine.
pub fn is_local_host(host: &str, own_ip: &str) -> bool {
    matches!(host, "" | "localhost" | "127.0.0.1" | "::1") || host == own_ip
}

/// Launcher on `sshpass` + `ssh`; commands for this machine run through `sh -c`.
#[derive(Debug, Clone)]
pub struct SshLauncher {
    own_ip: String,
    connect_timeout_secs: u32,
}

impl SshLauncher {
    pub fn new(own_ip: &str) -> Self {
        Self {
            own_ip: own_ip.to_string(),
            connect_timeout_secs: 10,
        }
    }

    fn command_for(&self, access: &HostAccess, command: &str) -> Command {
        if is_local_host(&access.host, &self.own_ip) {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command);
            return cmd;
        }
        let mut cmd = Command::new("sshpass");
        cmd.arg("-p")
            .arg(&access.password)
            .arg("ssh")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
            .arg(format!("{}@{}", access.user, access.host))
            .arg(command);
        cmd
    }
}

impl RemoteLauncher for SshLauncher {
    fn exec(&self, access: &HostAccess, command: &str) -> Result<String, SupervisorError> {
        debug!("[supervisor] exec on {}: {}", access.host, command);
        let output = self
            .command_for(access, command)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| SupervisorError::RemoteExecFailed(format!("{}: {}", access.host, e)))?;
        check_output(&access.host, output)
    }
}

fn check_output(host: &str, output: Output) -> Result<String, SupervisorError> {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        return Ok(stdout);
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    warn!("[supervisor] exec on {} failed ({}): {}", host, output.status, stderr);
    Err(SupervisorError::RemoteExecFailed(format!(
        "{}: {} {}",
        host,
        output.status,
        if stderr.is_empty() { stdout } else { stderr }
    )))
}
