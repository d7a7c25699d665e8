use super::types::ProcessDead;
use crate::error_handling::types::SupervisorError;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Grace period between SIGTERM and SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(1);
const KILL_POLL: Duration = Duration::from_millis(20);

#[derive(Debug)]
struct ChildEntry {
    name: String,
    child: Child,
    terminating: bool,
}

/// Local children started by the server, keyed by pid.
///
/// Reaping only waits on pids this supervisor spawned, so children owned by other
/// code in the process (SSH helpers, the async runtime) are never stolen.
#[derive(Debug, Default)]
pub struct ChildSupervisor {
    children: HashMap<u32, ChildEntry>,
}

impl ChildSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `argv[0]` with the remaining arguments and records it under `name`.
    pub fn spawn(&mut self, name: &str, argv: &[String]) -> Result<u32, SupervisorError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SupervisorError::SpawnFailed(format!("{}: empty command line", name)))?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed(format!("{}: {}", name, e)))?;
        let pid = child.id();
        info!("[supervisor] Spawned {} as pid {}", name, pid);
        self.children.insert(
            pid,
            ChildEntry {
                name: name.to_string(),
                child,
                terminating: false,
            },
        );
        Ok(pid)
    }

    /// Pid of the live child named `name`; children already told to stop do not count.
    pub fn pid_of(&self, name: &str) -> Option<u32> {
        self.children
            .iter()
            .find(|(_, entry)| entry.name == name && !entry.terminating)
            .map(|(pid, _)| *pid)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Collects exited children without blocking.
    pub fn reap(&mut self) -> Vec<ProcessDead> {
        let mut dead = Vec::new();
        let pids: Vec<u32> = self.children.keys().copied().collect();
        for pid in pids {
            let Some(entry) = self.children.get_mut(&pid) else {
                continue;
            };
            match entry.child.try_wait() {
                Ok(Some(status)) => {
                    if let Some(entry) = self.children.remove(&pid) {
                        info!("[supervisor] {} (pid {}) exited with {}", entry.name, pid, status);
                        dead.push(ProcessDead {
                            name: entry.name,
                            pid,
                            code: status.code(),
                        });
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("[supervisor] waitpid({}) failed: {}", pid, e),
            }
        }
        dead
    }

    /// Sends SIGTERM to the child named `name` without waiting for it.
    ///
    /// Returns the pid so the caller can schedule [`ChildSupervisor::force_kill`]
    /// after [`KILL_GRACE`]. The exit itself is collected by [`ChildSupervisor::reap`].
    pub fn terminate(&mut self, name: &str) -> Option<u32> {
        let pid = self.pid_of(name)?;
        send_signal(pid, libc::SIGTERM);
        if let Some(entry) = self.children.get_mut(&pid) {
            entry.terminating = true;
        }
        debug!("[supervisor] Sent SIGTERM to {} (pid {})", name, pid);
        Some(pid)
    }

    /// SIGKILL for a child that outlived its grace period. False when it already exited.
    pub fn force_kill(&mut self, pid: u32) -> bool {
        let Some(entry) = self.children.get_mut(&pid) else {
            return false;
        };
        if !matches!(entry.child.try_wait(), Ok(None)) {
            return false;
        }
        warn!("[supervisor] {} (pid {}) ignored SIGTERM, killing", entry.name, pid);
        if let Err(e) = entry.child.kill() {
            warn!("[supervisor] SIGKILL to pid {} failed: {}", pid, e);
            return false;
        }
        true
    }

    /// Stops every child: SIGTERM, one grace period, then SIGKILL for the stragglers.
    ///
    /// Blocks for up to [`KILL_GRACE`]; only shutdown calls it.
    pub fn kill_all(&mut self) -> Vec<ProcessDead> {
        let pids: Vec<u32> = self.children.keys().copied().collect();
        for pid in &pids {
            send_signal(*pid, libc::SIGTERM);
        }
        let deadline = Instant::now() + KILL_GRACE;
        let mut dead = Vec::new();
        let mut remaining = pids;
        while !remaining.is_empty() {
            remaining.retain(|pid| match self.try_collect(*pid) {
                Some(exited) => {
                    dead.push(exited);
                    false
                }
                None => true,
            });
            if remaining.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(KILL_POLL);
        }
        for pid in remaining {
            if let Some(mut entry) = self.children.remove(&pid) {
                warn!("[supervisor] {} (pid {}) ignored SIGTERM, killing", entry.name, pid);
                let _ = entry.child.kill();
                let code = entry.child.wait().ok().and_then(|s| s.code());
                dead.push(ProcessDead {
                    name: entry.name,
                    pid,
                    code,
                });
            }
        }
        dead
    }

    fn try_collect(&mut self, pid: u32) -> Option<ProcessDead> {
        let entry = self.children.get_mut(&pid)?;
        match entry.child.try_wait() {
            Ok(Some(status)) => {
                let entry = self.children.remove(&pid)?;
                Some(ProcessDead {
                    name: entry.name,
                    pid,
                    code: status.code(),
                })
            }
            _ => None,
        }
    }
}

fn send_signal(pid: u32, signal: libc::c_int) {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet.
    let rc = unsafe { libc::kill(raw, signal) };
    if rc != 0 {
        debug!(
            "[supervisor] kill({}, {}) failed: {}",
            pid,
            signal,
            std::io::Error::last_os_error()
        );
    }
}
