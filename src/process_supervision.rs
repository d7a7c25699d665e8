//! Process supervision subsystem.
//!
//! Starts, watches and restarts the server's children: Managers, DataHandlers
//! and SubProcesses, on this host or on remote hosts through SSH.
//!
//! Re-exports:
//! - [`ChildSupervisor`]: local children, SIGTERM/SIGKILL and non-blocking reaping.
//! - [`RemoteLauncher`], [`SshLauncher`]: blocking remote command execution.
//! - [`StartupTimeouts`]: staggered startup deadlines per process kind.
//! - [`LauncherLink`]: hands launch plans to the launcher world.

pub mod child_supervisor;
pub mod launcher_world;
pub mod remote_launcher;
pub mod startup_timeouts;
pub mod types;

pub use child_supervisor::{ChildSupervisor, KILL_GRACE};
pub use launcher_world::{run_plan, LaunchJob, LaunchSink, LauncherLink, LauncherWorld};
pub use remote_launcher::{is_local_host, RemoteLauncher, SshLauncher};
pub use startup_timeouts::StartupTimeouts;
pub use types::{HostAccess, LaunchOutcome, LaunchPlan, ProcessDead, ProcessKind};
