use super::remote_launcher::RemoteLauncher;
use super::types::{LaunchOutcome, LaunchPlan};
use crate::error_handling::types::ReactorError;
use crate::reactor::context::WorldContext;
use crate::reactor::event_loop::{EventLoop, WorldHandle};
use crate::reactor::registry::WorldDirectory;
use crate::reactor::sensor::WorldState;
use log::{error, info, warn};
use std::sync::Arc;

/// Receives launch results; returns false once the receiving world is gone.
pub type LaunchSink = Box<dyn Fn(LaunchOutcome) -> bool + Send>;

/// Kills any previous instance of the plan's child, then starts it.
pub fn run_plan(launcher: &dyn RemoteLauncher, plan: &LaunchPlan) -> LaunchOutcome {
    if let Err(e) = launcher.exec(&plan.access, &plan.kill_command()) {
        warn!("[supervisor] Kill before start of {} failed: {}", plan.label(), e);
    }
    let result = launcher
        .exec(&plan.access, &plan.start_command())
        .map(|_| ())
        .map_err(|e| e.to_string());
    match &result {
        Ok(()) => info!("[supervisor] Started {} on {}", plan.label(), plan.access.host),
        Err(e) => error!("[supervisor] Start of {} failed: {}", plan.label(), e),
    }
    LaunchOutcome {
        kind: plan.kind,
        id: plan.id.clone(),
        result,
    }
}

#[derive(Debug)]
pub enum LaunchJob {
    Start(LaunchPlan),
    /// Fire-and-forget kill, e.g. after a startup timeout.
    Kill(LaunchPlan),
}

/// Worker world that runs blocking SSH commands off the main world.
pub struct LauncherWorld {
    launcher: Arc<dyn RemoteLauncher>,
    sink: LaunchSink,
}

impl LauncherWorld {
    pub fn new(launcher: Arc<dyn RemoteLauncher>, sink: LaunchSink) -> Self {
        Self { launcher, sink }
    }
}

impl WorldState for LauncherWorld {
    type Message = LaunchJob;
    type Timer = ();

    fn on_message(&mut self, ctx: &mut WorldContext<'_, Self>, job: LaunchJob) {
        match job {
            LaunchJob::Start(plan) => {
                let outcome = run_plan(self.launcher.as_ref(), &plan);
                if !(self.sink)(outcome) {
                    warn!("[supervisor] Main world gone, stopping launcher");
                    ctx.stop();
                }
            }
            LaunchJob::Kill(plan) => {
                if let Err(e) = self.launcher.exec(&plan.access, &plan.kill_command()) {
                    warn!("[supervisor] Kill of {} failed: {}", plan.label(), e);
                }
            }
        }
    }
}

/// The main world's handle on the launcher world.
pub struct LauncherLink {
    handle: WorldHandle<LauncherWorld>,
}

impl LauncherLink {
    pub fn spawn(
        launcher: Arc<dyn RemoteLauncher>,
        sink: LaunchSink,
        directory: &WorldDirectory,
    ) -> Result<Self, ReactorError> {
        let handle = EventLoop::new("launcher", LauncherWorld::new(launcher, sink)).spawn(directory)?;
        Ok(LauncherLink { handle })
    }

    /// Queues the start. The outcome arrives through the sink; only a failure to
    /// queue is returned directly.
    pub fn start(&self, plan: LaunchPlan) -> Option<LaunchOutcome> {
        let label = plan.label();
        if let Err(e) = self.handle.send_message(LaunchJob::Start(plan.clone())) {
            error!("[supervisor] Cannot queue start of {}: {}", label, e);
            return Some(LaunchOutcome {
                kind: plan.kind,
                id: plan.id,
                result: Err(e.to_string()),
            });
        }
        None
    }

    pub fn kill(&self, plan: LaunchPlan) {
        if let Err(e) = self.handle.send_message(LaunchJob::Kill(plan)) {
            warn!("[supervisor] Cannot queue kill: {}", e);
        }
    }

    pub fn stop(&self) {
        let _ = self.handle.stop();
    }
}
