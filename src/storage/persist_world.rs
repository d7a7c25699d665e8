use super::storage_trait::ConfigDatabase;
use crate::entity_store::types::{EntityDelta, EntityRecord};
use crate::error_handling::types::ReactorError;
use crate::reactor::context::WorldContext;
use crate::reactor::event_loop::{EventLoop, WorldHandle};
use crate::reactor::registry::WorldDirectory;
use crate::reactor::sensor::WorldState;
use log::{debug, error, warn};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum PersistJob {
    /// The deltas of one operator edit, written together and answered with a [`PersistReply`].
    Edit { ticket: u64, deltas: Vec<EntityDelta> },
    /// Runtime status change of a controllable row.
    Status(EntityRecord),
}

/// Outcome of a [`PersistJob::Edit`].
#[derive(Debug, Clone, PartialEq)]
pub struct PersistReply {
    pub ticket: u64,
    pub result: Result<(), String>,
}

/// Receives edit outcomes; returns false once the receiving world is gone.
pub type PersistSink = Box<dyn Fn(PersistReply) -> bool + Send>;

/// Worker world writing entity changes to the database in submission order.
pub struct PersistWorld {
    db: Arc<dyn ConfigDatabase>,
    sink: PersistSink,
    failures: u64,
}

impl PersistWorld {
    pub fn new(db: Arc<dyn ConfigDatabase>, sink: PersistSink) -> Self {
        Self { db, sink, failures: 0 }
    }
}

fn job_key(job: &PersistJob) -> String {
    match job {
        PersistJob::Edit { ticket, deltas } => format!("edit #{} ({} deltas)", ticket, deltas.len()),
        PersistJob::Status(record) => format!("status of {}", record.key()),
    }
}

impl WorldState for PersistWorld {
    type Message = PersistJob;
    type Timer = ();

    fn on_message(&mut self, ctx: &mut WorldContext<'_, Self>, job: PersistJob) {
        let key = job_key(&job);
        match job {
            PersistJob::Edit { ticket, deltas } => {
                let result = self.db.apply_deltas(&deltas).map_err(|e| e.to_string());
                match &result {
                    Ok(()) => debug!("[store] Persisted {}", key),
                    Err(e) => {
                        self.failures += 1;
                        error!("[store] Cannot persist {}: {}", key, e);
                    }
                }
                if !(self.sink)(PersistReply { ticket, result }) {
                    warn!("[store] Main world gone, stopping the writer");
                    ctx.stop();
                }
            }
            PersistJob::Status(record) => match self.db.update_status(&record) {
                Ok(()) => debug!("[store] Persisted {}", key),
                Err(e) => {
                    self.failures += 1;
                    error!("[store] Cannot persist {} ({} failures so far): {}", key, self.failures, e);
                }
            },
        }
    }
}

/// The main world's handle on the writer world.
#[derive(Clone)]
pub struct PersistLink {
    handle: WorldHandle<PersistWorld>,
}

impl PersistLink {
    pub fn spawn(
        db: Arc<dyn ConfigDatabase>,
        sink: PersistSink,
        directory: &WorldDirectory,
    ) -> Result<Self, ReactorError> {
        let handle = EventLoop::new("db-writer", PersistWorld::new(db, sink)).spawn(directory)?;
        Ok(PersistLink { handle })
    }

    /// Queues a job; false when the writer is gone.
    pub fn submit(&self, job: PersistJob) -> bool {
        let key = job_key(&job);
        match self.handle.send_message(job) {
            Ok(()) => true,
            Err(e) => {
                error!("[store] Cannot queue {}: {}", key, e);
                false
            }
        }
    }

    pub fn stop(&self) {
        let _ = self.handle.stop();
    }
}
