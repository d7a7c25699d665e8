use super::types::ProcessKind;
use crate::reactor::timer_queue::TimerKey;
use std::collections::HashMap;
use std::time::Duration;

pub const STARTUP_BASE: Duration = Duration::from_secs(10);
pub const STARTUP_STEP: Duration = Duration::from_secs(2);

/// Pending startup deadlines of one process kind, `{id -> timer key}`.
///
/// The k-th concurrent start (counting from 1) gets `10 + k * 2` seconds so a
/// batch of children started together does not time out together.
#[derive(Debug)]
pub struct StartupTimeouts {
    kind: ProcessKind,
    pending: HashMap<String, TimerKey>,
}

impl StartupTimeouts {
    pub fn new(kind: ProcessKind) -> Self {
        Self {
            kind,
            pending: HashMap::new(),
        }
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    /// Deadline for the next start, staggered by the number already pending.
    pub fn next_delay(&self) -> Duration {
        STARTUP_BASE + STARTUP_STEP * (self.pending.len() as u32 + 1)
    }

    /// Records the timer of `id`; a replaced key is returned so it can be cancelled.
    pub fn insert(&mut self, id: &str, key: TimerKey) -> Option<TimerKey> {
        self.pending.insert(id.to_string(), key)
    }

    /// Startup confirmed or given up; returns the key to cancel.
    pub fn remove(&mut self, id: &str) -> Option<TimerKey> {
        self.pending.remove(id)
    }

    /// Drops the entry only if it still holds `key` (the timer that just fired).
    pub fn expire(&mut self, id: &str, key: TimerKey) -> bool {
        if self.pending.get(id) == Some(&key) {
            self.pending.remove(id);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
