use super::types::MmcRequest;
use crate::error_handling::types::MmcError;
use std::collections::VecDeque;

/// Consecutive rejected inserts after which the originator is disconnected.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 200;

/// Outcome of a rejected insert.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub error: MmcError,
    /// Rejections in a row, this one included.
    pub consecutive: u32,
}

impl Rejected {
    pub fn should_close(&self) -> bool {
        self.consecutive >= MAX_CONSECUTIVE_FAILURES
    }
}

/// Bounded FIFO of one originator session.
#[derive(Debug)]
pub struct MmcRequestQueue {
    identity: String,
    capacity: usize,
    items: VecDeque<MmcRequest>,
    consecutive_failures: u32,
    accepted: u64,
    rejected: u64,
}

impl MmcRequestQueue {
    pub fn new(identity: &str, capacity: usize) -> Self {
        Self {
            identity: identity.to_string(),
            capacity: capacity.max(1),
            items: VecDeque::new(),
            consecutive_failures: 0,
            accepted: 0,
            rejected: 0,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The only write path. A full queue counts a failure; success resets the count.
    pub fn insert(&mut self, request: MmcRequest) -> Result<usize, Rejected> {
        if self.items.len() >= self.capacity {
            self.consecutive_failures += 1;
            self.rejected += 1;
            return Err(Rejected {
                error: MmcError::QueueFull {
                    identity: self.identity.clone(),
                    capacity: self.capacity,
                },
                consecutive: self.consecutive_failures,
            });
        }
        self.consecutive_failures = 0;
        self.accepted += 1;
        self.items.push_back(request);
        Ok(self.items.len())
    }

    pub fn pop(&mut self) -> Option<MmcRequest> {
        self.items.pop_front()
    }

    pub fn drain(&mut self) -> Vec<MmcRequest> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// `(accepted, rejected)` since the queue was opened.
    pub fn totals(&self) -> (u64, u64) {
        (self.accepted, self.rejected)
    }
}
