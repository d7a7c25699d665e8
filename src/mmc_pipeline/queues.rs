use super::request_queue::{MmcRequestQueue, Rejected};
use super::types::{GenResult, MmcPublishSet, MmcRequest, StampedRequest};
use crate::error_handling::types::MmcError;
use crate::reactor::sensor::SensorId;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::debug;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A request whose originator left before it was taken up.
#[derive(Debug, Clone, PartialEq)]
pub struct Garbage {
    pub request: MmcRequest,
    pub dropped_at: DateTime<Utc>,
}

/// Queues shared by the main world and the pipeline worlds.
///
/// Each structure has its own lock and every operation holds exactly one of them.
#[derive(Debug, Default)]
pub struct MmcQueues {
    requests: Mutex<BTreeMap<SensorId, MmcRequestQueue>>,
    generating: Mutex<HashMap<u64, MmcRequest>>,
    generated: Mutex<VecDeque<GenResult>>,
    publish: Mutex<BTreeMap<u8, VecDeque<MmcPublishSet>>>,
    garbage: Mutex<Vec<Garbage>>,
}

impl MmcQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the queue of an authorized originator session.
    pub fn open(&self, origin: SensorId, identity: &str, capacity: usize) {
        lock(&self.requests).insert(origin, MmcRequestQueue::new(identity, capacity));
    }

    pub fn is_open(&self, origin: SensorId) -> bool {
        lock(&self.requests).contains_key(&origin)
    }

    /// Closes an originator's queue; requests still waiting become garbage.
    pub fn close(&self, origin: SensorId) -> usize {
        let Some(mut queue) = lock(&self.requests).remove(&origin) else {
            return 0;
        };
        let left = queue.drain();
        let count = left.len();
        if count > 0 {
            let now = Utc::now();
            lock(&self.garbage).extend(left.into_iter().map(|request| Garbage {
                request,
                dropped_at: now,
            }));
            debug!("[mmc] {} requests of {} moved to garbage", count, queue.identity());
        }
        count
    }

    pub fn insert(&self, request: MmcRequest) -> Result<usize, Rejected> {
        let mut requests = lock(&self.requests);
        let Some(queue) = requests.get_mut(&request.origin) else {
            return Err(Rejected {
                error: MmcError::QueueClosed(request.identity.clone()),
                consecutive: 0,
            });
        };
        queue.insert(request)
    }

    pub fn pending_requests(&self) -> usize {
        lock(&self.requests).values().map(|q| q.len()).sum()
    }

    /// Takes up to `max` requests, one per originator per round, so one busy
    /// originator cannot starve the others.
    pub fn take_requests(&self, max: usize) -> Vec<MmcRequest> {
        let mut requests = lock(&self.requests);
        let mut taken = Vec::new();
        loop {
            let before = taken.len();
            for queue in requests.values_mut() {
                if taken.len() >= max {
                    return taken;
                }
                if let Some(request) = queue.pop() {
                    taken.push(request);
                }
            }
            if taken.len() == before {
                return taken;
            }
        }
    }

    /// Parks a stamped request until its expansion arrives.
    pub fn await_generation(&self, stamped: &StampedRequest) {
        lock(&self.generating).insert(stamped.gid, stamped.request.clone());
    }

    pub fn cancel_generation(&self, gid: u64) -> Option<MmcRequest> {
        lock(&self.generating).remove(&gid)
    }

    pub fn push_generated(&self, result: GenResult) {
        lock(&self.generated).push_back(result);
    }

    /// Pairs every finished expansion with its request. Results whose request was
    /// cancelled meanwhile are dropped.
    pub fn take_generated(&self) -> Vec<(MmcRequest, GenResult)> {
        let results: Vec<GenResult> = lock(&self.generated).drain(..).collect();
        let mut generating = lock(&self.generating);
        results
            .into_iter()
            .filter_map(|result| generating.remove(&result.gid).map(|request| (request, result)))
            .collect()
    }

    pub fn push_publish(&self, set: MmcPublishSet) {
        lock(&self.publish).entry(set.priority).or_default().push_back(set);
    }

    /// Pops from the lowest numerical priority that has work.
    pub fn pop_publish(&self) -> Option<MmcPublishSet> {
        let mut publish = lock(&self.publish);
        let (priority, set) = publish
            .iter_mut()
            .find_map(|(priority, queue)| queue.pop_front().map(|set| (*priority, set)))?;
        if publish.get(&priority).is_some_and(|q| q.is_empty()) {
            publish.remove(&priority);
        }
        Some(set)
    }

    pub fn pending_publish(&self) -> usize {
        lock(&self.publish).values().map(|q| q.len()).sum()
    }

    /// Drops garbage older than `horizon`; returns how many went.
    pub fn sweep_garbage(&self, now: DateTime<Utc>, horizon: Duration) -> usize {
        let horizon = ChronoDuration::from_std(horizon).unwrap_or(ChronoDuration::MAX);
        let mut garbage = lock(&self.garbage);
        let before = garbage.len();
        garbage.retain(|g| now.signed_duration_since(g.dropped_at) < horizon);
        before - garbage.len()
    }

    pub fn garbage_len(&self) -> usize {
        lock(&self.garbage).len()
    }
}
