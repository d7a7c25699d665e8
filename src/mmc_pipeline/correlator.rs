use super::fragment::result_messages;
use super::types::MmcPublishSet;
use crate::protocol::messages::{MmcPublishRes, MmcRes, ResultMode};
use crate::reactor::sensor::SensorId;
use crate::reactor::timer_queue::TimerKey;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, warn};
use std::collections::HashMap;
use std::time::Duration;

/// Where an outstanding request stands.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Queued, stamped or being expanded.
    Pending,
    /// A command was published to a manager; `rest` holds the commands still to go.
    Dispatched { manager: SensorId, rest: MmcPublishSet },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outstanding {
    pub gid: u64,
    pub origin: SensorId,
    pub ext_id: u32,
    pub stage: Stage,
    pub timer: Option<TimerKey>,
    /// The originator disconnected; results are stored instead of delivered.
    pub orphaned: bool,
}

/// Result kept for an originator that went away.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResult {
    pub gid: u64,
    pub ext_id: u32,
    pub result: MmcRes,
    pub stored_at: DateTime<Utc>,
}

/// What the caller does with a correlated result.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlated {
    pub origin: SensorId,
    /// Packets for the originator; empty when it is orphaned.
    pub messages: Vec<MmcRes>,
    /// Set when the request reached its terminal result.
    pub finished: bool,
    /// Timer to cancel when finished.
    pub timer: Option<TimerKey>,
    /// The next command of a multi-command set, to publish now.
    pub next: Option<MmcPublishSet>,
}

/// `(gid -> originator)` map of requests waiting for their results.
///
/// Lives in the main world only. Every entry leaves through exactly one terminal
/// result (`R_COMPLETE` or `R_ERROR`), whether from the manager, the generator,
/// routing or the response timer.
#[derive(Debug, Default)]
pub struct Correlator {
    waiting: HashMap<u64, Outstanding>,
    stored: Vec<StoredResult>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gid: u64, origin: SensorId, ext_id: u32, timer: Option<TimerKey>) {
        self.waiting.insert(
            gid,
            Outstanding {
                gid,
                origin,
                ext_id,
                stage: Stage::Pending,
                timer,
                orphaned: false,
            },
        );
    }

    pub fn get(&self, gid: u64) -> Option<&Outstanding> {
        self.waiting.get(&gid)
    }

    pub fn contains(&self, gid: u64) -> bool {
        self.waiting.contains_key(&gid)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Re-arms the response timer; returns the key it replaces.
    pub fn set_timer(&mut self, gid: u64, key: TimerKey) -> Option<TimerKey> {
        let entry = self.waiting.get_mut(&gid)?;
        entry.timer.replace(key)
    }

    /// A command of the set went out to `manager`.
    pub fn dispatched(&mut self, gid: u64, manager: SensorId, rest: MmcPublishSet) -> bool {
        match self.waiting.get_mut(&gid) {
            Some(entry) => {
                entry.stage = Stage::Dispatched { manager, rest };
                true
            }
            None => false,
        }
    }

    /// Result from the manager for the command currently published under `gid`.
    pub fn on_publish_result(&mut self, res: &MmcPublishRes) -> Option<Correlated> {
        let Some(entry) = self.waiting.get_mut(&res.gid) else {
            debug!("[mmc] Result for unknown gid {}", res.gid);
            return None;
        };
        let (finished, last_mode, next) = match res.result_mode {
            ResultMode::Continue => (false, ResultMode::Continue, None),
            ResultMode::Error => (true, ResultMode::Error, None),
            ResultMode::Complete => match &entry.stage {
                Stage::Dispatched { rest, .. } if !rest.is_exhausted() => {
                    (false, ResultMode::Continue, Some(rest.clone()))
                }
                _ => (true, ResultMode::Complete, None),
            },
        };
        let messages = result_messages(entry.ext_id, &res.result, last_mode);
        Some(self.settle(res.gid, messages, finished, next))
    }

    /// Terminates the request with `R_ERROR` carrying `reason`.
    pub fn fail(&mut self, gid: u64, reason: &str) -> Option<Correlated> {
        let ext_id = self.waiting.get(&gid)?.ext_id;
        let messages = result_messages(ext_id, reason, ResultMode::Error);
        Some(self.settle(gid, messages, true, None))
    }

    /// Response timer fired; ignored when `key` is no longer the entry's timer.
    pub fn timeout(&mut self, gid: u64, key: TimerKey) -> Option<Correlated> {
        let entry = self.waiting.get_mut(&gid)?;
        if entry.timer != Some(key) {
            return None;
        }
        entry.timer = None;
        warn!("[mmc] Request gid {} (ext id {}) timed out", gid, entry.ext_id);
        self.fail(gid, "MMC response timeout")
    }

    fn settle(&mut self, gid: u64, messages: Vec<MmcRes>, finished: bool, next: Option<MmcPublishSet>) -> Correlated {
        let (origin, orphaned, timer) = match self.waiting.get(&gid) {
            Some(entry) => (entry.origin, entry.orphaned, entry.timer),
            None => (SensorId::WORLD, true, None),
        };
        if finished {
            self.waiting.remove(&gid);
        }
        let messages = if orphaned {
            let now = Utc::now();
            self.stored.extend(messages.into_iter().map(|result| StoredResult {
                gid,
                ext_id: result.id,
                result,
                stored_at: now,
            }));
            Vec::new()
        } else {
            messages
        };
        Correlated {
            origin,
            messages,
            finished,
            timer: if finished { timer } else { None },
            next,
        }
    }

    /// The originator left: its requests keep running but results get stored.
    pub fn orphan(&mut self, origin: SensorId) -> usize {
        let mut count = 0;
        for entry in self.waiting.values_mut().filter(|e| e.origin == origin) {
            entry.orphaned = true;
            count += 1;
        }
        count
    }

    /// A manager session went away: requests published to it fail.
    pub fn dispatched_to(&self, manager: SensorId) -> Vec<u64> {
        let mut gids: Vec<u64> = self
            .waiting
            .values()
            .filter(|e| matches!(&e.stage, Stage::Dispatched { manager: m, .. } if *m == manager))
            .map(|e| e.gid)
            .collect();
        gids.sort();
        gids
    }

    pub fn stored(&self) -> &[StoredResult] {
        &self.stored
    }

    /// Drops stored results older than `horizon`.
    pub fn sweep_stored(&mut self, now: DateTime<Utc>, horizon: Duration) -> usize {
        let horizon = ChronoDuration::from_std(horizon).unwrap_or(ChronoDuration::MAX);
        let before = self.stored.len();
        self.stored
            .retain(|s| now.signed_duration_since(s.stored_at) < horizon);
        before - self.stored.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmc_pipeline::fragment::CHUNK_LEN;
    use crate::mmc_pipeline::types::MmcRequest;
    use crate::protocol::messages::MmcReq;
    use crate::reactor::timer_queue::TimerQueue;

    fn set(gid: u64, commands: &[&str]) -> MmcPublishSet {
        let request = MmcRequest {
            origin: SensorId(1),
            identity: "ops1".to_string(),
            req: MmcReq {
                id: 42,
                ne: "NE1".to_string(),
                mmc: "STS-ALL".to_string(),
                priority: None,
                log_mode: None,
                user_id: String::new(),
                reference_id: String::new(),
            },
            priority: 5,
            log_mode: 0,
            display: String::new(),
            received_at: Utc::now(),
        };
        MmcPublishSet::new(&request, gid, commands.iter().map(|c| c.to_string()).collect())
    }

    fn res(gid: u64, mode: ResultMode, text: &str) -> MmcPublishRes {
        MmcPublishRes {
            gid,
            result_mode: mode,
            result: text.to_string(),
        }
    }

    #[test]
    fn test_single_command_completes_once() {
        let mut correlator = Correlator::new();
        correlator.register(9, SensorId(1), 42, None);
        let mut s = set(9, &["STS-ALL"]);
        s.next_publish();
        correlator.dispatched(9, SensorId(2), s);

        let first = correlator.on_publish_result(&res(9, ResultMode::Continue, "chunk1")).unwrap();
        assert!(!first.finished);
        assert_eq!(first.messages[0].result_mode, ResultMode::Continue);

        let last = correlator.on_publish_result(&res(9, ResultMode::Complete, "chunk2")).unwrap();
        assert!(last.finished);
        assert_eq!(last.messages[0].result_mode, ResultMode::Complete);
        assert_eq!(last.messages[0].id, 42);
        assert!(correlator.on_publish_result(&res(9, ResultMode::Complete, "late")).is_none());
    }

    #[test]
    fn test_multi_command_set_continues_until_last() {
        let mut correlator = Correlator::new();
        correlator.register(5, SensorId(1), 42, None);
        let mut s = set(5, &["A", "B"]);
        s.next_publish();
        correlator.dispatched(5, SensorId(2), s);

        let step = correlator.on_publish_result(&res(5, ResultMode::Complete, "a done")).unwrap();
        assert!(!step.finished);
        assert_eq!(step.messages[0].result_mode, ResultMode::Continue);
        let mut next = step.next.unwrap();
        assert_eq!(next.next_publish().unwrap().mmc, "B");
        correlator.dispatched(5, SensorId(2), next);

        let done = correlator.on_publish_result(&res(5, ResultMode::Complete, "b done")).unwrap();
        assert!(done.finished);
        assert!(done.next.is_none());
    }

    #[test]
    fn test_long_result_is_fragmented() {
        let mut correlator = Correlator::new();
        correlator.register(3, SensorId(1), 42, None);
        let payload = "z".repeat(CHUNK_LEN + 1);
        let out = correlator.on_publish_result(&res(3, ResultMode::Complete, &payload)).unwrap();
        assert_eq!(out.messages.len(), 2);
        assert_eq!(out.messages[0].result_mode, ResultMode::Continue);
        assert_eq!(out.messages[1].result_mode, ResultMode::Complete);
    }

    #[test]
    fn test_timeout_only_for_current_timer() {
        let mut timers: TimerQueue<()> = TimerQueue::new();
        let now = tokio::time::Instant::now();
        let old = timers.set(SensorId::WORLD, now, ());
        let current = timers.set(SensorId::WORLD, now, ());

        let mut correlator = Correlator::new();
        correlator.register(1, SensorId(1), 42, Some(old));
        assert_eq!(correlator.set_timer(1, current), Some(old));
        assert!(correlator.timeout(1, old).is_none());

        let out = correlator.timeout(1, current).unwrap();
        assert!(out.finished);
        assert_eq!(out.messages[0].result_mode, ResultMode::Error);
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_orphaned_results_are_stored_then_swept() {
        let mut correlator = Correlator::new();
        correlator.register(1, SensorId(1), 42, None);
        assert_eq!(correlator.orphan(SensorId(1)), 1);

        let out = correlator.on_publish_result(&res(1, ResultMode::Complete, "ok")).unwrap();
        assert!(out.messages.is_empty());
        assert_eq!(correlator.stored().len(), 1);

        let later = Utc::now() + ChronoDuration::seconds(120);
        assert_eq!(correlator.sweep_stored(later, Duration::from_secs(60)), 1);
        assert!(correlator.stored().is_empty());
    }

    #[test]
    fn test_dispatched_to_lists_requests_of_a_manager() {
        let mut correlator = Correlator::new();
        correlator.register(1, SensorId(1), 1, None);
        correlator.register(2, SensorId(1), 2, None);
        correlator.dispatched(2, SensorId(7), set(2, &[]));
        assert_eq!(correlator.dispatched_to(SensorId(7)), vec![2]);
        assert!(correlator.fail(2, "manager lost").unwrap().finished);
        assert!(correlator.dispatched_to(SensorId(7)).is_empty());
    }
}
