use super::sensor::SensorId;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Timers due within this slack of `now` fire in the current tick.
pub const TIMER_SLACK: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey(u64);

#[derive(Debug)]
struct TimerEntry<T> {
    sensor: SensorId,
    payload: T,
}

/// Deadline-ordered timers of one world. Several timers per sensor may be outstanding.
#[derive(Debug)]
pub struct TimerQueue<T> {
    next_key: u64,
    by_deadline: BTreeMap<(Instant, u64), TimerEntry<T>>,
    deadlines: HashMap<u64, Instant>,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self {
            next_key: 1,
            by_deadline: BTreeMap::new(),
            deadlines: HashMap::new(),
        }
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, sensor: SensorId, deadline: Instant, payload: T) -> TimerKey {
        let key = self.next_key;
        self.next_key += 1;
        self.by_deadline
            .insert((deadline, key), TimerEntry { sensor, payload });
        self.deadlines.insert(key, deadline);
        TimerKey(key)
    }

    pub fn cancel(&mut self, key: TimerKey) -> Option<T> {
        self.take(key).map(|(_, payload)| payload)
    }

    pub fn cancel_sensor(&mut self, sensor: SensorId) -> usize {
        let keys: Vec<(Instant, u64)> = self
            .by_deadline
            .iter()
            .filter(|(_, entry)| entry.sensor == sensor)
            .map(|(k, _)| *k)
            .collect();
        for (deadline, key) in &keys {
            self.by_deadline.remove(&(*deadline, *key));
            self.deadlines.remove(key);
        }
        keys.len()
    }

    pub fn take(&mut self, key: TimerKey) -> Option<(SensorId, T)> {
        let deadline = self.deadlines.remove(&key.0)?;
        self.by_deadline
            .remove(&(deadline, key.0))
            .map(|entry| (entry.sensor, entry.payload))
    }

    pub fn contains(&self, key: TimerKey) -> bool {
        self.deadlines.contains_key(&key.0)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.by_deadline.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Keys due at `now`, in non-decreasing deadline order. Entries stay queued until taken.
    pub fn expired(&self, now: Instant) -> Vec<TimerKey> {
        let horizon = now + TIMER_SLACK;
        self.by_deadline
            .keys()
            .take_while(|(deadline, _)| *deadline <= horizon)
            .map(|(_, key)| TimerKey(*key))
            .collect()
    }

    pub fn pending_for(&self, sensor: SensorId) -> usize {
        self.by_deadline.values().filter(|e| e.sensor == sensor).count()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_in_deadline_order() {
        let now = Instant::now();
        let mut queue = TimerQueue::new();
        let late = queue.set(SensorId(1), now + Duration::from_secs(5), "late");
        let early = queue.set(SensorId(2), now + Duration::from_secs(1), "early");
        let due = queue.set(SensorId(1), now, "due");

        assert_eq!(queue.next_deadline(), Some(now));
        assert_eq!(queue.expired(now), vec![due]);
        assert_eq!(queue.expired(now + Duration::from_secs(2)), vec![due, early]);
        assert_eq!(queue.take(due), Some((SensorId(1), "due")));
        assert_eq!(queue.expired(now + Duration::from_secs(10)), vec![early, late]);
    }

    #[test]
    fn test_slack_includes_nearly_due() {
        let now = Instant::now();
        let mut queue = TimerQueue::new();
        let key = queue.set(SensorId(1), now + Duration::from_micros(500), ());
        assert_eq!(queue.expired(now), vec![key]);
    }

    #[test]
    fn test_cancel_by_key_and_sensor() {
        let now = Instant::now();
        let mut queue = TimerQueue::new();
        let a = queue.set(SensorId(1), now, 1);
        queue.set(SensorId(1), now, 2);
        queue.set(SensorId(2), now, 3);

        assert_eq!(queue.cancel(a), Some(1));
        assert_eq!(queue.cancel(a), None);
        assert_eq!(queue.pending_for(SensorId(1)), 1);
        assert_eq!(queue.cancel_sensor(SensorId(1)), 1);
        assert_eq!(queue.len(), 1);
        assert!(!queue.contains(a));
    }

    #[test]
    fn test_empty_queue_has_no_deadline() {
        let queue: TimerQueue<()> = TimerQueue::new();
        assert!(queue.next_deadline().is_none());
        assert!(queue.is_empty());
    }
}
