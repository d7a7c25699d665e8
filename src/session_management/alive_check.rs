use crate::reactor::timer_queue::TimerKey;
use std::time::Duration;

/// Heartbeat bookkeeping of one session.
///
/// Two periodic timers drive it: the send timer emits `CMD_ALIVE_SEND`, the receive timer
/// counts intervals without inbound traffic. Any inbound packet resets the count.
#[derive(Debug, Clone)]
pub struct AliveCheck {
    interval: Duration,
    limit: u32,
    fail_count: u32,
    pub(crate) send_timer: Option<TimerKey>,
    pub(crate) recv_timer: Option<TimerKey>,
}

impl AliveCheck {
    pub fn new(interval: Duration, limit: u32) -> Self {
        Self {
            interval,
            limit: limit.max(1),
            fail_count: 0,
            send_timer: None,
            recv_timer: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    pub fn on_receive(&mut self) {
        self.fail_count = 0;
    }

    /// Counts one silent interval; true once the limit is reached.
    pub fn on_recv_tick(&mut self) -> bool {
        self.fail_count += 1;
        self.fail_count >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fails_after_limit_silent_intervals() {
        let mut alive = AliveCheck::new(Duration::from_secs(10), 3);
        assert!(!alive.on_recv_tick());
        assert!(!alive.on_recv_tick());
        assert!(alive.on_recv_tick());
        assert_eq!(alive.fail_count(), 3);
    }

    #[test]
    fn test_inbound_packet_resets_counter() {
        let mut alive = AliveCheck::new(Duration::from_secs(10), 3);
        alive.on_recv_tick();
        alive.on_recv_tick();
        alive.on_receive();
        assert!(!alive.on_recv_tick());
        assert!(!alive.on_recv_tick());
        assert!(alive.on_recv_tick());
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let mut alive = AliveCheck::new(Duration::from_secs(1), 0);
        assert_eq!(alive.limit(), 1);
        assert!(alive.on_recv_tick());
    }
}
