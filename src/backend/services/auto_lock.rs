// src/backend/services/auto_lock.rs

use crate::models::common::TimestampNs;
use crate::utils::time::{remaining_secs, secs_to_ns};

/// Inactivity countdown of one lock session.
///
/// The countdown is a wall-clock deadline, never a decremented counter, so
/// a suspended timer or a skipped tick cannot stretch it. `poll` reports
/// expiry once per armed deadline; re-arming starts a fresh countdown.
#[derive(Debug, Clone, Default)]
pub struct AutoLockScheduler {
    deadline: Option<TimestampNs>,
}

impl AutoLockScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) a countdown of `duration_secs` from `now`.
    /// A zero duration means auto-lock is disabled and only cancels.
    pub fn arm(&mut self, now: TimestampNs, duration_secs: u32) {
        self.deadline = if duration_secs == 0 {
            None
        } else {
            Some(now.saturating_add(secs_to_ns(u64::from(duration_secs))))
        };
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// True exactly once when the armed deadline has been reached.
    pub fn poll(&mut self, now: TimestampNs) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<TimestampNs> {
        self.deadline
    }

    /// Seconds left on the countdown, `None` when nothing is armed.
    pub fn remaining_secs(&self, now: TimestampNs) -> Option<u64> {
        self.deadline.map(|deadline| remaining_secs(deadline, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::at;

    #[test]
    fn fires_at_deadline_not_before() {
        let mut timer = AutoLockScheduler::new();
        timer.arm(at(100), 30);
        assert!(!timer.poll(at(129)));
        assert!(!timer.poll(at(130) - 1));
        assert!(timer.poll(at(130)));
    }

    #[test]
    fn fires_once_even_when_polled_every_tick() {
        let mut timer = AutoLockScheduler::new();
        timer.arm(at(0), 5);
        let fired = (0..20).filter(|s| timer.poll(at(*s))).count();
        assert_eq!(fired, 1);
        assert!(!timer.is_active());
    }

    #[test]
    fn rearming_pushes_the_deadline() {
        let mut timer = AutoLockScheduler::new();
        timer.arm(at(0), 10);
        timer.arm(at(8), 10);
        assert!(!timer.poll(at(12)));
        assert_eq!(timer.remaining_secs(at(12)), Some(6));
        assert!(timer.poll(at(18)));
    }

    #[test]
    fn zero_duration_disables() {
        let mut timer = AutoLockScheduler::new();
        timer.arm(at(0), 0);
        assert!(!timer.is_active());
        assert!(!timer.poll(at(1_000_000)));
        assert_eq!(timer.remaining_secs(at(0)), None);
    }

    #[test]
    fn cancel_prevents_firing() {
        let mut timer = AutoLockScheduler::new();
        timer.arm(at(0), 5);
        timer.cancel();
        assert!(!timer.is_active());
        assert!(!timer.poll(at(10)));
    }
}
