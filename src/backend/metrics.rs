// src/backend/metrics.rs
use crate::models::common::TimestampNs;
use candid::{CandidType, Deserialize};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Events counted by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    CodesIssued,
    CodesVerified,
    CodesRejected,
    SecretsVerified,
    SecretsRejected,
    AutoLocks,
    MediaExpired,
    MediaDeleteFailures,
    DebitsAccepted,
    DebitsDenied,
    CreditsApplied,
}

const COUNTERS: usize = 11;

impl Counter {
    fn index(self) -> usize {
        self as usize
    }
}

/// Lock-free counters shared by every service of one engine.
#[derive(Debug, Default)]
pub struct AccessMetrics {
    counters: [AtomicU64; COUNTERS],
    last_maintenance_at: AtomicU64,
}

impl AccessMetrics {
    /// Rebuilds the counters from a persisted snapshot (after an upgrade).
    pub fn from_snapshot(snapshot: &MetricsSnapshot) -> Self {
        let metrics = Self::default();
        let values = [
            (Counter::CodesIssued, snapshot.codes_issued),
            (Counter::CodesVerified, snapshot.codes_verified),
            (Counter::CodesRejected, snapshot.codes_rejected),
            (Counter::SecretsVerified, snapshot.secrets_verified),
            (Counter::SecretsRejected, snapshot.secrets_rejected),
            (Counter::AutoLocks, snapshot.auto_locks),
            (Counter::MediaExpired, snapshot.media_expired),
            (Counter::MediaDeleteFailures, snapshot.media_delete_failures),
            (Counter::DebitsAccepted, snapshot.debits_accepted),
            (Counter::DebitsDenied, snapshot.debits_denied),
            (Counter::CreditsApplied, snapshot.credits_applied),
        ];
        for (counter, value) in values {
            metrics.counters[counter.index()].store(value, Ordering::Relaxed);
        }
        if let Some(at) = snapshot.last_maintenance_at {
            metrics.last_maintenance_at.store(at, Ordering::Relaxed);
        }
        metrics
    }

    pub fn record(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn mark_maintenance(&self, now: TimestampNs) {
        self.last_maintenance_at.store(now, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last = self.last_maintenance_at.load(Ordering::Relaxed);
        MetricsSnapshot {
            codes_issued: self.get(Counter::CodesIssued),
            codes_verified: self.get(Counter::CodesVerified),
            codes_rejected: self.get(Counter::CodesRejected),
            secrets_verified: self.get(Counter::SecretsVerified),
            secrets_rejected: self.get(Counter::SecretsRejected),
            auto_locks: self.get(Counter::AutoLocks),
            media_expired: self.get(Counter::MediaExpired),
            media_delete_failures: self.get(Counter::MediaDeleteFailures),
            debits_accepted: self.get(Counter::DebitsAccepted),
            debits_denied: self.get(Counter::DebitsDenied),
            credits_applied: self.get(Counter::CreditsApplied),
            last_maintenance_at: (last != 0).then_some(last),
        }
    }
}

// Candid view of the counters, also what gets persisted across upgrades
#[derive(CandidType, Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub codes_issued: u64,
    pub codes_verified: u64,
    pub codes_rejected: u64,
    pub secrets_verified: u64,
    pub secrets_rejected: u64,
    pub auto_locks: u64,
    pub media_expired: u64,
    pub media_delete_failures: u64,
    pub debits_accepted: u64,
    pub debits_denied: u64,
    pub credits_applied: u64,
    pub last_maintenance_at: Option<TimestampNs>, // Timestamp of last maintenance run
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_through_restore() {
        let metrics = AccessMetrics::default();
        metrics.record(Counter::CodesIssued);
        metrics.add(Counter::MediaExpired, 3);
        metrics.mark_maintenance(42);

        let restored = AccessMetrics::from_snapshot(&metrics.snapshot());
        assert_eq!(restored.get(Counter::CodesIssued), 1);
        assert_eq!(restored.get(Counter::MediaExpired), 3);
        assert_eq!(restored.snapshot().last_maintenance_at, Some(42));
    }

    #[test]
    fn fresh_metrics_have_no_maintenance_run() {
        assert_eq!(AccessMetrics::default().snapshot(), MetricsSnapshot::default());
    }
}
