// src/backend/services/scheduler.rs
// Periodic maintenance: the catch-all sweep behind the per-deadline timers.

use crate::models::common::TimestampNs;
use crate::services::engine::AccessEngine;
use candid::CandidType;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub sessions_locked: u32,
    pub sessions_evicted: u32,
    pub media_expired: u32,
    pub media_delete_failures: u32,
    pub codes_purged: u32,
    pub pending_purged: u32,
    pub ran_at: TimestampNs,
}

impl MaintenanceReport {
    pub fn is_idle(&self) -> bool {
        self.sessions_locked == 0
            && self.sessions_evicted == 0
            && self.media_expired == 0
            && self.media_delete_failures == 0
            && self.codes_purged == 0
            && self.pending_purged == 0
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Runs every time-driven task once.
///
/// Safe to call at any frequency and concurrently with the targeted timers:
/// each auto-lock and each media deletion fires at most once no matter who
/// gets to it first.
///
/// # Arguments
/// * `engine` - The engine to maintain.
/// * `now` - Current time in nanoseconds.
///
/// # Returns
/// * `MaintenanceReport` - What this pass did.
pub fn perform_maintenance(engine: &AccessEngine, now: TimestampNs) -> MaintenanceReport {
    // 1. Lock sessions whose inactivity countdown ran out, then forget idle ones
    let sessions_locked = count(engine.sweep_sessions(now).len());
    let sessions_evicted = count(engine.evict_idle_sessions(now).len());

    // 2. Expire media whose time-to-live ran out
    let outcomes = engine.expire_due_media(now);
    let media_delete_failures = count(outcomes.iter().filter(|o| o.deletion.is_err()).count());
    let media_expired = count(outcomes.len()) - media_delete_failures;

    // 3. Drop dead code slots and stale pending actions
    let codes_purged = count(engine.purge_codes(now));
    let pending_purged = count(engine.purge_pending(now));

    engine.metrics().mark_maintenance(now);
    let report = MaintenanceReport {
        sessions_locked,
        sessions_evicted,
        media_expired,
        media_delete_failures,
        codes_purged,
        pending_purged,
        ran_at: now,
    };
    if !report.is_idle() {
        info!(
            sessions_locked,
            sessions_evicted,
            media_expired,
            media_delete_failures,
            codes_purged,
            pending_purged,
            "maintenance pass completed"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CodePurpose;
    use crate::services::engine::Collaborators;
    use crate::services::lock_service::SESSION_RETENTION_SECS;
    use crate::testing::{
        at, principal, test_config, test_entropy, MemoryBalanceStore, MemorySecretStore, RecordingContentStore,
        RecordingNotifier,
    };
    use std::sync::Arc;

    fn engine(content: Arc<RecordingContentStore>) -> AccessEngine {
        AccessEngine::new(
            test_config(),
            Arc::new(test_entropy()),
            Collaborators {
                notifier: Arc::new(RecordingNotifier::default()),
                secrets: Arc::new(MemorySecretStore::default()),
                content,
                balances: Arc::new(MemoryBalanceStore::default()),
            },
        )
    }

    #[test]
    fn idle_engine_reports_nothing() {
        let engine = engine(Arc::new(RecordingContentStore::default()));
        let report = perform_maintenance(&engine, at(10));
        assert!(report.is_idle());
        assert_eq!(engine.metrics().snapshot().last_maintenance_at, Some(at(10)));
    }

    #[test]
    fn one_pass_covers_every_task() {
        let content = Arc::new(RecordingContentStore::default());
        let engine = engine(content.clone());
        engine.set_secret(principal(1), "ab12", "ab12", at(0)).unwrap();
        engine.arm_media_timer("ok", 10, at(0)).unwrap();
        engine.issue_code(principal(2), CodePurpose::EmailValidate, "a@example.com", at(0)).unwrap();

        let report = perform_maintenance(&engine, at(301));
        assert_eq!(report.sessions_locked, 1);
        assert_eq!(report.media_expired, 1);
        assert_eq!(report.codes_purged, 1);
        assert_eq!(content.delete_count("ok"), 1);

        assert!(perform_maintenance(&engine, at(302)).is_idle());
    }

    #[test]
    fn deletion_failures_are_counted_separately() {
        let content = Arc::new(RecordingContentStore::default());
        content.set_failing(true);
        let engine = engine(content);
        engine.arm_media_timer("broken", 1, at(0)).unwrap();
        let report = perform_maintenance(&engine, at(1));
        assert_eq!(report.media_expired, 0);
        assert_eq!(report.media_delete_failures, 1);
    }

    #[test]
    fn idle_sessions_are_evicted_by_maintenance() {
        let engine = engine(Arc::new(RecordingContentStore::default()));
        engine.lock_status(principal(3), at(0)).unwrap();
        engine.lock_status(principal(4), at(0)).unwrap();
        assert_eq!(engine.session_count(), 2);

        let report = perform_maintenance(&engine, at(SESSION_RETENTION_SECS));
        assert_eq!(report.sessions_evicted, 2);
        assert_eq!(engine.session_count(), 0);
    }
}
