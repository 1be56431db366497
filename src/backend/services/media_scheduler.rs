// src/backend/services/media_scheduler.rs
// Time-to-live countdowns for creator media.

use crate::{
    adapter::ContentStore,
    error::AccessError,
    metrics::{AccessMetrics, Counter},
    models::{common::*, ExpiryOutcome, MediaTimer, TimerStatus},
    utils::time::{remaining_secs, secs_to_ns},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry of media countdowns. A timer leaves the registry under the mutex
/// before its content is deleted, so each armed deadline triggers at most one
/// delete no matter how many sweeps or wake-ups race for it.
pub struct MediaLifecycleScheduler {
    timers: Mutex<HashMap<MediaId, MediaTimer>>,
    next_generation: AtomicU64,
    content: Arc<dyn ContentStore>,
    metrics: Arc<AccessMetrics>,
}

impl MediaLifecycleScheduler {
    pub fn new(content: Arc<dyn ContentStore>, metrics: Arc<AccessMetrics>) -> Self {
        Self {
            timers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            content,
            metrics,
        }
    }

    fn build_timer(&self, media_id: &str, ttl_secs: u64, now: TimestampNs) -> MediaTimer {
        MediaTimer {
            media_id: media_id.to_string(),
            ttl_secs,
            armed_at: now,
            deadline: now.saturating_add(secs_to_ns(ttl_secs)),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Starts a countdown, replacing any countdown already running for the item.
    pub fn arm(&self, media_id: &str, ttl_secs: u64, now: TimestampNs) -> Result<MediaTimer, AccessError> {
        if media_id.trim().is_empty() {
            return Err(AccessError::invalid_input("media id must not be empty"));
        }
        if ttl_secs == 0 {
            return Err(AccessError::invalid_input("media time-to-live must be positive"));
        }
        let timer = self.build_timer(media_id, ttl_secs, now);
        self.timers.lock().insert(media_id.to_string(), timer.clone());
        info!(media_id, ttl_secs, deadline = timer.deadline, "media timer armed");
        Ok(timer)
    }

    /// Re-arms a running countdown from `now` with a new time-to-live.
    pub fn reset(&self, media_id: &str, ttl_secs: u64, now: TimestampNs) -> Result<MediaTimer, AccessError> {
        if ttl_secs == 0 {
            return Err(AccessError::invalid_input("media time-to-live must be positive"));
        }
        let mut timers = self.timers.lock();
        if !timers.contains_key(media_id) {
            return Err(AccessError::NotFound(format!("no active timer for media {}", media_id)));
        }
        let timer = self.build_timer(media_id, ttl_secs, now);
        timers.insert(media_id.to_string(), timer.clone());
        debug!(media_id, deadline = timer.deadline, "media timer reset");
        Ok(timer)
    }

    /// Stops the countdown. Unknown ids are not an error.
    pub fn cancel(&self, media_id: &str) -> bool {
        let cancelled = self.timers.lock().remove(media_id).is_some();
        if cancelled {
            debug!(media_id, "media timer cancelled");
        }
        cancelled
    }

    pub fn remaining(&self, media_id: &str, now: TimestampNs) -> TimerStatus {
        match self.timers.lock().get(media_id) {
            Some(timer) => TimerStatus::Active {
                remaining_secs: remaining_secs(timer.deadline, now),
                deadline: timer.deadline,
            },
            None => TimerStatus::Inactive,
        }
    }

    /// Expires every timer whose deadline has been reached.
    pub fn fire_due(&self, now: TimestampNs) -> Vec<ExpiryOutcome> {
        let due: Vec<MediaTimer> = {
            let mut timers = self.timers.lock();
            let ids: Vec<MediaId> = timers
                .values()
                .filter(|t| now >= t.deadline)
                .map(|t| t.media_id.clone())
                .collect();
            ids.iter().filter_map(|id| timers.remove(id)).collect()
        };
        due.into_iter().map(|timer| self.expire(timer, now)).collect()
    }

    /// Expires one timer, but only if `generation` is still the armed one and
    /// its deadline has been reached. Stale wake-ups return `None`.
    pub fn fire(&self, media_id: &str, generation: u64, now: TimestampNs) -> Option<ExpiryOutcome> {
        let timer = {
            let mut timers = self.timers.lock();
            match timers.get(media_id) {
                Some(t) if t.generation == generation && now >= t.deadline => timers.remove(media_id),
                _ => None,
            }
        }?;
        Some(self.expire(timer, now))
    }

    fn expire(&self, timer: MediaTimer, now: TimestampNs) -> ExpiryOutcome {
        let deletion = self.content.delete(&timer.media_id);
        match &deletion {
            Ok(()) => {
                self.metrics.record(Counter::MediaExpired);
                info!(media_id = %timer.media_id, "media expired and deleted");
            }
            Err(e) => {
                self.metrics.record(Counter::MediaDeleteFailures);
                warn!(media_id = %timer.media_id, error = %e, "media expired but deletion failed");
            }
        }
        ExpiryOutcome { media_id: timer.media_id, fired_at: now, deletion }
    }

    /// Running timers, soonest deadline first.
    pub fn active_timers(&self) -> Vec<MediaTimer> {
        let mut timers: Vec<MediaTimer> = self.timers.lock().values().cloned().collect();
        timers.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.media_id.cmp(&b.media_id)));
        timers
    }

    pub fn next_deadline(&self) -> Option<TimestampNs> {
        self.timers.lock().values().map(|t| t.deadline).min()
    }
}
