// src/backend/services/timers.rs
// Canister-side driver: turns engine deadlines into ic-cdk-timers wake-ups.
//
// Every wake-up goes back through the engine with the current time, and the
// engine decides whether anything is due. A wake-up that lost a race with
// the periodic sweep, a reset or a cancel is a no-op.

use crate::models::common::{MediaId, PrincipalId, TimestampNs};
use crate::models::media::MediaTimer;
use crate::state::{persist_metrics, with_engine};
use crate::utils::time::get_current_time_ns;
use ic_cdk_timers::TimerId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

thread_local! {
    static MEDIA_WAKEUPS: RefCell<HashMap<MediaId, TimerId>> = RefCell::new(HashMap::new());
    static SESSION_WAKEUPS: RefCell<HashMap<PrincipalId, TimerId>> = RefCell::new(HashMap::new());
    static SWEEP_TIMER: RefCell<Option<TimerId>> = const { RefCell::new(None) };
}

fn delay_until(deadline: TimestampNs, now: TimestampNs) -> Duration {
    Duration::from_nanos(deadline.saturating_sub(now))
}

/// (Re)schedules the wake-up for a freshly armed or reset media timer.
pub fn schedule_media_expiry(timer: &MediaTimer, now: TimestampNs) {
    let media_id = timer.media_id.clone();
    let generation = timer.generation;
    let id = ic_cdk_timers::set_timer(delay_until(timer.deadline, now), move || {
        MEDIA_WAKEUPS.with(|w| w.borrow_mut().remove(&media_id));
        let fired = with_engine(|engine| engine.fire_media_timer(&media_id, generation, get_current_time_ns()));
        if let Ok(Some(outcome)) = fired {
            if let Err(e) = outcome.deletion {
                ic_cdk::println!("WARN: Media {} expired but could not be deleted: {}", outcome.media_id, e);
            }
        }
    });
    if let Some(previous) = MEDIA_WAKEUPS.with(|w| w.borrow_mut().insert(timer.media_id.clone(), id)) {
        ic_cdk_timers::clear_timer(previous);
    }
}

pub fn clear_media_expiry(media_id: &str) {
    if let Some(previous) = MEDIA_WAKEUPS.with(|w| w.borrow_mut().remove(media_id)) {
        ic_cdk_timers::clear_timer(previous);
    }
}

/// Aligns the owner's wake-up with the current auto-lock deadline, if any.
pub fn sync_auto_lock(owner: PrincipalId, now: TimestampNs) {
    if let Some(previous) = SESSION_WAKEUPS.with(|w| w.borrow_mut().remove(&owner)) {
        ic_cdk_timers::clear_timer(previous);
    }
    let deadline = match with_engine(|engine| engine.auto_lock_deadline(owner)) {
        Ok(Some(deadline)) => deadline,
        _ => return,
    };
    let id = ic_cdk_timers::set_timer(delay_until(deadline, now), move || {
        SESSION_WAKEUPS.with(|w| w.borrow_mut().remove(&owner));
        let _ = with_engine(|engine| engine.poll_auto_lock(owner, get_current_time_ns()));
    });
    SESSION_WAKEUPS.with(|w| w.borrow_mut().insert(owner, id));
}

/// Starts (or restarts) the periodic maintenance sweep.
pub fn start_maintenance(interval_secs: u64) {
    if let Some(previous) = SWEEP_TIMER.with(|t| t.borrow_mut().take()) {
        ic_cdk_timers::clear_timer(previous);
    }
    let id = ic_cdk_timers::set_timer_interval(Duration::from_secs(interval_secs), || {
        let now = get_current_time_ns();
        if let Ok(report) = with_engine(|engine| engine.run_maintenance(now)) {
            if !report.is_idle() {
                ic_cdk::println!(
                    "⚙️ SCHEDULER: locked {} and evicted {} sessions, expired {} media ({} failed deletes), purged {} codes and {} pending actions",
                    report.sessions_locked,
                    report.sessions_evicted,
                    report.media_expired,
                    report.media_delete_failures,
                    report.codes_purged,
                    report.pending_purged
                );
            }
        }
        persist_metrics();
    });
    SWEEP_TIMER.with(|t| *t.borrow_mut() = Some(id));
}
