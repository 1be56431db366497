// src/backend/utils/rate_limit.rs
use crate::error::AccessError;
use crate::models::common::{PrincipalId, TimestampNs, NANOS_PER_SEC};
use crate::models::config::ThrottleConfig;
use crate::utils::time::{remaining_secs, secs_to_ns};
use std::cell::RefCell;
use std::collections::HashMap;

// --- Endpoint rate limiting ---
const RATE_LIMIT_CAPACITY: u32 = 10; // Max tokens in bucket (burst capacity)
const RATE_LIMIT_REFILL_RATE_PER_SEC: f64 = 0.2; // One code request every 5s sustained

pub struct TokenBucket {
    tokens: f64,
    last_refill_time_ns: TimestampNs,
}

impl TokenBucket {
    pub fn new(now: TimestampNs) -> Self {
        TokenBucket {
            tokens: RATE_LIMIT_CAPACITY as f64,
            last_refill_time_ns: now,
        }
    }

    fn refill(&mut self, now: TimestampNs) {
        let elapsed_secs = now.saturating_sub(self.last_refill_time_ns) as f64 / NANOS_PER_SEC as f64;
        let tokens_to_add = elapsed_secs * RATE_LIMIT_REFILL_RATE_PER_SEC;

        self.tokens = (self.tokens + tokens_to_add).min(RATE_LIMIT_CAPACITY as f64);
        self.last_refill_time_ns = now;
    }

    pub fn take(&mut self, now: TimestampNs) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

thread_local! {
    // In-memory map for rate limiting. Cleared on upgrade.
    static PRINCIPAL_BUCKETS: RefCell<HashMap<PrincipalId, TokenBucket>> = RefCell::new(HashMap::new());
}

/// Limits how often a principal may ask for codes to be sent.
pub fn rate_guard(caller: PrincipalId, now: TimestampNs) -> Result<(), AccessError> {
    PRINCIPAL_BUCKETS.with(|buckets_refcell| {
        let mut buckets = buckets_refcell.borrow_mut();
        let bucket = buckets.entry(caller).or_insert_with(|| TokenBucket::new(now));

        if bucket.take(now) {
            Ok(())
        } else {
            Err(AccessError::RateLimitExceeded(format!(
                "Too many code requests from principal {}. Please try again later.",
                caller
            )))
        }
    })
}

// --- Secret verification backoff ---

/// Consecutive-failure counter guarding secret verification.
#[derive(Debug, Clone, Default)]
pub struct AttemptThrottle {
    consecutive_failures: u32,
    blocked_until: Option<TimestampNs>,
}

impl AttemptThrottle {
    /// Fails with `Throttled` while a lockout window is open.
    pub fn check(&self, now: TimestampNs) -> Result<(), AccessError> {
        match self.blocked_until {
            Some(until) if now < until => Err(AccessError::Throttled {
                retry_after_secs: remaining_secs(until, now),
            }),
            _ => Ok(()),
        }
    }

    pub fn record_failure(&mut self, now: TimestampNs, config: &ThrottleConfig) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.consecutive_failures < config.max_failures {
            return;
        }
        let doublings = (self.consecutive_failures - config.max_failures).min(16);
        let lockout = config
            .base_lockout_secs
            .saturating_mul(1u64 << doublings)
            .min(config.max_lockout_secs);
        self.blocked_until = Some(now.saturating_add(secs_to_ns(lockout)));
    }

    pub fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.blocked_until = None;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
