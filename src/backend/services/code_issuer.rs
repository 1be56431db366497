// src/backend/services/code_issuer.rs
// One-time verification codes for every purpose that needs one.

use crate::{
    adapter::NotificationSender,
    error::{AccessError, AuthFailure},
    metrics::{AccessMetrics, Counter},
    models::{common::*, CodePurpose, CodeStatus, CodeTicket, VerificationCode, VerifiedCode},
    services::SharedConfig,
    utils::{
        crypto::{calculate_sha256_hex, code_digest, digests_match, generate_numeric_code},
        rng::EntropyPool,
        time::{remaining_secs, secs_to_ns},
    },
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::ValidateEmail;

/// How long a consumed slot is kept after its expiry so a pending action can
/// still see that the code was confirmed.
const CONSUMED_RETENTION_SECS: u64 = 30 * 60;

/// Slots are private to the principal that asked for the code.
type SlotKey = (PrincipalId, CodePurpose, String);

/// Trims and lower-cases an address; rejects anything that is not one.
pub fn normalize_target(target: &str) -> Result<String, AccessError> {
    let normalized = target.trim().to_lowercase();
    if !normalized.validate_email() {
        return Err(AccessError::invalid_input("target is not a valid e-mail address"));
    }
    Ok(normalized)
}

/// Short, stable handle for an address in logs.
fn fingerprint(target: &str) -> String {
    calculate_sha256_hex(target.as_bytes())[..12].to_string()
}

/// Issues, delivers and verifies codes. At most one live code exists per
/// `(owner, purpose, target)`; issuing again replaces it. One owner can
/// never see, replace or burn another owner's code.
pub struct CodeIssuer {
    slots: Mutex<HashMap<SlotKey, VerificationCode>>,
    next_id: AtomicU64,
    entropy: Arc<EntropyPool>,
    sender: Arc<dyn NotificationSender>,
    config: SharedConfig,
    metrics: Arc<AccessMetrics>,
}

impl CodeIssuer {
    pub fn new(
        entropy: Arc<EntropyPool>,
        sender: Arc<dyn NotificationSender>,
        config: SharedConfig,
        metrics: Arc<AccessMetrics>,
    ) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            entropy,
            sender,
            config,
            metrics,
        }
    }

    /// Issues a fresh code, unconditionally replacing any previous one.
    ///
    /// # Returns
    /// * `Result<CodeTicket, AccessError>` - The ticket; the digits only go to the notification channel.
    pub fn issue(&self, owner: PrincipalId, purpose: CodePurpose, target: &str, now: TimestampNs) -> Result<CodeTicket, AccessError> {
        self.install_and_send(owner, purpose, target, now, false)
    }

    /// Issues a replacement code once the resend cooldown has passed.
    /// Without an earlier code this behaves like `issue`.
    pub fn resend(&self, owner: PrincipalId, purpose: CodePurpose, target: &str, now: TimestampNs) -> Result<CodeTicket, AccessError> {
        self.install_and_send(owner, purpose, target, now, true)
    }

    fn install_and_send(
        &self,
        owner: PrincipalId,
        purpose: CodePurpose,
        target: &str,
        now: TimestampNs,
        respect_cooldown: bool,
    ) -> Result<CodeTicket, AccessError> {
        let target = normalize_target(target)?;
        let policy = *self.config.read().code_policies.for_purpose(purpose);
        let code = generate_numeric_code(&self.entropy)?;
        let key = (owner, purpose, target.clone());

        let slot = VerificationCode {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            purpose,
            target: target.clone(),
            code_digest: code_digest(&code),
            issued_at: now,
            expires_at: now.saturating_add(secs_to_ns(policy.ttl_secs)),
            resend_available_at: now.saturating_add(secs_to_ns(policy.cooldown_secs())),
            consumed: false,
            failed_attempts: 0,
        };
        let ticket = slot.ticket();

        // Cooldown check and install happen under one lock.
        let previous = {
            let mut slots = self.slots.lock();
            if respect_cooldown {
                if let Some(existing) = slots.get(&key) {
                    if now < existing.resend_available_at {
                        return Err(AccessError::Cooldown {
                            remaining_secs: remaining_secs(existing.resend_available_at, now),
                        });
                    }
                }
            }
            slots.insert(key.clone(), slot)
        };

        if let Err(e) = self.sender.send_code(&target, purpose, &code) {
            let mut slots = self.slots.lock();
            // Only undo our own slot; a concurrent issue may have replaced it.
            if slots.get(&key).map(|s| s.id) == Some(ticket.id) {
                match previous {
                    Some(previous) => slots.insert(key, previous),
                    None => slots.remove(&key),
                };
            }
            warn!(%owner, %purpose, target = %fingerprint(&target), error = %e, "code delivery failed");
            return Err(e);
        }

        self.metrics.record(Counter::CodesIssued);
        info!(%owner, %purpose, target = %fingerprint(&target), code_id = ticket.id, "verification code issued");
        Ok(ticket)
    }

    /// Checks a candidate code and consumes the slot on success.
    pub fn verify(
        &self,
        owner: PrincipalId,
        purpose: CodePurpose,
        target: &str,
        candidate: &str,
        now: TimestampNs,
    ) -> Result<VerifiedCode, AccessError> {
        let target = normalize_target(target)?;
        let max_attempts = self.config.read().max_code_attempts;
        let mut slots = self.slots.lock();
        let slot = slots
            .get_mut(&(owner, purpose, target.clone()))
            .ok_or_else(|| AccessError::NotFound(format!("no {} code was issued for this target", purpose)))?;

        if slot.consumed {
            self.metrics.record(Counter::CodesRejected);
            return Err(AccessError::Auth(AuthFailure::WrongCode));
        }
        if now > slot.expires_at {
            self.metrics.record(Counter::CodesRejected);
            return Err(AccessError::Expired(format!("{} code has expired", purpose)));
        }
        if slot.failed_attempts >= max_attempts {
            self.metrics.record(Counter::CodesRejected);
            return Err(AccessError::Auth(AuthFailure::TooManyAttempts));
        }
        if !digests_match(&slot.code_digest, &code_digest(candidate)) {
            slot.failed_attempts += 1;
            self.metrics.record(Counter::CodesRejected);
            debug!(%owner, %purpose, target = %fingerprint(&target), attempts = slot.failed_attempts, "wrong code");
            return Err(AccessError::Auth(AuthFailure::WrongCode));
        }

        slot.consumed = true;
        self.metrics.record(Counter::CodesVerified);
        info!(%owner, %purpose, target = %fingerprint(&target), code_id = slot.id, "verification code confirmed");
        Ok(VerifiedCode { id: slot.id, purpose, target, verified_at: now })
    }

    /// Drops the slot. Returns whether one existed.
    pub fn cancel(&self, owner: PrincipalId, purpose: CodePurpose, target: &str) -> Result<bool, AccessError> {
        let target = normalize_target(target)?;
        Ok(self.slots.lock().remove(&(owner, purpose, target)).is_some())
    }

    pub fn status(&self, owner: PrincipalId, purpose: CodePurpose, target: &str, now: TimestampNs) -> Result<CodeStatus, AccessError> {
        let target = normalize_target(target)?;
        let max_attempts = self.config.read().max_code_attempts;
        let slots = self.slots.lock();
        let slot = slots
            .get(&(owner, purpose, target))
            .ok_or_else(|| AccessError::NotFound(format!("no {} code was issued for this target", purpose)))?;
        Ok(CodeStatus {
            id: slot.id,
            consumed: slot.consumed,
            expires_in_secs: remaining_secs(slot.expires_at, now),
            resend_in_secs: remaining_secs(slot.resend_available_at, now),
            attempts_left: max_attempts.saturating_sub(slot.failed_attempts),
        })
    }

    /// True once the code with this id was confirmed and is still on record.
    pub fn is_consumed(&self, owner: PrincipalId, purpose: CodePurpose, target: &str, code_id: CodeId) -> Result<bool, AccessError> {
        let target = normalize_target(target)?;
        Ok(self
            .slots
            .lock()
            .get(&(owner, purpose, target))
            .map_or(false, |slot| slot.id == code_id && slot.consumed))
    }

    /// Removes slots that can no longer be verified nor hold back a resend.
    pub fn purge_expired(&self, now: TimestampNs) -> usize {
        let retention = secs_to_ns(CONSUMED_RETENTION_SECS);
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| {
            if slot.consumed {
                now <= slot.expires_at.saturating_add(retention)
            } else {
                now <= slot.expires_at || now < slot.resend_available_at
            }
        });
        let purged = before - slots.len();
        if purged > 0 {
            debug!(purged, "expired verification codes purged");
        }
        purged
    }
}
