// src/backend/services/lock_service.rs
// Password gate: per-owner lock sessions with inactivity auto-lock.

use crate::{
    adapter::SecretPersistence,
    error::{AccessError, AuthFailure, ValidationFailure},
    metrics::{AccessMetrics, Counter},
    models::{common::*, EngineConfig, LockPhase, LockState, StoredCredential},
    services::{auto_lock::AutoLockScheduler, SharedConfig},
    utils::{
        crypto::{hash_secret, verify_secret},
        rate_limit::AttemptThrottle,
        rng::EntropyPool,
        time::secs_to_ns,
    },
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_AUTO_LOCK_SECS: u32 = 86_400;

/// Sessions untouched for this long are dropped from memory unless they are
/// unlocked or carry failed attempts. A dropped session reopens locked.
pub const SESSION_RETENTION_SECS: u64 = 30 * 60;

/// Get/set access to the persisted credential. Holds no timers.
pub struct CredentialStore {
    persistence: Arc<dyn SecretPersistence>,
}

impl CredentialStore {
    pub fn new(persistence: Arc<dyn SecretPersistence>) -> Self {
        Self { persistence }
    }

    pub fn load(&self, owner: PrincipalId) -> Result<Option<StoredCredential>, AccessError> {
        self.persistence.load(owner)
    }

    pub fn save(&self, owner: PrincipalId, credential: &StoredCredential) -> Result<(), AccessError> {
        self.persistence.save(owner, credential)
    }

    pub fn clear(&self, owner: PrincipalId) -> Result<(), AccessError> {
        self.persistence.clear(owner)
    }
}

/// State machine of one owner's gate: `NoSecret -> Unlocked <-> Locked`.
struct LockSession {
    phase: LockPhase,
    credential: Option<StoredCredential>,
    last_activity_at: TimestampNs,
    auto_lock: AutoLockScheduler,
    throttle: AttemptThrottle,
}

impl LockSession {
    /// A session for an owner who already has a secret starts locked.
    fn open(credential: Option<StoredCredential>, now: TimestampNs) -> Self {
        let phase = if credential.is_some() { LockPhase::Locked } else { LockPhase::NoSecret };
        Self {
            phase,
            credential,
            last_activity_at: now,
            auto_lock: AutoLockScheduler::new(),
            throttle: AttemptThrottle::default(),
        }
    }

    fn auto_lock_secs(&self) -> u32 {
        self.credential.as_ref().map_or(0, |c| c.auto_lock_secs)
    }

    fn recovery_target(&self) -> Option<String> {
        self.credential.as_ref().and_then(|c| c.recovery_target.clone())
    }

    fn credential(&self) -> Result<&StoredCredential, AccessError> {
        self.credential
            .as_ref()
            .ok_or_else(|| AccessError::InvalidState("no secret is set".to_string()))
    }

    /// Applies a due auto-lock before anything else looks at the phase.
    fn expire_if_due(&mut self, now: TimestampNs) -> bool {
        if self.phase == LockPhase::Unlocked && self.auto_lock.poll(now) {
            self.phase = LockPhase::Locked;
            return true;
        }
        false
    }

    fn mark_activity(&mut self, now: TimestampNs) {
        self.last_activity_at = now;
        if self.phase == LockPhase::Unlocked {
            let secs = self.auto_lock_secs();
            self.auto_lock.arm(now, secs);
        }
    }

    fn require_unlocked(&self) -> Result<(), AccessError> {
        match self.phase {
            LockPhase::Unlocked => Ok(()),
            LockPhase::Locked => Err(AccessError::Auth(AuthFailure::Locked)),
            LockPhase::NoSecret => Err(AccessError::InvalidState("no secret is set".to_string())),
        }
    }

    fn snapshot(&self, now: TimestampNs) -> LockState {
        LockState {
            has_secret: self.credential.is_some(),
            locked: self.phase == LockPhase::Locked,
            auto_lock_secs: self.auto_lock_secs(),
            last_activity_at: self.last_activity_at,
            auto_lock_remaining_secs: self.auto_lock.remaining_secs(now),
            recovery_target: self.recovery_target(),
        }
    }
}

pub(crate) fn validate_new_secret(new: &str, confirm: &str, min_len: u32) -> Result<(), AccessError> {
    if new != confirm {
        return Err(AccessError::Validation(ValidationFailure::Mismatch));
    }
    if new.chars().count() < min_len as usize {
        return Err(AccessError::Validation(ValidationFailure::TooWeak { min_len }));
    }
    Ok(())
}

fn validate_auto_lock(secs: u32) -> Result<(), AccessError> {
    if secs > MAX_AUTO_LOCK_SECS {
        return Err(AccessError::invalid_input(format!(
            "auto-lock duration must not exceed {} seconds",
            MAX_AUTO_LOCK_SECS
        )));
    }
    Ok(())
}

struct SessionSlot {
    session: Arc<Mutex<LockSession>>,
    last_seen_at: TimestampNs,
}

/// Registry of lock sessions, one per owner. Each session has its own mutex,
/// so owners never wait on each other and every owner sees a total order of
/// transitions. Lock order is registry first, then session.
pub struct LockService {
    sessions: Mutex<HashMap<PrincipalId, SessionSlot>>,
    store: CredentialStore,
    entropy: Arc<EntropyPool>,
    config: SharedConfig,
    metrics: Arc<AccessMetrics>,
}

impl LockService {
    pub fn new(
        store: CredentialStore,
        entropy: Arc<EntropyPool>,
        config: SharedConfig,
        metrics: Arc<AccessMetrics>,
    ) -> Self {
        Self { sessions: Mutex::new(HashMap::new()), store, entropy, config, metrics }
    }

    fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    fn session(&self, owner: PrincipalId, now: TimestampNs) -> Result<Arc<Mutex<LockSession>>, AccessError> {
        if let Some(slot) = self.sessions.lock().get_mut(&owner) {
            slot.last_seen_at = slot.last_seen_at.max(now);
            return Ok(slot.session.clone());
        }

        // Persistence is read without holding the registry.
        let credential = self.store.load(owner)?;
        let mut sessions = self.sessions.lock();
        let slot = sessions.entry(owner).or_insert_with(|| {
            debug!(%owner, "lock session opened");
            SessionSlot { session: Arc::new(Mutex::new(LockSession::open(credential, now))), last_seen_at: now }
        });
        slot.last_seen_at = slot.last_seen_at.max(now);
        Ok(slot.session.clone())
    }

    fn existing(&self, owner: PrincipalId) -> Option<Arc<Mutex<LockSession>>> {
        self.sessions.lock().get(&owner).map(|slot| slot.session.clone())
    }

    fn expire(&self, session: &mut LockSession, owner: PrincipalId, now: TimestampNs) -> bool {
        let fired = session.expire_if_due(now);
        if fired {
            self.metrics.record(Counter::AutoLocks);
            info!(%owner, "auto-lock fired after inactivity");
        }
        fired
    }

    /// Sets the first secret, or replaces it while unlocked.
    pub fn set_secret(&self, owner: PrincipalId, new: &str, confirm: &str, now: TimestampNs) -> Result<LockState, AccessError> {
        let config = self.config();
        validate_new_secret(new, confirm, config.min_secret_len)?;

        let session = self.session(owner, now)?;
        let mut s = session.lock();
        self.expire(&mut s, owner, now);
        if s.phase == LockPhase::Locked {
            return Err(AccessError::Auth(AuthFailure::Locked));
        }

        let credential = StoredCredential {
            secret_hash: hash_secret(new, &config.hashing, &self.entropy)?,
            auto_lock_secs: s.credential.as_ref().map_or(config.default_auto_lock_secs, |c| c.auto_lock_secs),
            updated_at: now,
            recovery_target: s.recovery_target(),
        };
        self.store.save(owner, &credential)?;

        s.credential = Some(credential);
        s.phase = LockPhase::Unlocked;
        s.throttle.reset();
        s.mark_activity(now);
        info!(%owner, "gate secret set");
        Ok(s.snapshot(now))
    }

    /// Unlocks a locked gate. A wrong candidate leaves it locked.
    pub fn verify_secret(&self, owner: PrincipalId, candidate: &str, now: TimestampNs) -> Result<LockState, AccessError> {
        let config = self.config();
        let session = self.session(owner, now)?;
        let mut s = session.lock();
        self.expire(&mut s, owner, now);
        match s.phase {
            LockPhase::NoSecret => return Err(AccessError::InvalidState("no secret is set".to_string())),
            LockPhase::Unlocked => return Err(AccessError::InvalidState("gate is already unlocked".to_string())),
            LockPhase::Locked => {}
        }
        s.throttle.check(now)?;

        if !verify_secret(candidate, &s.credential()?.secret_hash)? {
            s.throttle.record_failure(now, &config.secret_throttle);
            self.metrics.record(Counter::SecretsRejected);
            warn!(%owner, failures = s.throttle.consecutive_failures(), "wrong gate secret");
            return Err(AccessError::Auth(AuthFailure::WrongSecret));
        }

        s.throttle.reset();
        s.phase = LockPhase::Unlocked;
        s.mark_activity(now);
        self.metrics.record(Counter::SecretsVerified);
        info!(%owner, "gate unlocked");
        Ok(s.snapshot(now))
    }

    /// Replaces the secret (and optionally the auto-lock duration) in one save.
    pub fn change_secret(
        &self,
        owner: PrincipalId,
        current: &str,
        new: &str,
        confirm: &str,
        auto_lock_secs: Option<u32>,
        now: TimestampNs,
    ) -> Result<LockState, AccessError> {
        let config = self.config();
        let session = self.session(owner, now)?;
        let mut s = session.lock();
        self.expire(&mut s, owner, now);
        s.require_unlocked()?;
        s.throttle.check(now)?;

        let existing = s.credential()?.clone();
        if !verify_secret(current, &existing.secret_hash)? {
            s.throttle.record_failure(now, &config.secret_throttle);
            self.metrics.record(Counter::SecretsRejected);
            warn!(%owner, "wrong current secret on change");
            return Err(AccessError::Auth(AuthFailure::WrongSecret));
        }
        s.throttle.reset();
        validate_new_secret(new, confirm, config.min_secret_len)?;
        if let Some(secs) = auto_lock_secs {
            validate_auto_lock(secs)?;
        }

        let credential = StoredCredential {
            secret_hash: hash_secret(new, &config.hashing, &self.entropy)?,
            auto_lock_secs: auto_lock_secs.unwrap_or(existing.auto_lock_secs),
            updated_at: now,
            recovery_target: existing.recovery_target,
        };
        self.store.save(owner, &credential)?;

        s.credential = Some(credential);
        s.mark_activity(now);
        info!(%owner, "gate secret changed");
        Ok(s.snapshot(now))
    }

    /// Replaces the secret without knowing the old one. Only reachable after
    /// a password-recovery code sent to the owner's registered recovery
    /// address has been verified.
    pub(crate) fn reset_secret(&self, owner: PrincipalId, new: &str, confirm: &str, now: TimestampNs) -> Result<LockState, AccessError> {
        let config = self.config();
        validate_new_secret(new, confirm, config.min_secret_len)?;

        let session = self.session(owner, now)?;
        let mut s = session.lock();
        self.expire(&mut s, owner, now);

        let credential = StoredCredential {
            secret_hash: hash_secret(new, &config.hashing, &self.entropy)?,
            auto_lock_secs: s.credential.as_ref().map_or(config.default_auto_lock_secs, |c| c.auto_lock_secs),
            updated_at: now,
            recovery_target: s.recovery_target(),
        };
        self.store.save(owner, &credential)?;

        s.credential = Some(credential);
        s.phase = LockPhase::Unlocked;
        s.throttle.reset();
        s.mark_activity(now);
        info!(%owner, "gate secret reset through recovery");
        Ok(s.snapshot(now))
    }

    pub fn set_auto_lock(&self, owner: PrincipalId, secs: u32, now: TimestampNs) -> Result<LockState, AccessError> {
        validate_auto_lock(secs)?;
        let session = self.session(owner, now)?;
        let mut s = session.lock();
        self.expire(&mut s, owner, now);
        s.require_unlocked()?;

        let mut credential = s.credential()?.clone();
        credential.auto_lock_secs = secs;
        credential.updated_at = now;
        self.store.save(owner, &credential)?;

        s.credential = Some(credential);
        s.mark_activity(now);
        debug!(%owner, secs, "auto-lock duration updated");
        Ok(s.snapshot(now))
    }

    /// Stores an already confirmed recovery address. Needs an open gate.
    pub(crate) fn set_recovery_target(&self, owner: PrincipalId, target: &str, now: TimestampNs) -> Result<LockState, AccessError> {
        let session = self.session(owner, now)?;
        let mut s = session.lock();
        self.expire(&mut s, owner, now);
        s.require_unlocked()?;

        let mut credential = s.credential()?.clone();
        credential.recovery_target = Some(target.to_string());
        credential.updated_at = now;
        self.store.save(owner, &credential)?;

        s.credential = Some(credential);
        s.mark_activity(now);
        info!(%owner, "recovery address registered");
        Ok(s.snapshot(now))
    }

    /// The registered recovery address, readable in any phase.
    pub fn recovery_target(&self, owner: PrincipalId, now: TimestampNs) -> Result<Option<String>, AccessError> {
        let session = self.session(owner, now)?;
        let s = session.lock();
        Ok(s.recovery_target())
    }

    /// `Unlocked -> Locked`. Locking a locked or secret-less gate is a no-op.
    pub fn lock(&self, owner: PrincipalId, now: TimestampNs) -> Result<LockState, AccessError> {
        let session = self.session(owner, now)?;
        let mut s = session.lock();
        self.expire(&mut s, owner, now);
        if s.phase == LockPhase::Unlocked {
            s.phase = LockPhase::Locked;
            s.auto_lock.cancel();
            s.last_activity_at = now;
            info!(%owner, "gate locked");
        }
        Ok(s.snapshot(now))
    }

    pub fn remove_secret(&self, owner: PrincipalId, current: &str, now: TimestampNs) -> Result<LockState, AccessError> {
        let config = self.config();
        let session = self.session(owner, now)?;
        let mut s = session.lock();
        self.expire(&mut s, owner, now);
        s.throttle.check(now)?;

        if !verify_secret(current, &s.credential()?.secret_hash)? {
            s.throttle.record_failure(now, &config.secret_throttle);
            self.metrics.record(Counter::SecretsRejected);
            warn!(%owner, "wrong secret on removal");
            return Err(AccessError::Auth(AuthFailure::WrongSecret));
        }
        self.store.clear(owner)?;

        s.credential = None;
        s.phase = LockPhase::NoSecret;
        s.auto_lock.cancel();
        s.throttle.reset();
        s.last_activity_at = now;
        info!(%owner, "gate secret removed");
        Ok(s.snapshot(now))
    }

    /// Records user activity; restarts the countdown while unlocked.
    pub fn touch_activity(&self, owner: PrincipalId, now: TimestampNs) -> Result<LockState, AccessError> {
        let session = self.session(owner, now)?;
        let mut s = session.lock();
        self.expire(&mut s, owner, now);
        if s.phase == LockPhase::Unlocked {
            s.mark_activity(now);
        }
        Ok(s.snapshot(now))
    }

    /// Gate check for protected actions. An owner without a secret is never
    /// gated; an unlocked gate counts the call as activity.
    pub fn ensure_unlocked(&self, owner: PrincipalId, now: TimestampNs) -> Result<(), AccessError> {
        let session = self.session(owner, now)?;
        let mut s = session.lock();
        self.expire(&mut s, owner, now);
        match s.phase {
            LockPhase::Locked => Err(AccessError::Auth(AuthFailure::Locked)),
            LockPhase::Unlocked => {
                s.mark_activity(now);
                Ok(())
            }
            LockPhase::NoSecret => Ok(()),
        }
    }

    pub fn status(&self, owner: PrincipalId, now: TimestampNs) -> Result<LockState, AccessError> {
        let session = self.session(owner, now)?;
        let mut s = session.lock();
        self.expire(&mut s, owner, now);
        Ok(s.snapshot(now))
    }

    /// Targeted expiry check used by a session's wake-up timer.
    pub fn poll_auto_lock(&self, owner: PrincipalId, now: TimestampNs) -> bool {
        match self.existing(owner) {
            Some(session) => self.expire(&mut session.lock(), owner, now),
            None => false,
        }
    }

    /// Locks every session whose countdown has run out.
    pub fn sweep(&self, now: TimestampNs) -> Vec<PrincipalId> {
        let sessions: Vec<_> = self
            .sessions
            .lock()
            .iter()
            .map(|(owner, slot)| (*owner, slot.session.clone()))
            .collect();
        sessions
            .into_iter()
            .filter(|(owner, session)| self.expire(&mut session.lock(), *owner, now))
            .map(|(owner, _)| owner)
            .collect()
    }

    pub fn auto_lock_deadline(&self, owner: PrincipalId) -> Option<TimestampNs> {
        let session = self.existing(owner)?;
        let deadline = session.lock().auto_lock.deadline();
        deadline
    }

    /// Drops the session; its countdown goes with it.
    pub fn end_session(&self, owner: PrincipalId) -> bool {
        let removed = self.sessions.lock().remove(&owner);
        if let Some(slot) = &removed {
            slot.session.lock().auto_lock.cancel();
            debug!(%owner, "lock session ended");
        }
        removed.is_some()
    }

    /// Drops sessions nobody has touched for `SESSION_RETENTION_SECS`.
    /// Unlocked sessions and sessions with failed attempts on record stay,
    /// as does any session a caller is holding right now.
    pub fn evict_idle(&self, now: TimestampNs) -> Vec<PrincipalId> {
        let retention = secs_to_ns(SESSION_RETENTION_SECS);
        let mut evicted = Vec::new();
        self.sessions.lock().retain(|owner, slot| {
            if now.saturating_sub(slot.last_seen_at) < retention || Arc::strong_count(&slot.session) > 1 {
                return true;
            }
            let mut s = slot.session.lock();
            self.expire(&mut s, *owner, now);
            if s.phase == LockPhase::Unlocked || s.throttle.consecutive_failures() > 0 {
                return true;
            }
            s.auto_lock.cancel();
            evicted.push(*owner);
            false
        });
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "idle lock sessions evicted");
        }
        evicted
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, principal, test_config, test_entropy, MemorySecretStore};
    use parking_lot::RwLock;
    use std::sync::mpsc;

    struct Fixture {
        service: LockService,
        store: Arc<MemorySecretStore>,
        metrics: Arc<AccessMetrics>,
    }

    fn fixture_with(config: EngineConfig) -> Fixture {
        let store = Arc::new(MemorySecretStore::default());
        let metrics = Arc::new(AccessMetrics::default());
        let service = LockService::new(
            CredentialStore::new(store.clone()),
            Arc::new(test_entropy()),
            Arc::new(RwLock::new(config)),
            metrics.clone(),
        );
        Fixture { service, store, metrics }
    }

    fn fixture() -> Fixture {
        fixture_with(test_config())
    }

    const OWNER: u8 = 1;

    #[test]
    fn new_owner_has_no_secret_and_is_never_locked() {
        let f = fixture();
        let state = f.service.status(principal(OWNER), at(0)).unwrap();
        assert_eq!(state.phase(), LockPhase::NoSecret);
        let state = f.service.lock(principal(OWNER), at(1)).unwrap();
        assert!(!state.locked);
        assert!(f.service.ensure_unlocked(principal(OWNER), at(1)).is_ok());
    }

    #[test]
    fn set_secret_validates_confirmation_then_length() {
        let f = fixture();
        assert_eq!(
            f.service.set_secret(principal(OWNER), "abcd", "abce", at(0)),
            Err(AccessError::Validation(ValidationFailure::Mismatch))
        );
        assert_eq!(
            f.service.set_secret(principal(OWNER), "abc", "abc", at(0)),
            Err(AccessError::Validation(ValidationFailure::TooWeak { min_len: 4 }))
        );
        assert!(f.store.stored(principal(OWNER)).is_none());
    }

    #[test]
    fn set_secret_unlocks_and_persists_only_a_hash() {
        let f = fixture();
        let state = f.service.set_secret(principal(OWNER), "ab12", "ab12", at(10)).unwrap();
        assert_eq!(state.phase(), LockPhase::Unlocked);
        assert_eq!(state.last_activity_at, at(10));
        assert_eq!(state.auto_lock_remaining_secs, Some(300));
        let stored = f.store.stored(principal(OWNER)).unwrap();
        assert!(!stored.secret_hash.contains("ab12"));
        assert_eq!(stored.auto_lock_secs, 300);
    }

    #[test]
    fn lock_then_verify_round_trip() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        assert!(f.service.lock(owner, at(1)).unwrap().locked);

        assert_eq!(
            f.service.verify_secret(owner, "wrong", at(2)),
            Err(AccessError::Auth(AuthFailure::WrongSecret))
        );
        assert!(f.service.status(owner, at(2)).unwrap().locked);

        let state = f.service.verify_secret(owner, "ab12", at(3)).unwrap();
        assert!(!state.locked);
        assert_eq!(state.last_activity_at, at(3));
        assert_eq!(f.metrics.get(Counter::SecretsRejected), 1);
        assert_eq!(f.metrics.get(Counter::SecretsVerified), 1);
    }

    #[test]
    fn verify_is_only_valid_while_locked() {
        let f = fixture();
        let owner = principal(OWNER);
        assert!(matches!(f.service.verify_secret(owner, "ab12", at(0)), Err(AccessError::InvalidState(_))));
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        assert!(matches!(f.service.verify_secret(owner, "ab12", at(1)), Err(AccessError::InvalidState(_))));
    }

    #[test]
    fn set_secret_is_refused_while_locked() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        f.service.lock(owner, at(1)).unwrap();
        assert_eq!(
            f.service.set_secret(owner, "zz99", "zz99", at(2)),
            Err(AccessError::Auth(AuthFailure::Locked))
        );
    }

    #[test]
    fn restarted_session_starts_locked() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        assert!(f.service.end_session(owner));
        assert!(f.service.status(owner, at(1)).unwrap().locked);
        assert!(f.service.verify_secret(owner, "ab12", at(2)).is_ok());
    }

    #[test]
    fn auto_lock_fires_at_deadline_exactly_once() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(100)).unwrap();

        assert!(!f.service.status(owner, at(399)).unwrap().locked);
        let locked_owners: usize = (399..420).map(|s| f.service.sweep(at(s)).len()).sum();
        assert_eq!(locked_owners, 1);
        assert!(f.service.status(owner, at(400)).unwrap().locked);
        assert_eq!(f.metrics.get(Counter::AutoLocks), 1);
    }

    #[test]
    fn activity_restarts_the_countdown() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        f.service.touch_activity(owner, at(250)).unwrap();
        assert!(!f.service.status(owner, at(400)).unwrap().locked);
        assert_eq!(f.service.auto_lock_deadline(owner), Some(at(550)));
        assert!(f.service.poll_auto_lock(owner, at(550)));
        assert!(!f.service.poll_auto_lock(owner, at(551)));
    }

    #[test]
    fn touch_does_not_unlock() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        f.service.lock(owner, at(1)).unwrap();
        assert!(f.service.touch_activity(owner, at(2)).unwrap().locked);
    }

    #[test]
    fn lock_wins_over_a_gate_check_at_the_deadline() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        assert!(f.service.ensure_unlocked(owner, at(299)).is_ok());
        // the check above re-armed the countdown to 599
        assert_eq!(f.service.ensure_unlocked(owner, at(599)), Err(AccessError::Auth(AuthFailure::Locked)));
    }

    #[test]
    fn lock_wins_when_sweep_and_change_race() {
        for _ in 0..20 {
            let f = fixture();
            let owner = principal(OWNER);
            f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
            let deadline = at(300);
            let (change, _) = std::thread::scope(|scope| {
                let change = scope.spawn(|| f.service.change_secret(owner, "ab12", "cd34", "cd34", None, deadline));
                let sweep = scope.spawn(|| f.service.sweep(deadline));
                (change.join().unwrap(), sweep.join().unwrap())
            });
            assert_eq!(change, Err(AccessError::Auth(AuthFailure::Locked)));
            assert!(f.service.status(owner, deadline).unwrap().locked);
            assert_eq!(f.metrics.get(Counter::AutoLocks), 1);
        }
    }

    #[test]
    fn change_secret_requires_unlocked_and_current() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        assert_eq!(
            f.service.change_secret(owner, "nope", "cd34", "cd34", None, at(1)),
            Err(AccessError::Auth(AuthFailure::WrongSecret))
        );
        f.service.lock(owner, at(2)).unwrap();
        assert_eq!(
            f.service.change_secret(owner, "ab12", "cd34", "cd34", None, at(3)),
            Err(AccessError::Auth(AuthFailure::Locked))
        );
    }

    #[test]
    fn change_secret_applies_secret_and_duration_together() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        let state = f.service.change_secret(owner, "ab12", "cd34", "cd34", Some(60), at(5)).unwrap();
        assert_eq!(state.auto_lock_secs, 60);
        assert_eq!(state.auto_lock_remaining_secs, Some(60));

        f.service.lock(owner, at(6)).unwrap();
        assert!(f.service.verify_secret(owner, "ab12", at(7)).is_err());
        assert!(f.service.verify_secret(owner, "cd34", at(8)).is_ok());
    }

    #[test]
    fn failed_save_leaves_old_secret_and_duration() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        f.store.set_failing(true);
        let err = f.service.change_secret(owner, "ab12", "cd34", "cd34", Some(60), at(5)).unwrap_err();
        assert!(err.is_retryable());
        f.store.set_failing(false);

        let state = f.service.status(owner, at(6)).unwrap();
        assert_eq!(state.auto_lock_secs, 300);
        f.service.lock(owner, at(7)).unwrap();
        assert!(f.service.verify_secret(owner, "ab12", at(8)).is_ok());
    }

    #[test]
    fn remove_secret_returns_to_no_secret() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        f.service.lock(owner, at(1)).unwrap();
        assert_eq!(
            f.service.remove_secret(owner, "bad!", at(2)),
            Err(AccessError::Auth(AuthFailure::WrongSecret))
        );
        let state = f.service.remove_secret(owner, "ab12", at(3)).unwrap();
        assert_eq!(state.phase(), LockPhase::NoSecret);
        assert_eq!(state.auto_lock_secs, 0);
        assert_eq!(state.auto_lock_remaining_secs, None);
        assert!(f.store.stored(owner).is_none());
        assert!(f.service.sweep(at(10_000)).is_empty());
    }

    #[test]
    fn repeated_wrong_secrets_are_throttled() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        f.service.lock(owner, at(0)).unwrap();
        for _ in 0..5 {
            assert_eq!(
                f.service.verify_secret(owner, "nope", at(1)),
                Err(AccessError::Auth(AuthFailure::WrongSecret))
            );
        }
        // even the right secret waits out the lockout
        assert_eq!(
            f.service.verify_secret(owner, "ab12", at(2)),
            Err(AccessError::Throttled { retry_after_secs: 29 })
        );
        assert!(f.service.verify_secret(owner, "ab12", at(31)).is_ok());
    }

    #[test]
    fn disabled_auto_lock_never_fires() {
        let f = fixture_with(EngineConfig { default_auto_lock_secs: 0, ..test_config() });
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        assert!(!f.service.status(owner, at(1_000_000)).unwrap().locked);
    }

    #[test]
    fn auto_lock_duration_is_bounded() {
        let f = fixture();
        let owner = principal(OWNER);
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        assert!(matches!(f.service.set_auto_lock(owner, 90_000, at(1)), Err(AccessError::Validation(_))));
        let state = f.service.set_auto_lock(owner, 10, at(1)).unwrap();
        assert_eq!(state.auto_lock_remaining_secs, Some(10));
        assert!(f.service.status(owner, at(11)).unwrap().locked);
    }

    #[test]
    fn recovery_address_needs_an_open_gate_and_survives_secret_changes() {
        let f = fixture();
        let owner = principal(OWNER);
        assert!(matches!(
            f.service.set_recovery_target(owner, "me@example.com", at(0)),
            Err(AccessError::InvalidState(_))
        ));
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        let state = f.service.set_recovery_target(owner, "me@example.com", at(1)).unwrap();
        assert_eq!(state.recovery_target.as_deref(), Some("me@example.com"));

        f.service.change_secret(owner, "ab12", "cd34", "cd34", None, at(2)).unwrap();
        f.service.lock(owner, at(3)).unwrap();
        assert_eq!(
            f.service.set_recovery_target(owner, "other@example.com", at(4)),
            Err(AccessError::Auth(AuthFailure::Locked))
        );
        assert!(f.service.end_session(owner));
        assert_eq!(f.service.recovery_target(owner, at(5)).unwrap().as_deref(), Some("me@example.com"));

        f.service.reset_secret(owner, "ef56", "ef56", at(6)).unwrap();
        assert_eq!(f.store.stored(owner).unwrap().recovery_target.as_deref(), Some("me@example.com"));
        f.service.remove_secret(owner, "ef56", at(7)).unwrap();
        assert_eq!(f.service.recovery_target(owner, at(8)).unwrap(), None);
    }

    #[test]
    fn idle_sessions_are_evicted_and_reopen_locked() {
        let f = fixture();
        let visitor = principal(2);
        let owner = principal(OWNER);
        f.service.status(visitor, at(0)).unwrap();
        f.service.set_secret(owner, "ab12", "ab12", at(0)).unwrap();
        f.service.lock(owner, at(1)).unwrap();

        assert!(f.service.evict_idle(at(10)).is_empty());
        assert_eq!(f.service.session_count(), 2);

        let mut evicted = f.service.evict_idle(at(SESSION_RETENTION_SECS + 1));
        evicted.sort();
        let mut expected = vec![owner, visitor];
        expected.sort();
        assert_eq!(evicted, expected);
        assert_eq!(f.service.session_count(), 0);

        assert!(f.service.status(owner, at(SESSION_RETENTION_SECS + 2)).unwrap().locked);
        assert!(f.service.verify_secret(owner, "ab12", at(SESSION_RETENTION_SECS + 3)).is_ok());
    }

    #[test]
    fn unlocked_and_failing_sessions_are_kept() {
        let f = fixture_with(EngineConfig { default_auto_lock_secs: 0, ..test_config() });
        let open = principal(OWNER);
        let guessed = principal(2);
        f.service.set_secret(open, "ab12", "ab12", at(0)).unwrap();
        f.service.set_secret(guessed, "ab12", "ab12", at(0)).unwrap();
        f.service.lock(guessed, at(1)).unwrap();
        assert!(f.service.verify_secret(guessed, "nope", at(2)).is_err());

        assert!(f.service.evict_idle(at(10_000)).is_empty());
        assert!(!f.service.status(open, at(10_001)).unwrap().locked);

        f.service.verify_secret(guessed, "ab12", at(10_002)).unwrap();
        f.service.lock(guessed, at(10_003)).unwrap();
        let later = at(10_003 + SESSION_RETENTION_SECS);
        assert_eq!(f.service.evict_idle(later), vec![guessed]);
        assert_eq!(f.service.session_count(), 1);
    }

    /// Holds the first load of `PARKED` until the test lets it go.
    struct ParkedStore {
        inner: MemorySecretStore,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    const PARKED: u8 = 9;

    impl SecretPersistence for ParkedStore {
        fn load(&self, owner: PrincipalId) -> Result<Option<StoredCredential>, AccessError> {
            if owner == principal(PARKED) {
                let _ = self.entered.lock().send(());
                let _ = self.release.lock().recv();
            }
            self.inner.load(owner)
        }

        fn save(&self, owner: PrincipalId, credential: &StoredCredential) -> Result<(), AccessError> {
            self.inner.save(owner, credential)
        }

        fn clear(&self, owner: PrincipalId) -> Result<(), AccessError> {
            self.inner.clear(owner)
        }
    }

    #[test]
    fn slow_credential_load_does_not_block_other_owners() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Arc::new(ParkedStore {
            inner: MemorySecretStore::default(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let service = LockService::new(
            CredentialStore::new(store),
            Arc::new(test_entropy()),
            Arc::new(RwLock::new(test_config())),
            Arc::new(AccessMetrics::default()),
        );
        service.set_secret(principal(OWNER), "ab12", "ab12", at(0)).unwrap();

        std::thread::scope(|scope| {
            let parked = scope.spawn(|| service.status(principal(PARKED), at(1)));
            entered_rx.recv().unwrap();
            // the registry stays usable while that load is outstanding
            assert!(service.lock(principal(OWNER), at(2)).unwrap().locked);
            release_tx.send(()).unwrap();
            assert_eq!(parked.join().unwrap().unwrap().phase(), LockPhase::NoSecret);
        });
        assert_eq!(service.session_count(), 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(24))]

            #[test]
            fn any_valid_secret_sets_and_verifies(secret in "[a-zA-Z0-9!@#]{4,24}") {
                let f = fixture();
                let owner = principal(OWNER);
                prop_assert!(f.service.set_secret(owner, &secret, &secret, at(0)).is_ok());
                f.service.lock(owner, at(1)).unwrap();
                prop_assert!(f.service.verify_secret(owner, &secret, at(2)).is_ok());
            }

            #[test]
            fn wrong_secret_never_unlocks(secret in "[a-z0-9]{4,12}", guess in "[a-z0-9]{1,12}") {
                prop_assume!(secret != guess);
                let f = fixture();
                let owner = principal(OWNER);
                f.service.set_secret(owner, &secret, &secret, at(0)).unwrap();
                f.service.lock(owner, at(1)).unwrap();
                prop_assert!(f.service.verify_secret(owner, &guess, at(2)).is_err());
                prop_assert!(f.service.status(owner, at(2)).unwrap().locked);
            }
        }
    }
}
