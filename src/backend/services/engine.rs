// src/backend/services/engine.rs
// Caller-facing access engine: one object composing the gate, the codes,
// the media timers and the credit ledger.

use crate::{
    adapter::{BalancePersistence, ContentStore, NotificationSender, SecretPersistence},
    error::{AccessError, AuthFailure},
    metrics::{AccessMetrics, Counter},
    models::{
        common::*, CodePurpose, CodeStatus, CodeTicket, EngineConfig, ExpiryOutcome, GateDecision,
        GateRequirement, LedgerReceipt, LockState, MediaTimer, PendingAction, PendingActionKind,
        ResumedAction, TimerStatus, VerifiedCode,
    },
    services::{
        code_issuer::{normalize_target, CodeIssuer},
        credit_ledger::{CreditGate, CreditLedger},
        lock_service::{validate_new_secret, CredentialStore, LockService},
        media_scheduler::MediaLifecycleScheduler,
        pending::PendingActions,
        scheduler::{perform_maintenance, MaintenanceReport},
        SharedConfig,
    },
    utils::rng::EntropyPool,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::Validate;

/// The four boundary implementations an engine is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub notifier: Arc<dyn NotificationSender>,
    pub secrets: Arc<dyn SecretPersistence>,
    pub content: Arc<dyn ContentStore>,
    pub balances: Arc<dyn BalancePersistence>,
}

pub struct AccessEngine {
    config: SharedConfig,
    lock: LockService,
    codes: CodeIssuer,
    media: MediaLifecycleScheduler,
    ledger: Arc<CreditLedger>,
    gate: CreditGate,
    pending: PendingActions,
    metrics: Arc<AccessMetrics>,
}

impl AccessEngine {
    pub fn new(config: EngineConfig, entropy: Arc<EntropyPool>, collaborators: Collaborators) -> Self {
        Self::with_metrics(config, entropy, collaborators, Arc::new(AccessMetrics::default()))
    }

    /// Builds an engine that keeps counting into existing metrics.
    pub fn with_metrics(
        config: EngineConfig,
        entropy: Arc<EntropyPool>,
        collaborators: Collaborators,
        metrics: Arc<AccessMetrics>,
    ) -> Self {
        let config: SharedConfig = Arc::new(RwLock::new(config));
        let ledger = Arc::new(CreditLedger::new(collaborators.balances));
        Self {
            lock: LockService::new(
                CredentialStore::new(collaborators.secrets),
                entropy.clone(),
                config.clone(),
                metrics.clone(),
            ),
            codes: CodeIssuer::new(entropy, collaborators.notifier, config.clone(), metrics.clone()),
            media: MediaLifecycleScheduler::new(collaborators.content, metrics.clone()),
            gate: CreditGate::new(ledger.clone()),
            ledger,
            pending: PendingActions::default(),
            config,
            metrics,
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config.read().clone()
    }

    /// Swaps in a new configuration. Running countdowns keep their deadlines;
    /// new values apply from the next arm or issue.
    pub fn update_config(&self, config: EngineConfig) -> Result<(), AccessError> {
        config
            .validate()
            .map_err(|e| AccessError::invalid_input(format!("invalid engine config: {}", e)))?;
        *self.config.write() = config;
        info!("engine configuration updated");
        Ok(())
    }

    pub fn metrics(&self) -> &AccessMetrics {
        &self.metrics
    }

    // --- Password gate ---

    pub fn set_secret(&self, owner: PrincipalId, new: &str, confirm: &str, now: TimestampNs) -> Result<LockState, AccessError> {
        self.lock.set_secret(owner, new, confirm, now)
    }

    pub fn verify_secret(&self, owner: PrincipalId, candidate: &str, now: TimestampNs) -> Result<LockState, AccessError> {
        self.lock.verify_secret(owner, candidate, now)
    }

    pub fn change_secret(
        &self,
        owner: PrincipalId,
        current: &str,
        new: &str,
        confirm: &str,
        auto_lock_secs: Option<u32>,
        now: TimestampNs,
    ) -> Result<LockState, AccessError> {
        self.lock.change_secret(owner, current, new, confirm, auto_lock_secs, now)
    }

    pub fn set_auto_lock(&self, owner: PrincipalId, secs: u32, now: TimestampNs) -> Result<LockState, AccessError> {
        self.lock.set_auto_lock(owner, secs, now)
    }

    pub fn remove_secret(&self, owner: PrincipalId, current: &str, now: TimestampNs) -> Result<LockState, AccessError> {
        self.lock.remove_secret(owner, current, now)
    }

    pub fn lock(&self, owner: PrincipalId, now: TimestampNs) -> Result<LockState, AccessError> {
        self.lock.lock(owner, now)
    }

    pub fn touch_activity(&self, owner: PrincipalId, now: TimestampNs) -> Result<LockState, AccessError> {
        self.lock.touch_activity(owner, now)
    }

    pub fn ensure_unlocked(&self, owner: PrincipalId, now: TimestampNs) -> Result<(), AccessError> {
        self.lock.ensure_unlocked(owner, now)
    }

    pub fn lock_status(&self, owner: PrincipalId, now: TimestampNs) -> Result<LockState, AccessError> {
        self.lock.status(owner, now)
    }

    /// Binds the address password recovery will trust. The gate must be
    /// open and the owner must have confirmed an `EmailValidate` code sent
    /// to that address.
    pub fn register_recovery_address(
        &self,
        owner: PrincipalId,
        target: &str,
        code: &str,
        now: TimestampNs,
    ) -> Result<LockState, AccessError> {
        // Checked up front so a locked owner cannot burn the code.
        let state = self.lock.status(owner, now)?;
        if !state.has_secret {
            return Err(AccessError::InvalidState("no secret is set".to_string()));
        }
        if state.locked {
            return Err(AccessError::Auth(AuthFailure::Locked));
        }
        let verified = self.codes.verify(owner, CodePurpose::EmailValidate, target, code, now)?;
        self.lock.set_recovery_target(owner, &verified.target, now)
    }

    /// Replaces a forgotten secret once a password-recovery code sent to the
    /// owner's registered recovery address has been confirmed. Works whether
    /// or not the gate is locked.
    ///
    /// # Arguments
    /// * `owner` - Principal whose secret is replaced.
    /// * `target` - Recovery address the code was sent to.
    /// * `code` - The code as typed by the user.
    ///
    /// # Returns
    /// * `Result<LockState, AccessError>` - The unlocked session on success.
    pub fn recover_secret(
        &self,
        owner: PrincipalId,
        target: &str,
        code: &str,
        new: &str,
        confirm: &str,
        now: TimestampNs,
    ) -> Result<LockState, AccessError> {
        // A rejected new secret must not burn the code.
        validate_new_secret(new, confirm, self.config.read().min_secret_len)?;
        let registered = self
            .lock
            .recovery_target(owner, now)?
            .ok_or_else(|| AccessError::InvalidState("no recovery address is registered".to_string()))?;
        if normalize_target(target)? != registered {
            warn!(%owner, "recovery attempted through an unregistered address");
            return Err(AccessError::NotAuthorized("address is not the registered recovery address".to_string()));
        }
        self.codes.verify(owner, CodePurpose::PasswordRecovery, &registered, code, now)?;
        self.lock.reset_secret(owner, new, confirm, now)
    }

    /// Forgets the owner's session along with everything parked behind it.
    pub fn end_session(&self, owner: PrincipalId) -> bool {
        let discarded = self.pending.discard_owner(owner);
        if discarded > 0 {
            debug!(%owner, discarded, "pending actions dropped with the session");
        }
        self.lock.end_session(owner)
    }

    pub fn auto_lock_deadline(&self, owner: PrincipalId) -> Option<TimestampNs> {
        self.lock.auto_lock_deadline(owner)
    }

    pub fn poll_auto_lock(&self, owner: PrincipalId, now: TimestampNs) -> bool {
        self.lock.poll_auto_lock(owner, now)
    }

    pub fn sweep_sessions(&self, now: TimestampNs) -> Vec<PrincipalId> {
        self.lock.sweep(now)
    }

    pub fn evict_idle_sessions(&self, now: TimestampNs) -> Vec<PrincipalId> {
        self.lock.evict_idle(now)
    }

    pub fn session_count(&self) -> usize {
        self.lock.session_count()
    }

    // --- Verification codes ---

    pub fn issue_code(&self, owner: PrincipalId, purpose: CodePurpose, target: &str, now: TimestampNs) -> Result<CodeTicket, AccessError> {
        self.codes.issue(owner, purpose, target, now)
    }

    pub fn verify_code(
        &self,
        owner: PrincipalId,
        purpose: CodePurpose,
        target: &str,
        code: &str,
        now: TimestampNs,
    ) -> Result<VerifiedCode, AccessError> {
        self.codes.verify(owner, purpose, target, code, now)
    }

    pub fn resend_code(&self, owner: PrincipalId, purpose: CodePurpose, target: &str, now: TimestampNs) -> Result<CodeTicket, AccessError> {
        self.codes.resend(owner, purpose, target, now)
    }

    pub fn cancel_code(&self, owner: PrincipalId, purpose: CodePurpose, target: &str) -> Result<bool, AccessError> {
        self.codes.cancel(owner, purpose, target)
    }

    pub fn code_status(&self, owner: PrincipalId, purpose: CodePurpose, target: &str, now: TimestampNs) -> Result<CodeStatus, AccessError> {
        self.codes.status(owner, purpose, target, now)
    }

    pub fn purge_codes(&self, now: TimestampNs) -> usize {
        self.codes.purge_expired(now)
    }

    // --- Media timers ---

    pub fn arm_media_timer(&self, media_id: &str, ttl_secs: u64, now: TimestampNs) -> Result<MediaTimer, AccessError> {
        self.media.arm(media_id, ttl_secs, now)
    }

    pub fn reset_media_timer(&self, media_id: &str, ttl_secs: u64, now: TimestampNs) -> Result<MediaTimer, AccessError> {
        self.media.reset(media_id, ttl_secs, now)
    }

    pub fn cancel_media_timer(&self, media_id: &str) -> bool {
        self.media.cancel(media_id)
    }

    pub fn media_timer_status(&self, media_id: &str, now: TimestampNs) -> TimerStatus {
        self.media.remaining(media_id, now)
    }

    pub fn active_media_timers(&self) -> Vec<MediaTimer> {
        self.media.active_timers()
    }

    pub fn next_media_deadline(&self) -> Option<TimestampNs> {
        self.media.next_deadline()
    }

    pub fn fire_media_timer(&self, media_id: &str, generation: u64, now: TimestampNs) -> Option<ExpiryOutcome> {
        self.media.fire(media_id, generation, now)
    }

    pub fn expire_due_media(&self, now: TimestampNs) -> Vec<ExpiryOutcome> {
        self.media.fire_due(now)
    }

    // --- Credits ---

    pub fn balance(&self, principal: PrincipalId) -> Result<Credits, AccessError> {
        self.ledger.balance(principal)
    }

    fn count_debit<T>(&self, result: &Result<T, AccessError>) {
        match result {
            Ok(_) | Err(AccessError::DebitedButActionFailed { .. }) => self.metrics.record(Counter::DebitsAccepted),
            Err(AccessError::InsufficientBalance { .. }) => self.metrics.record(Counter::DebitsDenied),
            Err(_) => {}
        }
    }

    pub fn try_debit(&self, principal: PrincipalId, amount: Credits, reason: &str, now: TimestampNs) -> Result<LedgerReceipt, AccessError> {
        let result = self.ledger.try_debit(principal, amount, reason, now);
        self.count_debit(&result);
        result
    }

    pub fn credit(&self, principal: PrincipalId, amount: Credits, reason: &str, now: TimestampNs) -> Result<LedgerReceipt, AccessError> {
        let receipt = self.ledger.credit(principal, amount, reason, now)?;
        self.metrics.record(Counter::CreditsApplied);
        Ok(receipt)
    }

    pub fn guarded<T, F>(
        &self,
        principal: PrincipalId,
        cost: Credits,
        reason: &str,
        now: TimestampNs,
        action: F,
    ) -> Result<(T, LedgerReceipt), AccessError>
    where
        F: FnOnce() -> Result<T, AccessError>,
    {
        let result = self.gate.guarded(principal, cost, reason, now, action);
        self.count_debit(&result);
        result
    }

    // --- Pending actions ---

    /// Lets the action through when the gate is open; otherwise parks it
    /// behind the secret and hands back its token.
    pub fn authorize(&self, owner: PrincipalId, kind: PendingActionKind, now: TimestampNs) -> Result<GateDecision, AccessError> {
        match self.lock.ensure_unlocked(owner, now) {
            Ok(()) => Ok(GateDecision::Proceed),
            Err(AccessError::Auth(AuthFailure::Locked)) => {
                Ok(GateDecision::Blocked(self.pending.capture(owner, kind, GateRequirement::Secret, now)))
            }
            Err(e) => Err(e),
        }
    }

    /// Issues a code to `target` and parks the action until it is confirmed.
    /// A code never stands in for the secret, so a locked gate refuses.
    pub fn authorize_with_code(
        &self,
        owner: PrincipalId,
        kind: PendingActionKind,
        purpose: CodePurpose,
        target: &str,
        now: TimestampNs,
    ) -> Result<GateDecision, AccessError> {
        self.lock.ensure_unlocked(owner, now)?;
        let ticket = self.codes.issue(owner, purpose, target, now)?;
        let gate = GateRequirement::Code { purpose, target: ticket.target, code_id: ticket.id };
        Ok(GateDecision::Blocked(self.pending.capture(owner, kind, gate, now)))
    }

    /// Consumes a parked action once its gate is open. The gate has to be
    /// opened first through `verify_secret` or `verify_code`, and a code
    /// gate also needs the password gate open. A priced action is debited on
    /// the way out; if the debit fails the action stays parked.
    pub fn resume(&self, owner: PrincipalId, token: PendingToken, now: TimestampNs) -> Result<ResumedAction, AccessError> {
        let parked = self.pending.peek(owner, token, now)?;
        self.lock.ensure_unlocked(owner, now)?;
        if let GateRequirement::Code { purpose, target, code_id } = &parked.gate {
            if !self.codes.is_consumed(owner, *purpose, target, *code_id)? {
                return Err(AccessError::InvalidState("verification code has not been confirmed".to_string()));
            }
        }

        let action = self.pending.take(owner, token, now)?;
        let charge = match &action.kind {
            PendingActionKind::UnlockMedia { media_id, cost } if *cost > 0 => {
                Some((*cost, format!("unlock media {}", media_id)))
            }
            _ => None,
        };
        let receipt = match charge {
            Some((cost, reason)) => match self.try_debit(owner, cost, &reason, now) {
                Ok(receipt) => Some(receipt),
                Err(e) => {
                    self.pending.restore(action);
                    return Err(e);
                }
            },
            None => None,
        };
        info!(%owner, token, "pending action resumed");
        Ok(ResumedAction { action, receipt })
    }

    pub fn discard_pending(&self, owner: PrincipalId, token: PendingToken) -> bool {
        self.pending.discard(owner, token)
    }

    pub fn pending_actions(&self, owner: PrincipalId, now: TimestampNs) -> Vec<PendingAction> {
        self.pending.list(owner, now)
    }

    pub fn purge_pending(&self, now: TimestampNs) -> usize {
        self.pending.purge(now)
    }

    pub fn run_maintenance(&self, now: TimestampNs) -> MaintenanceReport {
        perform_maintenance(self, now)
    }
}
