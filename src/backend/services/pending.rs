// src/backend/services/pending.rs

use crate::{
    error::AccessError,
    models::{common::*, GateRequirement, PendingAction, PendingActionKind},
    utils::time::secs_to_ns,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Captured actions older than this are dropped by maintenance.
pub const PENDING_TTL_SECS: u64 = 30 * 60;

/// Actions that hit a closed gate, parked until the gate opens.
pub struct PendingActions {
    actions: Mutex<HashMap<PendingToken, PendingAction>>,
    next_token: AtomicU64,
}

impl Default for PendingActions {
    fn default() -> Self {
        Self { actions: Mutex::new(HashMap::new()), next_token: AtomicU64::new(1) }
    }
}

impl PendingActions {
    pub fn capture(
        &self,
        owner: PrincipalId,
        kind: PendingActionKind,
        gate: GateRequirement,
        now: TimestampNs,
    ) -> PendingAction {
        let action = PendingAction {
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
            owner,
            kind,
            gate,
            created_at: now,
        };
        self.actions.lock().insert(action.token, action.clone());
        debug!(%owner, token = action.token, "action parked behind gate");
        action
    }

    fn is_live(action: &PendingAction, now: TimestampNs) -> bool {
        now <= action.created_at.saturating_add(secs_to_ns(PENDING_TTL_SECS))
    }

    /// Looks at a token without consuming it. Tokens of other owners are
    /// reported as missing.
    pub fn peek(&self, owner: PrincipalId, token: PendingToken, now: TimestampNs) -> Result<PendingAction, AccessError> {
        self.actions
            .lock()
            .get(&token)
            .filter(|a| a.owner == owner && Self::is_live(a, now))
            .cloned()
            .ok_or_else(|| AccessError::NotFound(format!("pending action {}", token)))
    }

    /// Removes and returns the action. Succeeds at most once per token.
    pub fn take(&self, owner: PrincipalId, token: PendingToken, now: TimestampNs) -> Result<PendingAction, AccessError> {
        let mut actions = self.actions.lock();
        match actions.get(&token) {
            Some(a) if a.owner == owner && Self::is_live(a, now) => {
                actions.remove(&token).ok_or_else(|| AccessError::NotFound(format!("pending action {}", token)))
            }
            _ => Err(AccessError::NotFound(format!("pending action {}", token))),
        }
    }

    /// Puts a taken action back under its original token, e.g. after the
    /// step that followed `take` failed.
    pub fn restore(&self, action: PendingAction) {
        debug!(owner = %action.owner, token = action.token, "pending action restored");
        self.actions.lock().entry(action.token).or_insert(action);
    }

    pub fn discard(&self, owner: PrincipalId, token: PendingToken) -> bool {
        let mut actions = self.actions.lock();
        if actions.get(&token).is_some_and(|a| a.owner == owner) {
            actions.remove(&token);
            return true;
        }
        false
    }

    /// Drops every action the owner has parked.
    pub fn discard_owner(&self, owner: PrincipalId) -> usize {
        let mut actions = self.actions.lock();
        let before = actions.len();
        actions.retain(|_, a| a.owner != owner);
        before - actions.len()
    }

    pub fn list(&self, owner: PrincipalId, now: TimestampNs) -> Vec<PendingAction> {
        let mut owned: Vec<_> = self
            .actions
            .lock()
            .values()
            .filter(|a| a.owner == owner && Self::is_live(a, now))
            .cloned()
            .collect();
        owned.sort_by_key(|a| a.token);
        owned
    }

    pub fn purge(&self, now: TimestampNs) -> usize {
        let mut actions = self.actions.lock();
        let before = actions.len();
        actions.retain(|_, a| Self::is_live(a, now));
        before - actions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{at, principal};

    #[test]
    fn take_succeeds_once_and_only_for_the_owner() {
        let pending = PendingActions::default();
        let action = pending.capture(principal(1), PendingActionKind::OpenSettings, GateRequirement::Secret, at(0));
        assert!(matches!(pending.take(principal(2), action.token, at(1)), Err(AccessError::NotFound(_))));
        assert_eq!(pending.take(principal(1), action.token, at(1)).unwrap(), action);
        assert!(pending.take(principal(1), action.token, at(2)).is_err());
    }

    #[test]
    fn stale_actions_expire_and_get_purged() {
        let pending = PendingActions::default();
        let action = pending.capture(principal(1), PendingActionKind::EditProfile, GateRequirement::Secret, at(0));
        assert!(pending.peek(principal(1), action.token, at(PENDING_TTL_SECS)).is_ok());
        assert!(pending.peek(principal(1), action.token, at(PENDING_TTL_SECS + 1)).is_err());
        assert_eq!(pending.purge(at(PENDING_TTL_SECS + 1)), 1);
    }

    #[test]
    fn discard_ignores_foreign_tokens() {
        let pending = PendingActions::default();
        let action = pending.capture(principal(1), PendingActionKind::EditProfile, GateRequirement::Secret, at(0));
        assert!(!pending.discard(principal(2), action.token));
        assert_eq!(pending.list(principal(1), at(1)).len(), 1);
        assert!(pending.discard(principal(1), action.token));
        assert!(pending.list(principal(1), at(1)).is_empty());
    }

    #[test]
    fn restored_action_resumes_under_the_same_token() {
        let pending = PendingActions::default();
        let action = pending.capture(principal(1), PendingActionKind::OpenSettings, GateRequirement::Secret, at(0));
        let taken = pending.take(principal(1), action.token, at(1)).unwrap();
        pending.restore(taken);
        assert_eq!(pending.peek(principal(1), action.token, at(2)).unwrap(), action);
        // the original capture time still bounds its life
        assert!(pending.peek(principal(1), action.token, at(PENDING_TTL_SECS + 1)).is_err());
    }

    #[test]
    fn discard_owner_leaves_other_owners_alone() {
        let pending = PendingActions::default();
        pending.capture(principal(1), PendingActionKind::OpenSettings, GateRequirement::Secret, at(0));
        pending.capture(principal(1), PendingActionKind::EditProfile, GateRequirement::Secret, at(0));
        let other = pending.capture(principal(2), PendingActionKind::EditProfile, GateRequirement::Secret, at(0));
        assert_eq!(pending.discard_owner(principal(1)), 2);
        assert!(pending.list(principal(1), at(1)).is_empty());
        assert_eq!(pending.list(principal(2), at(1)), vec![other]);
    }
}
