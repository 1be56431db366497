// src/backend/services/credit_ledger.rs
// Credit balances and the gate that charges for privileged actions.

use crate::{
    adapter::BalancePersistence,
    error::AccessError,
    models::{common::*, LedgerEntryKind, LedgerReceipt},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-principal balances with conditional, atomic debits.
///
/// All movements go through one mutex, which gives every principal a total
/// order of debits and credits. The persisted balance is written first; the
/// cached value only changes once the save succeeded.
pub struct CreditLedger {
    balances: Mutex<HashMap<PrincipalId, Credits>>,
    persistence: Arc<dyn BalancePersistence>,
}

impl CreditLedger {
    pub fn new(persistence: Arc<dyn BalancePersistence>) -> Self {
        Self { balances: Mutex::new(HashMap::new()), persistence }
    }

    fn cached_or_load(
        &self,
        balances: &mut HashMap<PrincipalId, Credits>,
        principal: PrincipalId,
    ) -> Result<Credits, AccessError> {
        if let Some(balance) = balances.get(&principal) {
            return Ok(*balance);
        }
        let balance = self.persistence.load(principal)?;
        balances.insert(principal, balance);
        Ok(balance)
    }

    pub fn balance(&self, principal: PrincipalId) -> Result<Credits, AccessError> {
        let mut balances = self.balances.lock();
        self.cached_or_load(&mut balances, principal)
    }

    /// Check-and-decrement as one step. Each call debits at most once; retries
    /// of the same logical action must be deduplicated by the caller.
    pub fn try_debit(
        &self,
        principal: PrincipalId,
        amount: Credits,
        reason: &str,
        now: TimestampNs,
    ) -> Result<LedgerReceipt, AccessError> {
        if amount == 0 {
            return Err(AccessError::invalid_input("debit amount must be positive"));
        }
        let mut balances = self.balances.lock();
        let available = self.cached_or_load(&mut balances, principal)?;
        if available < amount {
            debug!(%principal, amount, available, reason, "debit denied");
            return Err(AccessError::InsufficientBalance { requested: amount, available });
        }

        let balance_after = available - amount;
        self.persistence.save(principal, balance_after)?;
        balances.insert(principal, balance_after);
        info!(%principal, amount, balance_after, reason, "credits debited");

        Ok(LedgerReceipt {
            principal,
            kind: LedgerEntryKind::Debit,
            amount,
            reason: reason.to_string(),
            balance_after,
            at: now,
        })
    }

    pub fn credit(
        &self,
        principal: PrincipalId,
        amount: Credits,
        reason: &str,
        now: TimestampNs,
    ) -> Result<LedgerReceipt, AccessError> {
        if amount == 0 {
            return Err(AccessError::invalid_input("credit amount must be positive"));
        }
        let mut balances = self.balances.lock();
        let available = self.cached_or_load(&mut balances, principal)?;
        let balance_after = available
            .checked_add(amount)
            .ok_or_else(|| AccessError::invalid_input("credit would overflow the balance"))?;

        self.persistence.save(principal, balance_after)?;
        balances.insert(principal, balance_after);
        info!(%principal, amount, balance_after, reason, "credits added");

        Ok(LedgerReceipt {
            principal,
            kind: LedgerEntryKind::Credit,
            amount,
            reason: reason.to_string(),
            balance_after,
            at: now,
        })
    }
}

/// Runs an action only after its cost has been debited.
#[derive(Clone)]
pub struct CreditGate {
    ledger: Arc<CreditLedger>,
}

impl CreditGate {
    pub fn new(ledger: Arc<CreditLedger>) -> Self {
        Self { ledger }
    }

    /// Debits `cost`, then runs `action`. A failed debit never runs the action.
    /// A failed action is not refunded: the caller gets
    /// `DebitedButActionFailed` and owns the reconciliation.
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
        let receipt = self.ledger.try_debit(principal, cost, reason, now)?;
        match action() {
            Ok(value) => Ok((value, receipt)),
            Err(e) => {
                warn!(%principal, cost, reason, error = %e, "guarded action failed after debit");
                Err(AccessError::DebitedButActionFailed { debited: cost, reason: e.to_string() })
            }
        }
    }
}
