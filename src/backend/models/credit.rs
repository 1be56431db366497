// src/backend/models/credit.rs
use crate::models::common::{Credits, PrincipalId, TimestampNs};
use candid::CandidType;
use serde::{Deserialize, Serialize};

#[derive(CandidType, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LedgerEntryKind {
    Debit,
    Credit,
}

/// Proof of one applied balance movement. Appended to the ledger journal.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub principal: PrincipalId,
    pub kind: LedgerEntryKind,
    pub amount: Credits,
    pub reason: String,
    pub balance_after: Credits,
    pub at: TimestampNs,
}
