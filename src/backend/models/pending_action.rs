// src/backend/models/pending_action.rs
use crate::models::common::{CodeId, Credits, MediaId, PendingToken, PrincipalId, TimestampNs};
use crate::models::credit::LedgerReceipt;
use crate::models::verification_code::CodePurpose;
use candid::CandidType;
use serde::{Deserialize, Serialize};

/// What the caller was trying to do when a gate stopped it.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub enum PendingActionKind {
    EditProfile,
    OpenSettings,
    ManageMedia { media_id: MediaId },
    UnlockMedia { media_id: MediaId, cost: Credits },
    ChangeEmail { new_address: String },
}

/// Which gate must open before the action may resume.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub enum GateRequirement {
    Secret,
    Code { purpose: CodePurpose, target: String, code_id: CodeId },
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct PendingAction {
    pub token: PendingToken,
    pub owner: PrincipalId,
    pub kind: PendingActionKind,
    pub gate: GateRequirement,
    pub created_at: TimestampNs,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    Blocked(PendingAction),
}

/// A resumed action. Priced actions carry the receipt of their debit.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ResumedAction {
    pub action: PendingAction,
    pub receipt: Option<LedgerReceipt>,
}
