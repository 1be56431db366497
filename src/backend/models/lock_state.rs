// src/backend/models/lock_state.rs
use crate::models::common::TimestampNs;
use candid::CandidType;
use serde::{Deserialize, Serialize};

#[derive(CandidType, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockPhase {
    NoSecret, // No gate secret has ever been set (or it was removed)
    Unlocked,
    Locked,
}

/// What `SecretPersistence` keeps for an owner. The secret itself is never
/// stored, only its Argon2id PHC string.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct StoredCredential {
    pub secret_hash: String,
    pub auto_lock_secs: u32,
    pub updated_at: TimestampNs,
    /// Confirmed address that password-recovery codes may be sent to.
    #[serde(default)]
    pub recovery_target: Option<String>,
}

/// Read model of a lock session.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct LockState {
    pub has_secret: bool,
    pub locked: bool,
    pub auto_lock_secs: u32,
    pub last_activity_at: TimestampNs,
    /// `None` while no countdown is running.
    pub auto_lock_remaining_secs: Option<u64>,
    pub recovery_target: Option<String>,
}

impl LockState {
    pub fn phase(&self) -> LockPhase {
        match (self.has_secret, self.locked) {
            (false, _) => LockPhase::NoSecret,
            (true, false) => LockPhase::Unlocked,
            (true, true) => LockPhase::Locked,
        }
    }
}
