// src/backend/adapter/collaborators.rs
// Boundary contracts the engine calls out to. Implementations report their
// own failures as `AccessError::External` so callers can retry them.

use crate::error::AccessError;
use crate::models::common::{Credits, PrincipalId};
use crate::models::lock_state::StoredCredential;
use crate::models::verification_code::CodePurpose;

/// Delivers a one-time code to its target address.
pub trait NotificationSender: Send + Sync {
    fn send_code(&self, target: &str, purpose: CodePurpose, code: &str) -> Result<(), AccessError>;
}

/// Durable home of an owner's gate credential.
pub trait SecretPersistence: Send + Sync {
    fn load(&self, owner: PrincipalId) -> Result<Option<StoredCredential>, AccessError>;
    fn save(&self, owner: PrincipalId, credential: &StoredCredential) -> Result<(), AccessError>;
    fn clear(&self, owner: PrincipalId) -> Result<(), AccessError>;
}

/// Removes expired media from wherever it is stored.
pub trait ContentStore: Send + Sync {
    fn delete(&self, media_id: &str) -> Result<(), AccessError>;
}

/// Durable credit balances. An unknown principal has a zero balance.
pub trait BalancePersistence: Send + Sync {
    fn load(&self, principal: PrincipalId) -> Result<Credits, AccessError>;
    fn save(&self, principal: PrincipalId, balance: Credits) -> Result<(), AccessError>;
}
