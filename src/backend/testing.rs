// In-memory collaborators and fixtures shared by the unit tests.

use crate::adapter::{BalancePersistence, ContentStore, NotificationSender, SecretPersistence};
use crate::error::AccessError;
use crate::models::common::{Credits, PrincipalId, TimestampNs};
use crate::models::config::{EngineConfig, HashingConfig};
use crate::models::lock_state::StoredCredential;
use crate::models::verification_code::CodePurpose;
use crate::utils::rng::EntropyPool;
use crate::utils::time::secs_to_ns;
use candid::Principal;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

pub fn principal(n: u8) -> PrincipalId {
    Principal::from_slice(&[n; 10])
}

/// Virtual clock reading `n` seconds after epoch.
pub fn at(secs: u64) -> TimestampNs {
    secs_to_ns(secs)
}

pub fn test_entropy() -> EntropyPool {
    EntropyPool::from_seed([42u8; 32])
}

/// Cheap Argon2 parameters so hashing does not dominate test time.
pub fn test_hashing() -> HashingConfig {
    HashingConfig { memory_kib: 64, iterations: 1, parallelism: 1 }
}

pub fn test_config() -> EngineConfig {
    EngineConfig { hashing: test_hashing(), ..EngineConfig::default() }
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, CodePurpose, String)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Most recent code delivered to `target` for `purpose`.
    pub fn last_code(&self, target: &str, purpose: CodePurpose) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|(t, p, _)| t == target && *p == purpose)
            .map(|(_, _, code)| code.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl NotificationSender for RecordingNotifier {
    fn send_code(&self, target: &str, purpose: CodePurpose, code: &str) -> Result<(), AccessError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AccessError::External("mail relay unavailable".to_string()));
        }
        self.sent.lock().push((target.to_string(), purpose, code.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySecretStore {
    credentials: Mutex<HashMap<PrincipalId, StoredCredential>>,
    fail_saves: AtomicBool,
}

impl MemorySecretStore {
    pub fn set_failing(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn stored(&self, owner: PrincipalId) -> Option<StoredCredential> {
        self.credentials.lock().get(&owner).cloned()
    }
}

impl SecretPersistence for MemorySecretStore {
    fn load(&self, owner: PrincipalId) -> Result<Option<StoredCredential>, AccessError> {
        Ok(self.credentials.lock().get(&owner).cloned())
    }

    fn save(&self, owner: PrincipalId, credential: &StoredCredential) -> Result<(), AccessError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AccessError::External("profile table unavailable".to_string()));
        }
        self.credentials.lock().insert(owner, credential.clone());
        Ok(())
    }

    fn clear(&self, owner: PrincipalId) -> Result<(), AccessError> {
        self.credentials.lock().remove(&owner);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingContentStore {
    deletes: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingContentStore {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn delete_count(&self, media_id: &str) -> usize {
        self.deletes.lock().iter().filter(|id| id.as_str() == media_id).count()
    }

    pub fn total_deletes(&self) -> usize {
        self.deletes.lock().len()
    }
}

impl ContentStore for RecordingContentStore {
    fn delete(&self, media_id: &str) -> Result<(), AccessError> {
        self.deletes.lock().push(media_id.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(AccessError::External("object storage timeout".to_string()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBalanceStore {
    balances: Mutex<HashMap<PrincipalId, Credits>>,
    fail_saves: AtomicBool,
}

impl MemoryBalanceStore {
    pub fn with_balance(principal: PrincipalId, balance: Credits) -> Self {
        let store = Self::default();
        store.balances.lock().insert(principal, balance);
        store
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn persisted(&self, principal: PrincipalId) -> Credits {
        self.balances.lock().get(&principal).copied().unwrap_or(0)
    }
}

impl BalancePersistence for MemoryBalanceStore {
    fn load(&self, principal: PrincipalId) -> Result<Credits, AccessError> {
        Ok(self.persisted(principal))
    }

    fn save(&self, principal: PrincipalId, balance: Credits) -> Result<(), AccessError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AccessError::External("credit table unavailable".to_string()));
        }
        self.balances.lock().insert(principal, balance);
        Ok(())
    }
}
