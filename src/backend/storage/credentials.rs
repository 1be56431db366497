// src/backend/storage/credentials.rs
use crate::adapter::SecretPersistence;
use crate::error::AccessError;
use crate::models::common::PrincipalId;
use crate::models::lock_state::StoredCredential;
use crate::storage::memory::{get_credentials_memory, Memory};
use crate::storage::storable::{principal_key, Cbor, PrincipalBytes};
use ic_stable_structures::StableBTreeMap;
use std::cell::RefCell;

type StorableCredential = Cbor<StoredCredential>;

thread_local! {
    /// Gate credentials: Key = owner principal bytes, Value = hashed secret + auto-lock setting
    static CREDENTIALS: RefCell<StableBTreeMap<PrincipalBytes, StorableCredential, Memory>> = RefCell::new(
        StableBTreeMap::init(get_credentials_memory())
    );
}

/// `SecretPersistence` backed by stable memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct StableSecretStore;

impl SecretPersistence for StableSecretStore {
    fn load(&self, owner: PrincipalId) -> Result<Option<StoredCredential>, AccessError> {
        Ok(CREDENTIALS.with(|map| map.borrow().get(&principal_key(&owner)).map(|c| c.0)))
    }

    fn save(&self, owner: PrincipalId, credential: &StoredCredential) -> Result<(), AccessError> {
        CREDENTIALS.with(|map| {
            map.borrow_mut().insert(principal_key(&owner), Cbor(credential.clone()));
        });
        Ok(())
    }

    fn clear(&self, owner: PrincipalId) -> Result<(), AccessError> {
        CREDENTIALS.with(|map| {
            map.borrow_mut().remove(&principal_key(&owner));
        });
        Ok(())
    }
}

pub fn credential_count() -> u64 {
    CREDENTIALS.with(|map| map.borrow().len())
}
