// src/backend/storage/balances.rs
use crate::adapter::BalancePersistence;
use crate::error::AccessError;
use crate::models::common::{Credits, PrincipalId};
use crate::storage::memory::{get_balances_memory, Memory};
use crate::storage::storable::{principal_key, PrincipalBytes};
use ic_stable_structures::StableBTreeMap;
use std::cell::RefCell;

thread_local! {
    /// Credit balances: Key = principal bytes, Value = balance
    static BALANCES: RefCell<StableBTreeMap<PrincipalBytes, u64, Memory>> = RefCell::new(
        StableBTreeMap::init(get_balances_memory())
    );
}

/// `BalancePersistence` backed by stable memory. Absent principals hold zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct StableBalanceStore;

impl BalancePersistence for StableBalanceStore {
    fn load(&self, principal: PrincipalId) -> Result<Credits, AccessError> {
        Ok(BALANCES.with(|map| map.borrow().get(&principal_key(&principal)).unwrap_or(0)))
    }

    fn save(&self, principal: PrincipalId, balance: Credits) -> Result<(), AccessError> {
        BALANCES.with(|map| {
            let mut map = map.borrow_mut();
            if balance == 0 {
                map.remove(&principal_key(&principal));
            } else {
                map.insert(principal_key(&principal), balance);
            }
        });
        Ok(())
    }
}
