// src/backend/storage/config.rs
use crate::error::AccessError;
use crate::models::config::EngineConfig;
use crate::storage::memory::{get_engine_config_memory, get_memory, Memory};
use crate::storage::storable::Cbor;
use candid::Principal;
use ic_stable_structures::{memory_manager::MemoryId, StableCell};
use std::cell::RefCell;

// Define Memory IDs for config cells (ensure these are unique)
const ADMIN_PRINCIPAL_MEM_ID: MemoryId = MemoryId::new(25);
const RELAY_PRINCIPAL_MEM_ID: MemoryId = MemoryId::new(26);
const MIN_CYCLES_THRESHOLD_MEM_ID: MemoryId = MemoryId::new(27);

// Default values (used if init fails or cell is uninitialized)
const DEFAULT_ADMIN_PRINCIPAL: Principal = Principal::management_canister();
const DEFAULT_RELAY_PRINCIPAL: Principal = Principal::management_canister();
const DEFAULT_MIN_CYCLES_THRESHOLD: u128 = 10_000_000_000; // 10B cycles

thread_local! {
    /// Stable cell for the Admin Principal
    static ADMIN_PRINCIPAL: RefCell<StableCell<Cbor<Principal>, Memory>> = RefCell::new(
        StableCell::init(get_memory(ADMIN_PRINCIPAL_MEM_ID), Cbor(DEFAULT_ADMIN_PRINCIPAL))
            .expect("Failed to initialize admin principal stable cell")
    );

    /// Stable cell for the principal that drains the notification outbox
    static RELAY_PRINCIPAL: RefCell<StableCell<Cbor<Principal>, Memory>> = RefCell::new(
        StableCell::init(get_memory(RELAY_PRINCIPAL_MEM_ID), Cbor(DEFAULT_RELAY_PRINCIPAL))
            .expect("Failed to initialize relay principal stable cell")
    );

    /// Stable cell for the Minimum Cycles Threshold
    static MIN_CYCLES_THRESHOLD: RefCell<StableCell<u128, Memory>> = RefCell::new(
        StableCell::init(get_memory(MIN_CYCLES_THRESHOLD_MEM_ID), DEFAULT_MIN_CYCLES_THRESHOLD)
            .expect("Failed to initialize min cycles threshold stable cell")
    );

    /// Stable cell for the engine tunables
    static ENGINE_CONFIG: RefCell<StableCell<Cbor<EngineConfig>, Memory>> = RefCell::new(
        StableCell::init(get_engine_config_memory(), Cbor(EngineConfig::default()))
            .expect("Failed to initialize engine config stable cell")
    );
}

/// Initialize the configuration values from InitArgs.
/// Should be called only during canister initialization.
pub fn init_config(admin: Principal, relay: Principal, threshold: u128) -> Result<(), AccessError> {
    ADMIN_PRINCIPAL.with(|cell| cell.borrow_mut().set(Cbor(admin)).map(|_| ()))
        .map_err(|e| AccessError::InternalError(format!("Failed to set admin principal: {:?}", e)))?;
    RELAY_PRINCIPAL.with(|cell| cell.borrow_mut().set(Cbor(relay)).map(|_| ()))
        .map_err(|e| AccessError::InternalError(format!("Failed to set relay principal: {:?}", e)))?;
    MIN_CYCLES_THRESHOLD.with(|cell| cell.borrow_mut().set(threshold).map(|_| ()))
        .map_err(|e| AccessError::InternalError(format!("Failed to set min cycles threshold: {:?}", e)))?;
    Ok(())
}

/// Get the configured Admin Principal.
pub fn get_admin_principal() -> Principal {
    ADMIN_PRINCIPAL.with(|cell| cell.borrow().get().0)
}

/// Get the configured notification relay Principal.
pub fn get_relay_principal() -> Principal {
    RELAY_PRINCIPAL.with(|cell| cell.borrow().get().0)
}

/// Get the configured Minimum Cycles Threshold.
pub fn get_min_cycles_threshold() -> u128 {
    MIN_CYCLES_THRESHOLD.with(|cell| *cell.borrow().get())
}

pub fn get_engine_config() -> EngineConfig {
    ENGINE_CONFIG.with(|cell| cell.borrow().get().0.clone())
}

pub fn set_engine_config(config: EngineConfig) -> Result<(), AccessError> {
    ENGINE_CONFIG.with(|cell| {
        cell.borrow_mut()
            .set(Cbor(config))
            .map(|_| ())
            .map_err(|e| AccessError::InternalError(format!("Failed to store engine config: {:?}", e)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_defaults_until_set() {
        assert_eq!(get_engine_config(), EngineConfig::default());
        let config = EngineConfig { min_secret_len: 8, ..EngineConfig::default() };
        set_engine_config(config.clone()).unwrap();
        assert_eq!(get_engine_config(), config);
    }

    #[test]
    fn init_config_sets_principals() {
        let admin = Principal::from_slice(&[1; 10]);
        let relay = Principal::from_slice(&[2; 10]);
        init_config(admin, relay, 42).unwrap();
        assert_eq!(get_admin_principal(), admin);
        assert_eq!(get_relay_principal(), relay);
        assert_eq!(get_min_cycles_threshold(), 42);
    }
}
