// src/backend/utils/guards.rs
use crate::error::AccessError;
use crate::storage::config::{get_admin_principal, get_min_cycles_threshold, get_relay_principal};
use candid::Principal;
use ic_cdk::api::canister_balance128;

/// Checks if the canister has sufficient cycles.
///
/// # Errors
///
/// Returns `AccessError::CycleLow` if the balance is below the configured threshold.
pub fn check_cycles() -> Result<(), AccessError> {
    let balance = canister_balance128();
    let threshold = get_min_cycles_threshold();
    if balance < threshold {
        ic_cdk::println!("Cycle balance low: {} cycles, threshold: {}", balance, threshold);
        Err(AccessError::CycleLow)
    } else {
        Ok(())
    }
}

/// Every owner-bound endpoint needs an authenticated caller.
pub fn authenticated_caller() -> Result<Principal, AccessError> {
    let caller = ic_cdk::caller();
    if caller == Principal::anonymous() {
        return Err(AccessError::NotAuthorized("Anonymous callers cannot hold a session.".to_string()));
    }
    Ok(caller)
}

pub fn admin_guard() -> Result<(), String> {
    if ic_cdk::caller() == get_admin_principal() {
        Ok(())
    } else {
        Err(AccessError::NotAuthorized("Caller is not the admin.".to_string()).to_string())
    }
}

pub fn relay_guard() -> Result<(), String> {
    let caller = ic_cdk::caller();
    if caller == get_relay_principal() || caller == get_admin_principal() {
        Ok(())
    } else {
        Err(AccessError::NotAuthorized("Caller is not the notification relay.".to_string()).to_string())
    }
}
