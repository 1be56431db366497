// src/backend/models/init.rs
use crate::models::config::EngineConfig;
use candid::{CandidType, Principal};
use serde::Deserialize;

#[derive(CandidType, Deserialize, Debug)]
pub struct InitArgs {
    pub admin_principal: Principal,
    /// Off-chain worker allowed to drain the notification outbox.
    pub relay_principal: Principal,
    pub min_cycles_threshold: u128,
    pub config: Option<EngineConfig>,
}
