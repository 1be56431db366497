// src/backend/storage/outbox.rs
// Outbound verification codes waiting for the off-chain mail relay.

use crate::adapter::NotificationSender;
use crate::error::AccessError;
use crate::models::verification_code::CodePurpose;
use crate::storage::memory::{get_outbox_counter_memory, get_outbox_memory, Memory};
use crate::storage::storable::Cbor;
use candid::CandidType;
use ic_stable_structures::{StableBTreeMap, StableCell};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;

/// Upper bound of undelivered messages; beyond it sending fails so the
/// caller sees a retryable error instead of the outbox growing unbounded.
const MAX_OUTBOX_LEN: u64 = 10_000;

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct OutboundCode {
    pub id: u64,
    pub target: String,
    pub purpose: CodePurpose,
    pub code: String,
}

type StorableOutboundCode = Cbor<OutboundCode>;

thread_local! {
    // Counter for outbox message ids
    static OUTBOX_COUNTER: RefCell<StableCell<u64, Memory>> = RefCell::new(
        StableCell::init(get_outbox_counter_memory(), 0)
            .expect("Failed to initialize outbox counter")
    );

    // Queue: message id -> message, drained in id order
    static OUTBOX: RefCell<StableBTreeMap<u64, StorableOutboundCode, Memory>> = RefCell::new(
        StableBTreeMap::init(get_outbox_memory())
    );
}

/// Gets the next available message id and increments the counter.
fn next_message_id() -> Result<u64, AccessError> {
    OUTBOX_COUNTER.with(|cell_ref| {
        let current_val = *cell_ref.borrow().get();
        let next_val = current_val
            .checked_add(1)
            .ok_or_else(|| AccessError::InternalError("Outbox counter overflow".to_string()))?;
        cell_ref
            .borrow_mut()
            .set(next_val)
            .map_err(|e| AccessError::InternalError(format!("Failed to update outbox counter: {:?}", e)))?;
        Ok(current_val)
    })
}

pub fn outbox_len() -> u64 {
    OUTBOX.with(|map| map.borrow().len())
}

/// Removes and returns up to `limit` of the oldest queued messages.
pub fn drain_outbox(limit: usize) -> Vec<OutboundCode> {
    OUTBOX.with(|map_ref| {
        let mut map = map_ref.borrow_mut();
        let ids: Vec<u64> = map.iter().take(limit).map(|(id, _)| id).collect();
        ids.into_iter().filter_map(|id| map.remove(&id)).map(|c| c.0).collect()
    })
}

/// `NotificationSender` that queues codes in stable memory for the relay.
#[derive(Clone, Copy, Debug, Default)]
pub struct OutboxNotificationSender;

impl NotificationSender for OutboxNotificationSender {
    fn send_code(&self, target: &str, purpose: CodePurpose, code: &str) -> Result<(), AccessError> {
        if outbox_len() >= MAX_OUTBOX_LEN {
            return Err(AccessError::External("notification outbox is full".to_string()));
        }
        let message = OutboundCode { id: next_message_id()?, target: target.to_string(), purpose, code: code.to_string() };
        OUTBOX.with(|map| {
            map.borrow_mut().insert(message.id, Cbor(message));
        });
        Ok(())
    }
}
