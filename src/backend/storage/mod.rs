// src/backend/storage/mod.rs
// Stable memory management using ic-stable-structures

pub mod balances;
pub mod config;
pub mod credentials;
pub mod ledger_log;
pub mod media;
pub mod memory;
pub mod metrics;
pub mod outbox;
pub mod storable;

// Re-export key storage structures and functions for easier access
pub use balances::StableBalanceStore;
pub use credentials::StableSecretStore;
pub use ledger_log::{append_ledger_entry, list_ledger_entries};
pub use media::StableContentStore;
pub use memory::Memory;
pub use outbox::{drain_outbox, OutboundCode, OutboxNotificationSender};
pub use storable::Cbor;
