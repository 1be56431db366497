// src/backend/storage/memory.rs
use ic_stable_structures::memory_manager::{MemoryId, MemoryManager, VirtualMemory};
use ic_stable_structures::DefaultMemoryImpl;
use std::cell::RefCell;

// Define Memory IDs for stable structures
// Choose non-overlapping IDs
const CREDENTIALS_MEM_ID: MemoryId = MemoryId::new(1);
const BALANCES_MEM_ID: MemoryId = MemoryId::new(2);
const MEDIA_ITEMS_MEM_ID: MemoryId = MemoryId::new(3);
const OUTBOX_MEM_ID: MemoryId = MemoryId::new(4);
const OUTBOX_COUNTER_MEM_ID: MemoryId = MemoryId::new(5);
const LEDGER_LOG_INDEX_MEM_ID: MemoryId = MemoryId::new(6);
const LEDGER_LOG_DATA_MEM_ID: MemoryId = MemoryId::new(7);
const METRICS_MEM_ID: MemoryId = MemoryId::new(8);
const ENGINE_CONFIG_MEM_ID: MemoryId = MemoryId::new(9);
// Reserve IDs 10-24 for future use; 25-27 are taken by storage/config.rs

// Define memory type alias
pub type Memory = VirtualMemory<DefaultMemoryImpl>;

thread_local! {
    // Memory manager
    static MEMORY_MANAGER: RefCell<MemoryManager<DefaultMemoryImpl>> = RefCell::new(
        MemoryManager::init(DefaultMemoryImpl::default())
    );
}

/// Get memory instance for a specific MemoryId.
pub fn get_memory(id: MemoryId) -> Memory {
    MEMORY_MANAGER.with(|m| m.borrow().get(id))
}

// Functions to get specific memory instances
pub fn get_credentials_memory() -> Memory {
    get_memory(CREDENTIALS_MEM_ID)
}

pub fn get_balances_memory() -> Memory {
    get_memory(BALANCES_MEM_ID)
}

pub fn get_media_items_memory() -> Memory {
    get_memory(MEDIA_ITEMS_MEM_ID)
}

pub fn get_outbox_memory() -> Memory {
    get_memory(OUTBOX_MEM_ID)
}

pub fn get_outbox_counter_memory() -> Memory {
    get_memory(OUTBOX_COUNTER_MEM_ID)
}

pub fn get_ledger_log_index_memory() -> Memory {
    get_memory(LEDGER_LOG_INDEX_MEM_ID)
}

pub fn get_ledger_log_data_memory() -> Memory {
    get_memory(LEDGER_LOG_DATA_MEM_ID)
}

pub fn get_metrics_memory() -> Memory {
    get_memory(METRICS_MEM_ID)
}

pub fn get_engine_config_memory() -> Memory {
    get_memory(ENGINE_CONFIG_MEM_ID)
}
