// src/backend/state.rs
// The canister's single engine instance, wired to stable-memory collaborators.

use crate::error::AccessError;
use crate::metrics::AccessMetrics;
use crate::models::config::EngineConfig;
use crate::services::{AccessEngine, Collaborators};
use crate::storage::{self, OutboxNotificationSender, StableBalanceStore, StableContentStore, StableSecretStore};
use crate::utils::rng::EntropyPool;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static ENGINE: RefCell<Option<Arc<AccessEngine>>> = const { RefCell::new(None) };
    static ENTROPY: Arc<EntropyPool> = Arc::new(EntropyPool::unseeded());
}

pub fn entropy() -> Arc<EntropyPool> {
    ENTROPY.with(|pool| pool.clone())
}

/// Builds the engine from the stored configuration, carrying over the
/// persisted metrics.
pub fn install_engine(config: EngineConfig) {
    let collaborators = Collaborators {
        notifier: Arc::new(OutboxNotificationSender),
        secrets: Arc::new(StableSecretStore),
        content: Arc::new(StableContentStore),
        balances: Arc::new(StableBalanceStore),
    };
    let metrics = Arc::new(AccessMetrics::from_snapshot(&storage::metrics::get_metrics()));
    let engine = AccessEngine::with_metrics(config, entropy(), collaborators, metrics);
    ENGINE.with(|slot| *slot.borrow_mut() = Some(Arc::new(engine)));
}

/// Runs `f` against the engine. The engine handle is cloned out first, so
/// `f` may schedule timers or touch storage without holding the slot.
pub fn with_engine<T>(f: impl FnOnce(&AccessEngine) -> T) -> Result<T, AccessError> {
    let engine = ENGINE
        .with(|slot| slot.borrow().clone())
        .ok_or_else(|| AccessError::InternalError("Access engine is not initialized".to_string()))?;
    Ok(f(&engine))
}

/// Persists the counters so they survive the next upgrade.
pub fn persist_metrics() {
    if let Ok(snapshot) = with_engine(|engine| engine.metrics().snapshot()) {
        if let Err(e) = storage::metrics::save_metrics(snapshot) {
            ic_cdk::println!("WARN: {}", e);
        }
    }
}
