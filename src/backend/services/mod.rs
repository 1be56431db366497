pub mod auto_lock;
pub mod code_issuer;
pub mod credit_ledger;
pub mod engine;
pub mod lock_service;
pub mod media_scheduler;
pub mod pending;
pub mod scheduler;
pub mod timers;

use crate::models::config::EngineConfig;
use parking_lot::RwLock;
use std::sync::Arc;

/// Engine configuration shared by every service; replaced by `update_config`.
pub type SharedConfig = Arc<RwLock<EngineConfig>>;

pub use engine::{AccessEngine, Collaborators};
pub use scheduler::{perform_maintenance, MaintenanceReport};
