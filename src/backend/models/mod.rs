pub mod common;
pub mod config;
pub mod credit;
pub mod init;
pub mod lock_state;
pub mod media;
pub mod pending_action;
pub mod verification_code;

// Re-export common types/enums for easier access
pub use common::*;
pub use config::{CodePolicies, CodePolicy, EngineConfig, HashingConfig, ThrottleConfig};
pub use credit::{LedgerEntryKind, LedgerReceipt};
pub use lock_state::{LockPhase, LockState, StoredCredential};
pub use media::{ExpiryOutcome, MediaItem, MediaTimer, TimerStatus};
pub use pending_action::{GateDecision, GateRequirement, PendingAction, PendingActionKind, ResumedAction};
pub use verification_code::{CodePurpose, CodeStatus, CodeTicket, VerificationCode, VerifiedCode};
