// src/backend/error.rs
use candid::CandidType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every failure the access engine reports to a caller.
///
/// Expected outcomes (wrong code, insufficient credit, ...) are ordinary
/// variants returned inside `Result`; only `External` signals a collaborator
/// failure that is worth retrying.
#[derive(CandidType, Deserialize, Serialize, Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("Validation failed: {0}")]
    Validation(ValidationFailure),

    #[error("Authentication failed: {0}")]
    Auth(AuthFailure),

    #[error("Expired: {0}")]
    Expired(String),

    #[error("Resend available in {remaining_secs}s")]
    Cooldown { remaining_secs: u64 },

    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Too many failed attempts, retry in {retry_after_secs}s")]
    Throttled { retry_after_secs: u64 },

    #[error("Debited {debited} credits but the action failed: {reason}")]
    DebitedButActionFailed { debited: u64, reason: String },

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("External collaborator error: {0}")]
    External(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Canister cycle balance too low for operation")]
    CycleLow,

    #[error("Internal canister error: {0}")]
    InternalError(String),
}

#[derive(CandidType, Deserialize, Serialize, Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("secret must be at least {min_len} characters")]
    TooWeak { min_len: u32 },

    #[error("confirmation does not match")]
    Mismatch,

    #[error("{0}")]
    InvalidInput(String),
}

#[derive(CandidType, Deserialize, Serialize, Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("wrong secret")]
    WrongSecret,

    #[error("wrong or already used code")]
    WrongCode,

    #[error("gate is locked")]
    Locked,

    #[error("code rejected after too many attempts")]
    TooManyAttempts,
}

impl AccessError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        AccessError::Validation(ValidationFailure::InvalidInput(msg.into()))
    }

    /// Collaborator failures are transient from the engine's point of view.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AccessError::External(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_external_errors_are_retryable() {
        assert!(AccessError::External("smtp down".to_string()).is_retryable());
        assert!(!AccessError::Auth(AuthFailure::WrongCode).is_retryable());
        assert!(!AccessError::InsufficientBalance { requested: 4, available: 2 }.is_retryable());
    }

    #[test]
    fn messages_name_the_reason() {
        let err = AccessError::Validation(ValidationFailure::TooWeak { min_len: 4 });
        assert_eq!(err.to_string(), "Validation failed: secret must be at least 4 characters");
        let err = AccessError::Cooldown { remaining_secs: 42 };
        assert_eq!(err.to_string(), "Resend available in 42s");
    }
}
