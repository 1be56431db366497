// src/backend/models/config.rs
use crate::models::verification_code::CodePurpose;
use candid::CandidType;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Tunables of the access engine. Stored in a stable cell and validated
/// whenever it is replaced.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Validate)]
pub struct EngineConfig {
    /// Minimum length of a gate secret.
    #[validate(range(min = 4, max = 128))]
    pub min_secret_len: u32,
    /// Auto-lock duration given to a freshly set secret. Zero disables auto-lock.
    #[validate(range(max = 86_400))]
    pub default_auto_lock_secs: u32,
    #[validate(nested)]
    pub code_policies: CodePolicies,
    /// Wrong guesses tolerated per issued code before it is burned.
    #[validate(range(min = 1, max = 20))]
    pub max_code_attempts: u32,
    #[validate(nested)]
    pub secret_throttle: ThrottleConfig,
    #[validate(nested)]
    pub hashing: HashingConfig,
    #[validate(range(min = 1, max = 3_600))]
    pub maintenance_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_secret_len: 4,
            default_auto_lock_secs: 300,
            code_policies: CodePolicies::default(),
            max_code_attempts: 5,
            secret_throttle: ThrottleConfig::default(),
            hashing: HashingConfig::default(),
            maintenance_interval_secs: 60,
        }
    }
}

/// Lifetime and resend cooldown of codes of one purpose.
#[derive(CandidType, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Validate)]
pub struct CodePolicy {
    #[validate(range(min = 1, max = 86_400))]
    pub ttl_secs: u64,
    /// Dedicated cooldown; `None` means resend opens once the code expires.
    #[validate(range(min = 1, max = 86_400))]
    pub resend_cooldown_secs: Option<u64>,
}

impl CodePolicy {
    pub const fn with_ttl(ttl_secs: u64) -> Self {
        Self { ttl_secs, resend_cooldown_secs: None }
    }

    pub fn cooldown_secs(&self) -> u64 {
        self.resend_cooldown_secs.unwrap_or(self.ttl_secs)
    }
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, Validate)]
pub struct CodePolicies {
    #[validate(nested)]
    pub email_validate: CodePolicy,
    #[validate(nested)]
    pub primary_email_change: CodePolicy,
    #[validate(nested)]
    pub secondary_email_change: CodePolicy,
    #[validate(nested)]
    pub password_change: CodePolicy,
    #[validate(nested)]
    pub password_recovery: CodePolicy,
}

impl CodePolicies {
    pub fn for_purpose(&self, purpose: CodePurpose) -> &CodePolicy {
        match purpose {
            CodePurpose::EmailValidate => &self.email_validate,
            CodePurpose::PrimaryEmailChange => &self.primary_email_change,
            CodePurpose::SecondaryEmailChange => &self.secondary_email_change,
            CodePurpose::PasswordChange => &self.password_change,
            CodePurpose::PasswordRecovery => &self.password_recovery,
        }
    }
}

impl Default for CodePolicies {
    fn default() -> Self {
        Self {
            email_validate: CodePolicy::with_ttl(300),
            primary_email_change: CodePolicy::with_ttl(180),
            secondary_email_change: CodePolicy::with_ttl(180),
            password_change: CodePolicy::with_ttl(120),
            password_recovery: CodePolicy::with_ttl(60),
        }
    }
}

/// Backoff applied to repeated wrong secrets: after `max_failures`
/// consecutive misses the gate refuses verification for
/// `base_lockout_secs`, doubling on every further miss up to
/// `max_lockout_secs`.
#[derive(CandidType, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Validate)]
#[validate(schema(function = "validate_throttle"))]
pub struct ThrottleConfig {
    #[validate(range(min = 1, max = 100))]
    pub max_failures: u32,
    #[validate(range(min = 1))]
    pub base_lockout_secs: u64,
    #[validate(range(min = 1))]
    pub max_lockout_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self { max_failures: 5, base_lockout_secs: 30, max_lockout_secs: 15 * 60 }
    }
}

fn validate_throttle(config: &ThrottleConfig) -> Result<(), ValidationError> {
    if config.base_lockout_secs > config.max_lockout_secs {
        return Err(ValidationError::new("base_lockout_exceeds_max"));
    }
    Ok(())
}

/// Argon2id cost parameters used when hashing a new secret. Existing hashes
/// keep the parameters they were created with.
#[derive(CandidType, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Validate)]
#[validate(schema(function = "validate_hashing"))]
pub struct HashingConfig {
    #[validate(range(min = 8, max = 65_536))]
    pub memory_kib: u32,
    #[validate(range(min = 1, max = 16))]
    pub iterations: u32,
    #[validate(range(min = 1, max = 4))]
    pub parallelism: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        // Sized for the canister instruction limit rather than for desktop hardware.
        Self { memory_kib: 8 * 1024, iterations: 2, parallelism: 1 }
    }
}

fn validate_hashing(config: &HashingConfig) -> Result<(), ValidationError> {
    if config.memory_kib < 8 * config.parallelism {
        return Err(ValidationError::new("memory_below_parallelism_minimum"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn short_minimum_secret_is_rejected() {
        let config = EngineConfig { min_secret_len: 3, ..EngineConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_throttle_window_is_rejected() {
        let config = EngineConfig {
            secret_throttle: ThrottleConfig { max_failures: 3, base_lockout_secs: 600, max_lockout_secs: 60 },
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn cooldown_falls_back_to_ttl() {
        let policies = CodePolicies::default();
        assert_eq!(policies.for_purpose(CodePurpose::PasswordRecovery).cooldown_secs(), 60);
        let custom = CodePolicy { ttl_secs: 300, resend_cooldown_secs: Some(45) };
        assert_eq!(custom.cooldown_secs(), 45);
    }
}
