// src/backend/models/verification_code.rs
use crate::models::common::{CodeId, TimestampNs};
use candid::CandidType;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(CandidType, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodePurpose {
    EmailValidate,
    PrimaryEmailChange,
    SecondaryEmailChange,
    PasswordChange,
    PasswordRecovery,
}

impl fmt::Display for CodePurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodePurpose::EmailValidate => "email_validate",
            CodePurpose::PrimaryEmailChange => "primary_email_change",
            CodePurpose::SecondaryEmailChange => "secondary_email_change",
            CodePurpose::PasswordChange => "password_change",
            CodePurpose::PasswordRecovery => "password_recovery",
        };
        f.write_str(name)
    }
}

/// One issued code. Only the SHA-256 digest of the digits is kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationCode {
    pub id: CodeId,
    pub purpose: CodePurpose,
    pub target: String,
    pub code_digest: [u8; 32],
    pub issued_at: TimestampNs,
    pub expires_at: TimestampNs,
    pub resend_available_at: TimestampNs,
    pub consumed: bool,
    pub failed_attempts: u32,
}

impl VerificationCode {
    pub fn ticket(&self) -> CodeTicket {
        CodeTicket {
            id: self.id,
            purpose: self.purpose,
            target: self.target.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            resend_available_at: self.resend_available_at,
        }
    }
}

/// What the caller learns about an issued code. The digits only travel
/// through the notification channel.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CodeTicket {
    pub id: CodeId,
    pub purpose: CodePurpose,
    pub target: String,
    pub issued_at: TimestampNs,
    pub expires_at: TimestampNs,
    pub resend_available_at: TimestampNs,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct VerifiedCode {
    pub id: CodeId,
    pub purpose: CodePurpose,
    pub target: String,
    pub verified_at: TimestampNs,
}

/// Countdowns shown next to a code input.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct CodeStatus {
    pub id: CodeId,
    pub consumed: bool,
    pub expires_in_secs: u64,
    pub resend_in_secs: u64,
    pub attempts_left: u32,
}
