// src/backend/utils/crypto.rs
// Secret hashing and one-time code helpers.

use crate::error::AccessError;
use crate::models::config::HashingConfig;
use crate::utils::rng::EntropyPool;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub const CODE_DIGITS: u32 = 6;
const SALT_LEN: usize = 16;

/// Hashes a gate secret into an Argon2id PHC string with a fresh salt.
pub fn hash_secret(secret: &str, config: &HashingConfig, entropy: &EntropyPool) -> Result<String, AccessError> {
    let mut salt_bytes = [0u8; SALT_LEN];
    entropy.fill_bytes(&mut salt_bytes)?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AccessError::InternalError(format!("salt encoding failed: {}", e)))?;

    let params = Params::new(config.memory_kib, config.iterations, config.parallelism, None)
        .map_err(|e| AccessError::InternalError(format!("invalid argon2 params: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    argon2
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AccessError::InternalError(format!("secret hashing failed: {}", e)))
}

/// Checks `candidate` against a stored PHC string. The parameters are read
/// from the hash itself, so secrets hashed under an older config still verify.
pub fn verify_secret(candidate: &str, secret_hash: &str) -> Result<bool, AccessError> {
    let parsed = PasswordHash::new(secret_hash)
        .map_err(|e| AccessError::InternalError(format!("stored secret hash is malformed: {}", e)))?;
    match Argon2::default().verify_password(candidate.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(AccessError::InternalError(format!("secret verification failed: {}", e))),
    }
}

/// Draws a zero-padded decimal code of `CODE_DIGITS` digits.
pub fn generate_numeric_code(entropy: &EntropyPool) -> Result<String, AccessError> {
    let upper = 10u32.pow(CODE_DIGITS);
    let value = entropy.gen_below(upper)?;
    Ok(format!("{:0width$}", value, width = CODE_DIGITS as usize))
}

pub fn code_digest(code: &str) -> [u8; 32] {
    Sha256::digest(code.trim().as_bytes()).into()
}

pub fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.ct_eq(b).into()
}

/// Calculates the SHA256 hash of byte data and returns it as a hex string.
pub fn calculate_sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
