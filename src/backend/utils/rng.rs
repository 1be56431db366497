// src/backend/utils/rng.rs

use crate::error::AccessError;
use parking_lot::Mutex;
use rand::{Rng, RngCore};
use rand_chacha::{rand_core::SeedableRng, ChaCha20Rng};

/// CSPRNG shared by code generation and secret salting.
///
/// A canister has no OS entropy, so the pool starts empty and is seeded from
/// the management canister's `raw_rand` once install or upgrade completes.
/// Until then every draw fails instead of falling back to a weak source.
pub struct EntropyPool {
    rng: Mutex<Option<ChaCha20Rng>>,
}

impl EntropyPool {
    pub fn unseeded() -> Self {
        Self { rng: Mutex::new(None) }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { rng: Mutex::new(Some(ChaCha20Rng::from_seed(seed))) }
    }

    pub fn reseed(&self, seed: [u8; 32]) {
        *self.rng.lock() = Some(ChaCha20Rng::from_seed(seed));
    }

    pub fn is_seeded(&self) -> bool {
        self.rng.lock().is_some()
    }

    fn with_rng<R>(&self, f: impl FnOnce(&mut ChaCha20Rng) -> R) -> Result<R, AccessError> {
        let mut guard = self.rng.lock();
        let rng = guard
            .as_mut()
            .ok_or_else(|| AccessError::InternalError("Entropy pool accessed before seeding".to_string()))?;
        Ok(f(rng))
    }

    pub fn fill_bytes(&self, buf: &mut [u8]) -> Result<(), AccessError> {
        self.with_rng(|rng| rng.fill_bytes(buf))
    }

    /// Uniform value in `0..upper`.
    pub fn gen_below(&self, upper: u32) -> Result<u32, AccessError> {
        self.with_rng(|rng| rng.gen_range(0..upper))
    }
}

/// Seeds `pool` from the management canister's `raw_rand`.
/// Called from a zero-delay timer after `init` and `post_upgrade`.
pub async fn seed_from_raw_rand(pool: &EntropyPool) -> Result<(), AccessError> {
    let (bytes,) = ic_cdk::api::management_canister::main::raw_rand()
        .await
        .map_err(|(code, msg)| AccessError::InternalError(format!("raw_rand failed: code={:?}, msg={}", code, msg)))?;
    let seed: [u8; 32] = bytes
        .get(..32)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| AccessError::InternalError("raw_rand returned insufficient bytes for seed".to_string()))?;
    pool.reseed(seed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseeded_pool_refuses_to_draw() {
        let pool = EntropyPool::unseeded();
        assert!(!pool.is_seeded());
        assert!(matches!(pool.gen_below(10), Err(AccessError::InternalError(_))));
        pool.reseed([7u8; 32]);
        assert!(pool.gen_below(10).unwrap() < 10);
    }

    #[test]
    fn draws_stay_below_upper_bound() {
        let pool = EntropyPool::from_seed([1u8; 32]);
        for _ in 0..1_000 {
            assert!(pool.gen_below(1_000_000).unwrap() < 1_000_000);
        }
    }
}
