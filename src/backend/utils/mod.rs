pub mod crypto;
pub mod guards;
pub mod rate_limit;
pub mod rng;
pub mod time;
