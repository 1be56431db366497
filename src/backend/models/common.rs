// src/backend/models/common.rs
use candid::Principal;

pub type PrincipalId = Principal; // Owner of a lock session or a credit balance
pub type MediaId = String;        // Identifier of a creator media item
pub type CodeId = u64;            // Internal id of an issued verification code
pub type PendingToken = u64;      // Exposed handle of a captured pending action

pub type TimestampNs = u64; // Nanoseconds since epoch
pub type Credits = u64;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;
