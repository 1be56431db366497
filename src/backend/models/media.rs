// src/backend/models/media.rs
use crate::models::common::{MediaId, PrincipalId, TimestampNs};
use crate::error::AccessError;
use candid::CandidType;
use serde::{Deserialize, Serialize};

/// Registry entry for a creator media item. The bytes live in object
/// storage; only the metadata and the optional time-to-live live here.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct MediaItem {
    pub media_id: MediaId,
    pub owner: PrincipalId,
    pub title: Option<String>,
    pub mime_type: String,
    pub storage_key: String, // Object storage key of the uploaded blob
    pub ttl_secs: Option<u64>,
    /// Deadline of the running countdown; `None` once cancelled.
    pub expires_at: Option<TimestampNs>,
    pub created_at: TimestampNs,
}

/// Countdown attached to one media item.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct MediaTimer {
    pub media_id: MediaId,
    pub ttl_secs: u64,
    pub armed_at: TimestampNs,
    pub deadline: TimestampNs,
    /// Bumped on every (re)arm so a stale wake-up can be told apart.
    pub generation: u64,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub enum TimerStatus {
    Active { remaining_secs: u64, deadline: TimestampNs },
    Inactive,
}

impl TimerStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, TimerStatus::Active { .. })
    }
}

/// Result of one timer reaching zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpiryOutcome {
    pub media_id: MediaId,
    pub fired_at: TimestampNs,
    pub deletion: Result<(), AccessError>,
}
