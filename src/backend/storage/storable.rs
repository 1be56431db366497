// src/backend/storage/storable.rs
use candid::Principal;
use ic_stable_structures::{storable::Bound, Storable};
use serde::{de::DeserializeOwned, Serialize};
use std::borrow::Cow;

/// Helper struct to wrap any type T that implements Serialize and DeserializeOwned
/// to make it Storable using CBOR encoding.
#[derive(Clone, Debug, Ord, PartialOrd, Eq, PartialEq)]
pub struct Cbor<T>(pub T)
where
    T: Serialize + DeserializeOwned;

impl<T> Storable for Cbor<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_bytes(&self) -> Cow<[u8]> {
        let mut writer = vec![];
        ciborium::ser::into_writer(&self.0, &mut writer)
            .expect("Failed to serialize value to CBOR for stable storage");
        Cow::Owned(writer)
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        let value: T = ciborium::de::from_reader(bytes.as_ref())
            .expect("Failed to deserialize value from CBOR from stable storage");
        Cbor(value)
    }

    const BOUND: Bound = Bound::Unbounded;
}

pub type PrincipalBytes = Vec<u8>; // Map key for principal-indexed tables

pub fn principal_key(principal: &Principal) -> PrincipalBytes {
    principal.as_slice().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CodePurpose;

    #[test]
    fn cbor_wrapper_round_trips_models() {
        let value = Cbor((CodePurpose::PasswordRecovery, "a@example.com".to_string()));
        let restored: Cbor<(CodePurpose, String)> = Cbor::from_bytes(value.to_bytes());
        assert_eq!(restored, value);
    }
}
