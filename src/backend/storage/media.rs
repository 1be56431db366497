// src/backend/storage/media.rs
use crate::adapter::ContentStore;
use crate::error::AccessError;
use crate::models::common::PrincipalId;
use crate::models::media::MediaItem;
use crate::storage::memory::{get_media_items_memory, Memory};
use crate::storage::storable::Cbor;
use ic_stable_structures::StableBTreeMap;
use std::cell::RefCell;
use tracing::debug;

type StorableMediaItem = Cbor<MediaItem>;

thread_local! {
    /// Creator media registry: Key = media id, Value = MediaItem
    static MEDIA_ITEMS: RefCell<StableBTreeMap<String, StorableMediaItem, Memory>> = RefCell::new(
        StableBTreeMap::init(get_media_items_memory())
    );
}

/// Inserts a media item. Fails if the id is already registered.
pub fn insert_media(item: MediaItem) -> Result<(), AccessError> {
    MEDIA_ITEMS.with(|map_ref| {
        let mut map = map_ref.borrow_mut();
        if map.contains_key(&item.media_id) {
            return Err(AccessError::InvalidState(format!("media {} is already registered", item.media_id)));
        }
        map.insert(item.media_id.clone(), Cbor(item));
        Ok(())
    })
}

pub fn get_media(media_id: &str) -> Option<MediaItem> {
    MEDIA_ITEMS.with(|map_ref| map_ref.borrow().get(&media_id.to_string()).map(|c| c.0))
}

/// Replaces an existing item.
pub fn update_media(item: MediaItem) -> Result<(), AccessError> {
    MEDIA_ITEMS.with(|map_ref| {
        let mut map = map_ref.borrow_mut();
        if !map.contains_key(&item.media_id) {
            return Err(AccessError::NotFound(format!("media {}", item.media_id)));
        }
        map.insert(item.media_id.clone(), Cbor(item));
        Ok(())
    })
}

pub fn remove_media(media_id: &str) -> Option<MediaItem> {
    MEDIA_ITEMS.with(|map_ref| map_ref.borrow_mut().remove(&media_id.to_string()).map(|c| c.0))
}

/// Lists an owner's media. Note: scans the whole registry.
pub fn list_media_by_owner(owner: PrincipalId) -> Vec<MediaItem> {
    MEDIA_ITEMS.with(|map_ref| {
        map_ref
            .borrow()
            .iter()
            .map(|(_, item)| item.0)
            .filter(|item| item.owner == owner)
            .collect()
    })
}

/// Media items with a running countdown; used to re-arm timers after an upgrade.
pub fn media_with_deadline() -> Vec<MediaItem> {
    MEDIA_ITEMS.with(|map_ref| {
        map_ref
            .borrow()
            .iter()
            .map(|(_, item)| item.0)
            .filter(|item| item.expires_at.is_some())
            .collect()
    })
}

/// `ContentStore` over the media registry. Deleting an id that is already
/// gone succeeds, so an out-of-band delete racing the timer is harmless.
#[derive(Clone, Copy, Debug, Default)]
pub struct StableContentStore;

impl ContentStore for StableContentStore {
    fn delete(&self, media_id: &str) -> Result<(), AccessError> {
        match remove_media(media_id) {
            Some(item) => debug!(media_id, storage_key = %item.storage_key, "media registry entry removed"),
            None => debug!(media_id, "media already removed"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::principal;

    fn item(id: &str, owner: u8, ttl_secs: Option<u64>) -> MediaItem {
        MediaItem {
            media_id: id.to_string(),
            owner: principal(owner),
            title: None,
            mime_type: "video/mp4".to_string(),
            storage_key: format!("media/{}", id),
            ttl_secs,
            expires_at: ttl_secs.map(|ttl| ttl * 1_000_000_000),
            created_at: 0,
        }
    }

    #[test]
    fn registry_is_keyed_by_id_and_listed_by_owner() {
        insert_media(item("a", 1, Some(60))).unwrap();
        insert_media(item("b", 1, None)).unwrap();
        insert_media(item("c", 2, None)).unwrap();
        assert!(matches!(insert_media(item("a", 1, None)), Err(AccessError::InvalidState(_))));

        assert_eq!(list_media_by_owner(principal(1)).len(), 2);
        assert_eq!(media_with_deadline().len(), 1);
    }

    #[test]
    fn content_store_delete_is_idempotent() {
        insert_media(item("a", 1, Some(60))).unwrap();
        let store = StableContentStore;
        store.delete("a").unwrap();
        assert!(get_media("a").is_none());
        assert!(store.delete("a").is_ok());
    }
}
