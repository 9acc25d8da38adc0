use crate::ids::RecipientAddress;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Source of recipient profile keys. May not know a key for every recipient.
#[async_trait]
pub trait ProfileKeyProvider: Send + Sync {
    async fn profile_key(&self, address: &RecipientAddress) -> Option<Vec<u8>>;
}

/// Fire-and-forget hook used to schedule a background profile refresh for a
/// recipient whose access state looks stale.
pub trait ProfileRefresher: Send + Sync {
    fn request_refresh(&self, address: &RecipientAddress);
}

#[derive(Clone, Copy, Default)]
pub struct NoopRefresher;

impl ProfileRefresher for NoopRefresher {
    fn request_refresh(&self, _address: &RecipientAddress) {}
}

#[derive(Default)]
pub struct InMemoryProfiles {
    by_stable_id: Mutex<HashMap<Uuid, Vec<u8>>>,
    by_phone_number: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_profile_key(&self, address: &RecipientAddress, key: Vec<u8>) {
        if let Some(stable_id) = address.stable_id {
            self.stable_ids().insert(stable_id, key.clone());
        }
        if let Some(phone_number) = address.phone_number.as_deref() {
            self.phone_numbers().insert(phone_number.to_string(), key);
        }
    }

    pub fn clear_profile_key(&self, address: &RecipientAddress) {
        if let Some(stable_id) = address.stable_id {
            self.stable_ids().remove(&stable_id);
        }
        if let Some(phone_number) = address.phone_number.as_deref() {
            self.phone_numbers().remove(phone_number);
        }
    }

    fn stable_ids(&self) -> MutexGuard<'_, HashMap<Uuid, Vec<u8>>> {
        self.by_stable_id.lock().expect("profile key lock poisoned")
    }

    fn phone_numbers(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.by_phone_number
            .lock()
            .expect("profile key lock poisoned")
    }
}

#[async_trait]
impl ProfileKeyProvider for InMemoryProfiles {
    async fn profile_key(&self, address: &RecipientAddress) -> Option<Vec<u8>> {
        if let Some(stable_id) = address.stable_id {
            if let Some(key) = self.stable_ids().get(&stable_id) {
                return Some(key.clone());
            }
        }
        if let Some(phone_number) = address.phone_number.as_deref() {
            if let Some(key) = self.phone_numbers().get(phone_number) {
                return Some(key.clone());
            }
        }
        None
    }
}
