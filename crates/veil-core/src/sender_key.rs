use crate::directory::DeviceDirectory;
use crate::error::CoreError;
use crate::ids::{ConversationId, RecipientAddress};
use crate::key_metadata::{build_key_id, decode_key_metadata, KeyMetadata, SkdmSendInfo};
use crate::policy::Policy;
use crate::store::DurableStore;
use log::{error, info, warn};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub const DISTRIBUTION_ID_COLLECTION: &str = "sender_key_distribution_id";
pub const KEY_METADATA_COLLECTION: &str = "sender_key_metadata";

struct TrackerCaches {
    distribution_ids: LruCache<String, Uuid>,
    metadata: LruCache<String, Option<KeyMetadata>>,
}

/// Tracks which recipients still need a copy of the current sender key for
/// each conversation, with bounded caches in front of the durable store.
/// The cache lock is never held across storage I/O.
pub struct SenderKeyTracker {
    owner_stable_id: Uuid,
    owner_device_id: u32,
    max_key_age_ms: u64,
    store: Arc<dyn DurableStore>,
    directory: Arc<dyn DeviceDirectory>,
    caches: Mutex<TrackerCaches>,
}

impl SenderKeyTracker {
    pub fn new(
        owner_stable_id: Uuid,
        owner_device_id: u32,
        policy: &Policy,
        store: Arc<dyn DurableStore>,
        directory: Arc<dyn DeviceDirectory>,
    ) -> Self {
        let distribution_ids = LruCache::new(
            NonZeroUsize::new(policy.distribution_id_cache_entries).unwrap_or(NonZeroUsize::MIN),
        );
        let metadata = LruCache::new(
            NonZeroUsize::new(policy.metadata_cache_entries).unwrap_or(NonZeroUsize::MIN),
        );
        Self {
            owner_stable_id,
            owner_device_id,
            max_key_age_ms: policy.sender_key_max_age_ms,
            store,
            directory,
            caches: Mutex::new(TrackerCaches {
                distribution_ids,
                metadata,
            }),
        }
    }

    /// Distribution id the current device tags sender-key messages with for
    /// this conversation. Generates and persists a fresh one on first use;
    /// the cache decides between concurrent generators so callers never see
    /// two different ids for the same conversation.
    pub async fn distribution_id_for_sending(
        &self,
        conversation: &ConversationId,
    ) -> Result<Uuid, CoreError> {
        if let Some(existing) = self.persisted_distribution_id(conversation).await? {
            return Ok(existing);
        }

        let fresh = Uuid::new_v4();
        let winner = {
            let mut caches = self.caches();
            if let Some(raced) = caches.distribution_ids.get(&conversation.value) {
                return Ok(*raced);
            }
            caches
                .distribution_ids
                .put(conversation.value.clone(), fresh);
            fresh
        };

        if let Err(e) = self
            .store
            .put(
                DISTRIBUTION_ID_COLLECTION,
                &conversation.value,
                winner.to_string().as_bytes(),
            )
            .await
        {
            self.caches().distribution_ids.pop(&conversation.value);
            return Err(e);
        }
        Ok(winner)
    }

    /// Registers (or refreshes) the sender key record this device encrypts
    /// with for the conversation. Delivery records survive a record refresh;
    /// only a brand new lineage starts with an empty one.
    pub async fn record_sender_key(
        &self,
        conversation: &ConversationId,
        serialized_record: Vec<u8>,
        now_ms: u64,
    ) -> Result<Uuid, CoreError> {
        let distribution_id = self.distribution_id_for_sending(conversation).await?;
        let key_id = build_key_id(&self.owner_stable_id, &distribution_id);
        let metadata = match self.metadata_for(&key_id).await? {
            Some(mut existing) => {
                existing.serialized_record = serialized_record;
                existing
            }
            None => KeyMetadata::new(
                distribution_id,
                self.owner_stable_id,
                self.owner_device_id,
                serialized_record,
                now_ms,
                true,
            ),
        };
        self.put_metadata(&key_id, Some(metadata)).await?;
        Ok(distribution_id)
    }

    /// Stores a sender key received from another device. Decryption keys
    /// never expire and never track delivery.
    pub async fn record_received_key(
        &self,
        owner_stable_id: Uuid,
        owner_device_id: u32,
        distribution_id: Uuid,
        serialized_record: Vec<u8>,
        now_ms: u64,
    ) -> Result<(), CoreError> {
        let key_id = build_key_id(&owner_stable_id, &distribution_id);
        let metadata = match self.metadata_for(&key_id).await? {
            Some(mut existing) => {
                existing.serialized_record = serialized_record;
                existing
            }
            None => KeyMetadata::new(
                distribution_id,
                owner_stable_id,
                owner_device_id,
                serialized_record,
                now_ms,
                false,
            ),
        };
        self.put_metadata(&key_id, Some(metadata)).await
    }

    /// Candidates that may not have the current sender key. An expired
    /// encrypting key is dropped and the whole candidate set is returned;
    /// a key is never partially reused past its lifetime.
    pub async fn recipients_needing_key(
        &self,
        conversation: &ConversationId,
        candidates: &[RecipientAddress],
        now_ms: u64,
    ) -> Result<Vec<RecipientAddress>, CoreError> {
        let Some(distribution_id) = self.persisted_distribution_id(conversation).await? else {
            return Ok(candidates.to_vec());
        };
        let key_id = build_key_id(&self.owner_stable_id, &distribution_id);
        let Some(metadata) = self.metadata_for(&key_id).await? else {
            return Ok(candidates.to_vec());
        };
        if !metadata.is_valid(now_ms, self.max_key_age_ms) {
            info!(
                "sender key for {} expired; forcing full redistribution",
                conversation
            );
            self.put_metadata(&key_id, None).await?;
            return Ok(candidates.to_vec());
        }

        let mut needing = Vec::new();
        for candidate in candidates {
            match metadata.sent_recipients.get(&candidate.subject_id()) {
                None => needing.push(candidate.clone()),
                Some(send_info) => {
                    let current = self.directory.current_devices(candidate).await?;
                    if !send_info.covers(&current) {
                        needing.push(candidate.clone());
                    }
                }
            }
        }
        Ok(needing)
    }

    /// Records that the current sender key reached `address`, snapshotting
    /// the recipient's device set at send time. Never creates metadata; a
    /// send recorded against an untracked key is a caller bug.
    pub async fn record_sent(
        &self,
        conversation: &ConversationId,
        address: &RecipientAddress,
        timestamp_ms: u64,
    ) -> Result<(), CoreError> {
        let Some(distribution_id) = self.persisted_distribution_id(conversation).await? else {
            error!(
                "recording sender key send for {} with no distribution id",
                conversation
            );
            return Err(CoreError::MissingKeyMetadata);
        };
        let key_id = build_key_id(&self.owner_stable_id, &distribution_id);
        let Some(mut metadata) = self.metadata_for(&key_id).await? else {
            error!(
                "recording sender key send for {} with no key metadata",
                conversation
            );
            return Err(CoreError::MissingKeyMetadata);
        };

        let devices = self.directory.current_devices(address).await?;
        metadata
            .sent_recipients
            .insert(address.subject_id(), SkdmSendInfo::new(timestamp_ms, devices));
        self.put_metadata(&key_id, Some(metadata)).await
    }

    /// Clears one recipient's delivery record so the key must be proven
    /// fresh for them again.
    pub async fn reset_delivery_record(
        &self,
        conversation: &ConversationId,
        address: &RecipientAddress,
    ) -> Result<(), CoreError> {
        let Some(distribution_id) = self.persisted_distribution_id(conversation).await? else {
            info!("no sender key metadata to reset for {}", conversation);
            return Ok(());
        };
        let key_id = build_key_id(&self.owner_stable_id, &distribution_id);
        let Some(mut metadata) = self.metadata_for(&key_id).await? else {
            info!("no sender key metadata to reset for {}", conversation);
            return Ok(());
        };
        metadata.reset_delivery_record(&address.subject_id());
        self.put_metadata(&key_id, Some(metadata)).await
    }

    /// Drops the conversation's key metadata entirely. The distribution id
    /// survives; the next send starts a fresh key under the same lineage.
    pub async fn reset_all(&self, conversation: &ConversationId) -> Result<(), CoreError> {
        let Some(distribution_id) = self.persisted_distribution_id(conversation).await? else {
            return Ok(());
        };
        let key_id = build_key_id(&self.owner_stable_id, &distribution_id);
        self.put_metadata(&key_id, None).await
    }

    pub async fn expire_sending_key_if_needed(
        &self,
        conversation: &ConversationId,
        now_ms: u64,
    ) -> Result<(), CoreError> {
        let Some(distribution_id) = self.persisted_distribution_id(conversation).await? else {
            return Ok(());
        };
        let key_id = build_key_id(&self.owner_stable_id, &distribution_id);
        let Some(metadata) = self.metadata_for(&key_id).await? else {
            return Ok(());
        };
        if !metadata.is_valid(now_ms, self.max_key_age_ms) {
            self.put_metadata(&key_id, None).await?;
        }
        Ok(())
    }

    pub async fn is_key_valid(
        &self,
        conversation: &ConversationId,
        now_ms: u64,
    ) -> Result<bool, CoreError> {
        let Some(distribution_id) = self.persisted_distribution_id(conversation).await? else {
            return Ok(false);
        };
        let key_id = build_key_id(&self.owner_stable_id, &distribution_id);
        Ok(self
            .metadata_for(&key_id)
            .await?
            .map(|metadata| metadata.is_valid(now_ms, self.max_key_age_ms))
            .unwrap_or(false))
    }

    /// Account reset: drops every lineage and delivery record.
    pub async fn clear(&self) -> Result<(), CoreError> {
        self.store.remove_collection(KEY_METADATA_COLLECTION).await?;
        self.store
            .remove_collection(DISTRIBUTION_ID_COLLECTION)
            .await?;
        let mut caches = self.caches();
        caches.distribution_ids.clear();
        caches.metadata.clear();
        Ok(())
    }

    async fn persisted_distribution_id(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<Uuid>, CoreError> {
        {
            let mut caches = self.caches();
            if let Some(cached) = caches.distribution_ids.get(&conversation.value) {
                return Ok(Some(*cached));
            }
        }
        let Some(bytes) = self
            .store
            .get(DISTRIBUTION_ID_COLLECTION, &conversation.value)
            .await?
        else {
            return Ok(None);
        };
        let parsed = String::from_utf8(bytes)
            .ok()
            .and_then(|raw| Uuid::parse_str(&raw).ok());
        let Some(distribution_id) = parsed else {
            warn!(
                "skipping corrupt distribution id record for {}",
                conversation
            );
            return Ok(None);
        };
        self.caches()
            .distribution_ids
            .put(conversation.value.clone(), distribution_id);
        Ok(Some(distribution_id))
    }

    /// Cache-through metadata read. Corrupt records are treated as absent
    /// so a recipient is redistributed to rather than skipped.
    async fn metadata_for(&self, key_id: &str) -> Result<Option<KeyMetadata>, CoreError> {
        {
            let mut caches = self.caches();
            if let Some(cached) = caches.metadata.get(key_id) {
                return Ok(cached.clone());
            }
        }
        let loaded = match self.store.get(KEY_METADATA_COLLECTION, key_id).await? {
            None => None,
            Some(bytes) => match decode_key_metadata(&bytes) {
                Ok(metadata) => Some(metadata),
                Err(e) => {
                    warn!("failed to deserialize sender key metadata: {}", e);
                    None
                }
            },
        };
        self.caches().metadata.put(key_id.to_string(), loaded.clone());
        Ok(loaded)
    }

    /// Store first, cache second, so a failed write leaves the cache
    /// consistent with durable state.
    async fn put_metadata(
        &self,
        key_id: &str,
        metadata: Option<KeyMetadata>,
    ) -> Result<(), CoreError> {
        match &metadata {
            Some(value) => {
                let bytes = serde_json::to_vec(value).map_err(|_| CoreError::Storage)?;
                self.store.put(KEY_METADATA_COLLECTION, key_id, &bytes).await?;
            }
            None => {
                self.store.remove(KEY_METADATA_COLLECTION, key_id).await?;
            }
        }
        self.caches().metadata.put(key_id.to_string(), metadata);
        Ok(())
    }

    fn caches(&self) -> MutexGuard<'_, TrackerCaches> {
        self.caches.lock().expect("sender key cache lock poisoned")
    }
}
