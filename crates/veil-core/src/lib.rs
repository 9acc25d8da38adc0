pub mod access;
pub mod crypto;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod ids;
pub mod key_metadata;
pub mod policy;
pub mod profile;
pub mod rate_limit;
pub mod sender_key;
pub mod store;
pub mod time;

#[cfg(test)]
mod tests;

use access::{AccessMode, UnidentifiedAccessCache};
use crypto::CryptoProvider;
use delivery::{DeliveryAccess, DeliveryAccessResolver};
use directory::DeviceDirectory;
use error::CoreError;
use ids::{ConversationId, RecipientAddress};
use policy::Policy;
use profile::{ProfileKeyProvider, ProfileRefresher};
use rate_limit::OutcomeTracker;
use sender_key::SenderKeyTracker;
use std::sync::Arc;
use store::DurableStore;
use uuid::Uuid;

/// Process-wide wiring for the sealed-sender core. Every collaborator is
/// injected once here and handed down; components never reach for globals.
pub struct Core {
    access: Arc<UnidentifiedAccessCache>,
    delivery: DeliveryAccessResolver,
    sender_keys: SenderKeyTracker,
    profile_fetch_outcomes: OutcomeTracker,
    lookup_outcomes: OutcomeTracker,
}

impl Core {
    #[allow(clippy::too_many_arguments)]
    pub async fn init(
        policy: Policy,
        local: RecipientAddress,
        local_device_id: u32,
        store: Arc<dyn DurableStore>,
        crypto: Arc<dyn CryptoProvider>,
        profile_keys: Arc<dyn ProfileKeyProvider>,
        refresher: Arc<dyn ProfileRefresher>,
        directory: Arc<dyn DeviceDirectory>,
    ) -> Result<Self, CoreError> {
        let local_stable_id = local
            .stable_id
            .ok_or_else(|| CoreError::Validation("local stable id".to_string()))?;
        let access =
            Arc::new(UnidentifiedAccessCache::warm(store.clone(), refresher, local.clone()).await?);
        let delivery =
            DeliveryAccessResolver::new(access.clone(), profile_keys, crypto, local.clone());
        let sender_keys = SenderKeyTracker::new(
            local_stable_id,
            local_device_id,
            &policy,
            store,
            directory,
        );
        Ok(Self {
            access,
            delivery,
            sender_keys,
            profile_fetch_outcomes: OutcomeTracker::new(policy.outcome_cache_entries),
            lookup_outcomes: OutcomeTracker::new(policy.outcome_cache_entries),
        })
    }

    // Recipient access state

    pub async fn resolve_mode(&self, address: &RecipientAddress) -> AccessMode {
        self.access.resolve_mode(address).await
    }

    pub async fn set_mode(
        &self,
        address: &RecipientAddress,
        mode: AccessMode,
    ) -> Result<(), CoreError> {
        self.access.set_mode(address, mode).await
    }

    pub fn unrestricted_local(&self) -> bool {
        self.access.unrestricted_local()
    }

    pub async fn set_unrestricted_local(&self, value: bool) -> Result<(), CoreError> {
        self.access.set_unrestricted_local(value).await
    }

    // Delivery access

    pub async fn resolve_delivery_access(
        &self,
        address: &RecipientAddress,
        require_sync_access: bool,
    ) -> Result<DeliveryAccess, CoreError> {
        self.delivery.resolve(address, require_sync_access).await
    }

    // Sender key distribution

    pub async fn distribution_id_for_sending(
        &self,
        conversation: &ConversationId,
    ) -> Result<Uuid, CoreError> {
        self.sender_keys.distribution_id_for_sending(conversation).await
    }

    pub async fn record_sender_key(
        &self,
        conversation: &ConversationId,
        serialized_record: Vec<u8>,
        now_ms: u64,
    ) -> Result<Uuid, CoreError> {
        self.sender_keys
            .record_sender_key(conversation, serialized_record, now_ms)
            .await
    }

    pub async fn recipients_needing_key(
        &self,
        conversation: &ConversationId,
        candidates: &[RecipientAddress],
        now_ms: u64,
    ) -> Result<Vec<RecipientAddress>, CoreError> {
        self.sender_keys
            .recipients_needing_key(conversation, candidates, now_ms)
            .await
    }

    pub async fn record_sent(
        &self,
        conversation: &ConversationId,
        address: &RecipientAddress,
        timestamp_ms: u64,
    ) -> Result<(), CoreError> {
        self.sender_keys
            .record_sent(conversation, address, timestamp_ms)
            .await
    }

    pub async fn reset_delivery_record(
        &self,
        conversation: &ConversationId,
        address: &RecipientAddress,
    ) -> Result<(), CoreError> {
        self.sender_keys
            .reset_delivery_record(conversation, address)
            .await
    }

    pub async fn reset_all(&self, conversation: &ConversationId) -> Result<(), CoreError> {
        self.sender_keys.reset_all(conversation).await
    }

    pub fn sender_keys(&self) -> &SenderKeyTracker {
        &self.sender_keys
    }

    /// Account reset: wipes access records and every sender key lineage.
    pub async fn reset_account(&self) -> Result<(), CoreError> {
        self.access.clear().await?;
        self.sender_keys.clear().await
    }

    // Background job rate limiting

    pub fn profile_fetch_limiter(&self) -> &OutcomeTracker {
        &self.profile_fetch_outcomes
    }

    pub fn lookup_limiter(&self) -> &OutcomeTracker {
        &self.lookup_outcomes
    }
}
