use crate::error::CoreError;
use crate::ids::RecipientAddress;
use crate::profile::ProfileRefresher;
use crate::store::DurableStore;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub const STABLE_ID_ACCESS_COLLECTION: &str = "access_stable_id";
pub const PHONE_NUMBER_ACCESS_COLLECTION: &str = "access_phone_number";
pub const ACCESS_CONFIG_COLLECTION: &str = "access_config";

const UNRESTRICTED_LOCAL_KEY: &str = "unrestricted_local";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Unknown,
    Enabled,
    Disabled,
    Unrestricted,
}

impl Display for AccessMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AccessMode::Unknown => "unknown",
            AccessMode::Enabled => "enabled",
            AccessMode::Disabled => "disabled",
            AccessMode::Unrestricted => "unrestricted",
        };
        write!(f, "{}", label)
    }
}

/// Outcome of comparing the two identifier-keyed records for one recipient.
/// Pure so the bias is testable without any lock or storage plumbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciliation {
    Agreed(AccessMode),
    Mismatch,
    Backfill(AccessMode),
    Absent,
}

pub fn reconcile(stable: Option<AccessMode>, phone: Option<AccessMode>) -> Reconciliation {
    match (stable, phone) {
        (Some(a), Some(b)) if a == b => Reconciliation::Agreed(a),
        (Some(_), Some(_)) => Reconciliation::Mismatch,
        (Some(mode), None) => Reconciliation::Backfill(mode),
        (None, Some(mode)) => Reconciliation::Backfill(mode),
        (None, None) => Reconciliation::Absent,
    }
}

struct AccessCaches {
    by_stable_id: HashMap<Uuid, AccessMode>,
    by_phone_number: HashMap<String, AccessMode>,
    unrestricted_local: bool,
}

/// Per-recipient sealed-sender access state, cached in memory under a fast
/// lock and persisted under two independent identifier tracks. The lock is
/// never held across storage I/O.
pub struct UnidentifiedAccessCache {
    local: RecipientAddress,
    store: Arc<dyn DurableStore>,
    refresher: Arc<dyn ProfileRefresher>,
    caches: Mutex<AccessCaches>,
}

impl UnidentifiedAccessCache {
    /// Bulk-loads both tracks before the cache is usable, so every later
    /// read is answered from memory.
    pub async fn warm(
        store: Arc<dyn DurableStore>,
        refresher: Arc<dyn ProfileRefresher>,
        local: RecipientAddress,
    ) -> Result<Self, CoreError> {
        let mut by_stable_id = HashMap::new();
        for (key, bytes) in store.scan(STABLE_ID_ACCESS_COLLECTION).await? {
            let Ok(stable_id) = Uuid::parse_str(&key) else {
                warn!("skipping invalid stable id in access store: {}", key);
                continue;
            };
            match serde_json::from_slice::<AccessMode>(&bytes) {
                Ok(mode) => {
                    by_stable_id.insert(stable_id, mode);
                }
                Err(e) => warn!("skipping corrupt access record for {}: {}", key, e),
            }
        }

        let mut by_phone_number = HashMap::new();
        for (key, bytes) in store.scan(PHONE_NUMBER_ACCESS_COLLECTION).await? {
            match serde_json::from_slice::<AccessMode>(&bytes) {
                Ok(mode) => {
                    by_phone_number.insert(key, mode);
                }
                Err(e) => warn!("skipping corrupt access record for {}: {}", key, e),
            }
        }

        let unrestricted_local = store
            .get(ACCESS_CONFIG_COLLECTION, UNRESTRICTED_LOCAL_KEY)
            .await?
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or(false);

        Ok(Self {
            local,
            store,
            refresher,
            caches: Mutex::new(AccessCaches {
                by_stable_id,
                by_phone_number,
                unrestricted_local,
            }),
        })
    }

    pub async fn resolve_mode(&self, address: &RecipientAddress) -> AccessMode {
        let (stable, phone) = {
            let caches = self.caches();
            let stable = address
                .stable_id
                .and_then(|id| caches.by_stable_id.get(&id).copied());
            let phone = address
                .phone_number
                .as_deref()
                .and_then(|number| caches.by_phone_number.get(number).copied());
            (stable, phone)
        };

        match reconcile(stable, phone) {
            Reconciliation::Agreed(mode) => mode,
            Reconciliation::Mismatch => {
                // The two tracks disagree; fail closed for this send, rewrite
                // both, and let a profile refresh settle the real state.
                warn!("access mode mismatch for {}; failing closed", address);
                if let Err(e) = self.set_mode(address, AccessMode::Disabled).await {
                    warn!("failed to persist access reconciliation: {}", e);
                }
                self.refresher.request_refresh(address);
                AccessMode::Disabled
            }
            Reconciliation::Backfill(mode) => {
                let missing_track_known = (stable.is_none() && address.stable_id.is_some())
                    || (phone.is_none() && address.phone_number.is_some());
                if missing_track_known {
                    if let Err(e) = self.set_mode(address, mode).await {
                        warn!("failed to backfill access mode for {}: {}", address, e);
                    }
                }
                mode
            }
            Reconciliation::Absent => {
                if address.is_same_account(&self.local) {
                    AccessMode::Enabled
                } else {
                    AccessMode::Unknown
                }
            }
        }
    }

    /// Updates every known identifier track. Returns without touching
    /// storage when no cached value actually changed.
    pub async fn set_mode(
        &self,
        address: &RecipientAddress,
        mode: AccessMode,
    ) -> Result<(), CoreError> {
        if address.is_same_account(&self.local) {
            info!("setting local access mode: {}", mode);
        }

        let did_change = {
            let mut caches = self.caches();
            let mut changed = false;
            if let Some(stable_id) = address.stable_id {
                if caches.by_stable_id.insert(stable_id, mode) != Some(mode) {
                    changed = true;
                }
            }
            if let Some(phone_number) = address.phone_number.as_deref() {
                if caches
                    .by_phone_number
                    .insert(phone_number.to_string(), mode)
                    != Some(mode)
                {
                    changed = true;
                }
            }
            changed
        };
        if !did_change {
            return Ok(());
        }

        let bytes = serde_json::to_vec(&mode).map_err(|_| CoreError::Storage)?;
        if let Some(stable_id) = address.stable_id {
            self.store
                .put(STABLE_ID_ACCESS_COLLECTION, &stable_id.to_string(), &bytes)
                .await?;
        }
        if let Some(phone_number) = address.phone_number.as_deref() {
            self.store
                .put(PHONE_NUMBER_ACCESS_COLLECTION, phone_number, &bytes)
                .await?;
        }
        Ok(())
    }

    pub fn unrestricted_local(&self) -> bool {
        self.caches().unrestricted_local
    }

    pub async fn set_unrestricted_local(&self, value: bool) -> Result<(), CoreError> {
        {
            self.caches().unrestricted_local = value;
        }
        let bytes = serde_json::to_vec(&value).map_err(|_| CoreError::Storage)?;
        self.store
            .put(ACCESS_CONFIG_COLLECTION, UNRESTRICTED_LOCAL_KEY, &bytes)
            .await
    }

    /// Account reset: drops both identifier tracks. Records are never
    /// deleted through any other path.
    pub async fn clear(&self) -> Result<(), CoreError> {
        self.store
            .remove_collection(STABLE_ID_ACCESS_COLLECTION)
            .await?;
        self.store
            .remove_collection(PHONE_NUMBER_ACCESS_COLLECTION)
            .await?;
        let mut caches = self.caches();
        caches.by_stable_id.clear();
        caches.by_phone_number.clear();
        Ok(())
    }

    fn caches(&self) -> MutexGuard<'_, AccessCaches> {
        self.caches.lock().expect("access cache lock poisoned")
    }
}
