use crate::access::{AccessMode, UnidentifiedAccessCache};
use crate::crypto::CryptoProvider;
use crate::error::CoreError;
use crate::ids::RecipientAddress;
use crate::profile::ProfileKeyProvider;
use log::{debug, warn};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub const ACCESS_KEY_LEN: usize = 16;

const ACCESS_KEY_INFO: &[u8] = b"veil:unidentified-access-key:v1";

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AccessKey(pub [u8; ACCESS_KEY_LEN]);

impl AccessKey {
    pub fn zeroed() -> Self {
        Self([0u8; ACCESS_KEY_LEN])
    }

    pub fn is_zeroed(&self) -> bool {
        self.0 == [0u8; ACCESS_KEY_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; ACCESS_KEY_LEN] {
        &self.0
    }
}

impl Debug for AccessKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessKey(..)")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeliveryAccess {
    pub key: AccessKey,
    pub mode: AccessMode,
    pub is_random_key: bool,
}

impl DeliveryAccess {
    /// Key used for the multi-recipient fan-out envelope. Unrestricted
    /// recipients always contribute the all-zero key so the composite key
    /// is not scribbled over by a random per-call value.
    pub fn fanout_key(&self) -> AccessKey {
        if self.mode == AccessMode::Unrestricted {
            AccessKey::zeroed()
        } else {
            self.key
        }
    }
}

/// Resolves the access key and mode for one sealed-sender envelope.
pub struct DeliveryAccessResolver {
    access: Arc<UnidentifiedAccessCache>,
    profile_keys: Arc<dyn ProfileKeyProvider>,
    crypto: Arc<dyn CryptoProvider>,
    local: RecipientAddress,
}

impl DeliveryAccessResolver {
    pub fn new(
        access: Arc<UnidentifiedAccessCache>,
        profile_keys: Arc<dyn ProfileKeyProvider>,
        crypto: Arc<dyn CryptoProvider>,
        local: RecipientAddress,
    ) -> Self {
        Self {
            access,
            profile_keys,
            crypto,
            local,
        }
    }

    pub async fn resolve(
        &self,
        address: &RecipientAddress,
        require_sync_access: bool,
    ) -> Result<DeliveryAccess, CoreError> {
        if require_sync_access && address.is_same_account(&self.local) {
            let local_mode = self.access.resolve_mode(address).await;
            if local_mode == AccessMode::Disabled {
                debug!("sealed sender disabled locally; refusing sync send");
                return Err(CoreError::NoAccess);
            }
        }

        let mode = self.access.resolve_mode(address).await;
        match mode {
            AccessMode::Unrestricted => Ok(DeliveryAccess {
                key: self.random_key(),
                mode,
                is_random_key: true,
            }),
            AccessMode::Unknown => match self.derived_access_key(address).await {
                Some(key) => Ok(DeliveryAccess {
                    key,
                    mode,
                    is_random_key: false,
                }),
                None => Ok(DeliveryAccess {
                    key: self.random_key(),
                    mode,
                    is_random_key: true,
                }),
            },
            AccessMode::Enabled => match self.derived_access_key(address).await {
                Some(key) => Ok(DeliveryAccess {
                    key,
                    mode,
                    is_random_key: false,
                }),
                None => {
                    warn!("missing profile key for access-enabled recipient {}", address);
                    Err(CoreError::NoAccess)
                }
            },
            AccessMode::Disabled => Err(CoreError::NoAccess),
        }
    }

    /// Access key derived from the recipient's profile key, or `None` when
    /// no profile key is known.
    pub async fn derived_access_key(&self, address: &RecipientAddress) -> Option<AccessKey> {
        let profile_key = self.profile_keys.profile_key(address).await?;
        let digest = self.crypto.hmac_sha256(&profile_key, ACCESS_KEY_INFO);
        let mut key = [0u8; ACCESS_KEY_LEN];
        key.copy_from_slice(&digest[..ACCESS_KEY_LEN]);
        Some(AccessKey(key))
    }

    fn random_key(&self) -> AccessKey {
        let mut key = [0u8; ACCESS_KEY_LEN];
        self.crypto.random_bytes(&mut key);
        AccessKey(key)
    }
}
