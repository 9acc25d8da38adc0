pub mod sender_key_tests;

use crate::crypto::StdCrypto;
use crate::directory::InMemoryDeviceDirectory;
use crate::ids::{ConversationId, RecipientAddress};
use crate::policy::Policy;
use crate::profile::{InMemoryProfiles, ProfileRefresher};
use crate::store::MemoryStore;
use crate::Core;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
pub struct RecordingRefresher {
    requested: Mutex<Vec<RecipientAddress>>,
}

impl RecordingRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<RecipientAddress> {
        self.requested.lock().expect("refresher lock").clone()
    }
}

impl ProfileRefresher for RecordingRefresher {
    fn request_refresh(&self, address: &RecipientAddress) {
        self.requested
            .lock()
            .expect("refresher lock")
            .push(address.clone());
    }
}

pub struct TestEnv {
    pub core: Core,
    pub store: MemoryStore,
    pub profiles: Arc<InMemoryProfiles>,
    pub directory: InMemoryDeviceDirectory,
    pub refresher: Arc<RecordingRefresher>,
    pub local: RecipientAddress,
}

pub fn full_address(phone_number: &str) -> RecipientAddress {
    RecipientAddress::new(Some(Uuid::new_v4()), Some(phone_number.to_string()))
}

pub fn conversation(label: &str) -> ConversationId {
    ConversationId::new(label)
}

pub async fn test_env() -> TestEnv {
    test_env_with(Policy::default()).await
}

pub async fn test_env_with(policy: Policy) -> TestEnv {
    build_env(policy, MemoryStore::new(), full_address("+15550100000")).await
}

/// Rebuilds a core over an existing store, simulating a process restart.
pub async fn test_env_with_store(store: MemoryStore, local: RecipientAddress) -> TestEnv {
    build_env(Policy::default(), store, local).await
}

async fn build_env(policy: Policy, store: MemoryStore, local: RecipientAddress) -> TestEnv {
    let profiles = Arc::new(InMemoryProfiles::new());
    let directory = InMemoryDeviceDirectory::new();
    let refresher = Arc::new(RecordingRefresher::new());
    let core = Core::init(
        policy,
        local.clone(),
        1,
        Arc::new(store.clone()),
        Arc::new(StdCrypto::new()),
        profiles.clone(),
        refresher.clone(),
        Arc::new(directory.clone()),
    )
    .await
    .expect("core");
    TestEnv {
        core,
        store,
        profiles,
        directory,
        refresher,
        local,
    }
}
