use crate::error::CoreError;
use crate::ids::RecipientAddress;
use crate::key_metadata::Device;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Source of the current device set for a recipient.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn current_devices(&self, address: &RecipientAddress) -> Result<Vec<Device>, CoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryDeviceDirectory {
    devices: Arc<Mutex<HashMap<String, Vec<Device>>>>,
}

impl InMemoryDeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_devices(&self, address: &RecipientAddress, devices: Vec<Device>) {
        let mut guard = self.devices.lock().await;
        guard.insert(address.subject_id(), devices);
    }

    pub async fn add_device(&self, address: &RecipientAddress, device: Device) {
        let mut guard = self.devices.lock().await;
        guard.entry(address.subject_id()).or_default().push(device);
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDeviceDirectory {
    async fn current_devices(&self, address: &RecipientAddress) -> Result<Vec<Device>, CoreError> {
        let guard = self.devices.lock().await;
        Ok(guard.get(&address.subject_id()).cloned().unwrap_or_default())
    }
}
