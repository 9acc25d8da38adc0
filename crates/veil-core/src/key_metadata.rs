use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub device_id: u32,
    pub registration_id: Option<u32>,
}

impl Device {
    pub fn new(device_id: u32, registration_id: Option<u32>) -> Self {
        Self {
            device_id,
            registration_id,
        }
    }

    /// A device is only known-unchanged when both registration ids are
    /// present and match. A missing registration id means the snapshot was
    /// taken before a session existed for the device, so it never matches.
    pub fn matches_confirmed(&self, other: &Device) -> bool {
        match (self.registration_id, other.registration_id) {
            (Some(a), Some(b)) => a == b && self.device_id == other.device_id,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkdmSendInfo {
    pub sent_at_ms: u64,
    pub devices: HashSet<Device>,
}

impl SkdmSendInfo {
    pub fn new(sent_at_ms: u64, devices: impl IntoIterator<Item = Device>) -> Self {
        Self {
            sent_at_ms,
            devices: devices.into_iter().collect(),
        }
    }

    /// True when every current device has a confirmed match in the snapshot
    /// recorded at send time.
    pub fn covers(&self, current: &[Device]) -> bool {
        current
            .iter()
            .all(|device| self.devices.iter().any(|known| known.matches_confirmed(device)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub distribution_id: Uuid,
    pub owner_stable_id: Uuid,
    pub owner_device_id: u32,
    pub serialized_record: Vec<u8>,
    pub created_at_ms: u64,
    pub is_for_encrypting: bool,
    pub sent_recipients: HashMap<String, SkdmSendInfo>,
}

impl KeyMetadata {
    pub fn new(
        distribution_id: Uuid,
        owner_stable_id: Uuid,
        owner_device_id: u32,
        serialized_record: Vec<u8>,
        created_at_ms: u64,
        is_for_encrypting: bool,
    ) -> Self {
        Self {
            distribution_id,
            owner_stable_id,
            owner_device_id,
            serialized_record,
            created_at_ms,
            is_for_encrypting,
            sent_recipients: HashMap::new(),
        }
    }

    pub fn key_id(&self) -> String {
        build_key_id(&self.owner_stable_id, &self.distribution_id)
    }

    /// Keys received from others stay valid forever; keys we encrypt with
    /// expire after `max_age_ms`.
    pub fn is_valid(&self, now_ms: u64, max_age_ms: u64) -> bool {
        if !self.is_for_encrypting {
            return true;
        }
        now_ms < self.created_at_ms.saturating_add(max_age_ms)
    }

    pub fn reset_delivery_record(&mut self, subject: &str) {
        self.sent_recipients.remove(subject);
    }
}

pub fn build_key_id(owner_stable_id: &Uuid, distribution_id: &Uuid) -> String {
    format!("{}.{}", owner_stable_id, distribution_id)
}

/// Persisted metadata has gone through three shapes. The current one tracks
/// a full send record per recipient. The one before it tracked recipient
/// device snapshots without send timestamps. The oldest only tracked bare
/// device-id lists, which carry no registration ids and cannot be migrated;
/// decoding it drops the delivery records so the key is simply redistributed.
#[derive(Deserialize)]
#[serde(untagged)]
enum VersionedKeyMetadata {
    Current(KeyMetadata),
    KeyRecipients(KeyRecipientsRecord),
    DeviceIds(DeviceIdsRecord),
}

#[derive(Deserialize)]
struct KeyRecipientsRecord {
    distribution_id: Uuid,
    owner_stable_id: Uuid,
    owner_device_id: u32,
    serialized_record: Vec<u8>,
    created_at_ms: u64,
    is_for_encrypting: bool,
    key_recipients: HashMap<String, HashSet<Device>>,
}

#[derive(Deserialize)]
struct DeviceIdsRecord {
    distribution_id: Uuid,
    owner_stable_id: Uuid,
    owner_device_id: u32,
    serialized_record: Vec<u8>,
    created_at_ms: u64,
    is_for_encrypting: bool,
    #[allow(dead_code)]
    device_ids: HashMap<String, Vec<u32>>,
}

fn from_key_recipients(record: KeyRecipientsRecord) -> KeyMetadata {
    let sent_recipients = record
        .key_recipients
        .into_iter()
        .map(|(subject, devices)| {
            (
                subject,
                SkdmSendInfo {
                    sent_at_ms: 0,
                    devices,
                },
            )
        })
        .collect();
    KeyMetadata {
        distribution_id: record.distribution_id,
        owner_stable_id: record.owner_stable_id,
        owner_device_id: record.owner_device_id,
        serialized_record: record.serialized_record,
        created_at_ms: record.created_at_ms,
        is_for_encrypting: record.is_for_encrypting,
        sent_recipients,
    }
}

fn from_device_ids(record: DeviceIdsRecord) -> KeyMetadata {
    KeyMetadata {
        distribution_id: record.distribution_id,
        owner_stable_id: record.owner_stable_id,
        owner_device_id: record.owner_device_id,
        serialized_record: record.serialized_record,
        created_at_ms: record.created_at_ms,
        is_for_encrypting: record.is_for_encrypting,
        sent_recipients: HashMap::new(),
    }
}

pub fn decode_key_metadata(bytes: &[u8]) -> Result<KeyMetadata, serde_json::Error> {
    serde_json::from_slice::<VersionedKeyMetadata>(bytes).map(|versioned| match versioned {
        VersionedKeyMetadata::Current(metadata) => metadata,
        VersionedKeyMetadata::KeyRecipients(record) => from_key_recipients(record),
        VersionedKeyMetadata::DeviceIds(record) => from_device_ids(record),
    })
}
