use crate::time::DAY_MS;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    pub sender_key_max_age_ms: u64,
    pub metadata_cache_entries: usize,
    pub distribution_id_cache_entries: usize,
    pub outcome_cache_entries: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            sender_key_max_age_ms: 30 * DAY_MS,
            metadata_cache_entries: 100,
            distribution_id_cache_entries: 100,
            outcome_cache_entries: 16 * 1024,
        }
    }
}
