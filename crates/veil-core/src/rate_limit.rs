use crate::time::{HOUR_MS, MINUTE_MS};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    NetworkFailure,
    RetryLimit,
    Throttled,
    ServiceError,
    UnknownError,
    NoData,
    Invalid,
    Success,
}

impl OutcomeKind {
    /// Minimum wait before the same subject is attempted again. Transient
    /// failures retry soonest; permanent-looking ones wait hours.
    pub fn min_interval_ms(self) -> u64 {
        match self {
            OutcomeKind::NetworkFailure => MINUTE_MS,
            OutcomeKind::Throttled => 2 * MINUTE_MS,
            OutcomeKind::Success => 2 * MINUTE_MS,
            OutcomeKind::RetryLimit => 5 * MINUTE_MS,
            OutcomeKind::ServiceError => 30 * MINUTE_MS,
            OutcomeKind::UnknownError | OutcomeKind::NoData | OutcomeKind::Invalid => 6 * HOUR_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub kind: OutcomeKind,
    pub at_ms: u64,
}

/// Per-subject backoff tracker shared by background refresh jobs. Purely
/// ephemeral; losing it on restart only resets retry timing. The capacity
/// ceiling is generous because a forgotten subject reads as "never
/// attempted" and costs a redundant fetch.
pub struct OutcomeTracker {
    entries: Mutex<LruCache<String, OutcomeRecord>>,
}

impl OutcomeTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    pub fn should_attempt(&self, subject: &str, now_ms: u64) -> bool {
        let mut entries = self.entries();
        match entries.get(subject) {
            None => true,
            Some(record) => {
                now_ms.saturating_sub(record.at_ms) >= record.kind.min_interval_ms()
            }
        }
    }

    /// Overwrites the subject's record. At capacity the least recently used
    /// subject is silently evicted.
    pub fn record_outcome(&self, subject: &str, kind: OutcomeKind, now_ms: u64) {
        self.entries()
            .put(subject.to_string(), OutcomeRecord { kind, at_ms: now_ms });
    }

    pub fn last_outcome(&self, subject: &str) -> Option<OutcomeRecord> {
        self.entries().peek(subject).copied()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, OutcomeRecord>> {
        self.entries.lock().expect("outcome tracker lock poisoned")
    }
}
