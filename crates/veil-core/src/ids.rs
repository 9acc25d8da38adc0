use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipientAddress {
    pub stable_id: Option<Uuid>,
    pub phone_number: Option<String>,
}

impl RecipientAddress {
    pub fn new(stable_id: Option<Uuid>, phone_number: Option<String>) -> Self {
        Self {
            stable_id,
            phone_number,
        }
    }

    pub fn from_stable_id(stable_id: Uuid) -> Self {
        Self {
            stable_id: Some(stable_id),
            phone_number: None,
        }
    }

    pub fn from_phone_number(phone_number: impl Into<String>) -> Self {
        Self {
            stable_id: None,
            phone_number: Some(phone_number.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stable_id.is_none() && self.phone_number.is_none()
    }

    /// Two addresses denote the same account when either identifier matches.
    pub fn is_same_account(&self, other: &RecipientAddress) -> bool {
        if let (Some(a), Some(b)) = (self.stable_id, other.stable_id) {
            if a == b {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (self.phone_number.as_deref(), other.phone_number.as_deref()) {
            if a == b {
                return true;
            }
        }
        false
    }

    /// Preferred single identifier for keying per-recipient records.
    pub fn subject_id(&self) -> String {
        if let Some(stable_id) = self.stable_id {
            stable_id.to_string()
        } else {
            self.phone_number.clone().unwrap_or_default()
        }
    }
}

impl Display for RecipientAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.stable_id, self.phone_number.as_deref()) {
            (Some(stable_id), Some(phone_number)) => {
                write!(f, "{}/{}", stable_id, phone_number)
            }
            (Some(stable_id), None) => write!(f, "{}", stable_id),
            (None, Some(phone_number)) => write!(f, "{}", phone_number),
            (None, None) => write!(f, "<empty>"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationId {
    pub value: String,
}

impl ConversationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Display for ConversationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}
