use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a log entry records about its object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OfferLogAction {
    Write,
    Delete,
}

/// One entry of a container's append-only offer log.
///
/// Sequence numbers are strictly increasing and gapless within a container
/// and are never reused. The log is the replication feed: reconstruction and
/// external replicators consume it ordered by sequence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferLogEntry {
    pub container: String,
    pub object_id: String,
    pub action: OfferLogAction,
    pub sequence: u64,
    pub time: DateTime<Utc>,
}

impl OfferLogEntry {
    pub fn new(
        container: impl Into<String>,
        object_id: impl Into<String>,
        action: OfferLogAction,
        sequence: u64,
    ) -> Self {
        Self {
            container: container.into(),
            object_id: object_id.into(),
            action,
            sequence,
            time: Utc::now(),
        }
    }
}

/// Listing direction over the offer log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    Desc,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&OfferLogAction::Write).unwrap(),
            "\"WRITE\""
        );
        assert_eq!(
            serde_json::to_string(&OfferLogAction::Delete).unwrap(),
            "\"DELETE\""
        );
    }

    #[test]
    fn entry_roundtrip() {
        let entry = OfferLogEntry::new("0_unit", "aeaqaaaaaa.json", OfferLogAction::Write, 42);
        let json = serde_json::to_string(&entry).unwrap();
        let back: OfferLogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
