use serde_json::Value;

use arkiv_types::{Error, Result};

/// A backup artifact as stored in the offer store: one metadata snapshot,
/// one lifecycle snapshot, and the log sequence it was produced at. All
/// three fields are mandatory; a bundle missing any of them (or carrying a
/// null snapshot) is rejected as a backup integrity failure.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupBundle {
    pub metadata: Value,
    pub lifecycle: Value,
    pub offset: u64,
}

impl BackupBundle {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let raw: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::backup_integrity(format!("unreadable backup bundle: {e}")))?;
        let metadata = non_null_field(&raw, "metadata")?;
        let lifecycle = non_null_field(&raw, "lifecycle")?;
        let offset = raw
            .get("offset")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::backup_integrity("backup bundle has no numeric offset"))?;
        Ok(Self {
            metadata,
            lifecycle,
            offset,
        })
    }

    /// The document id carried by the metadata snapshot.
    pub fn document_id(&self) -> Result<String> {
        self.metadata
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::backup_integrity("bundle metadata has no _id"))
    }
}

fn non_null_field(raw: &Value, field: &str) -> Result<Value> {
    match raw.get(field) {
        Some(value) if !value.is_null() => Ok(value.clone()),
        _ => Err(Error::backup_integrity(format!(
            "backup bundle has no {field}"
        ))),
    }
}
