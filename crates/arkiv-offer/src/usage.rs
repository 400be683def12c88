use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use arkiv_types::{Error, Result};

/// Per-container usage counters, persisted as a JSON sidecar next to the
/// object tree. The sidecar is advisory: when it is missing or unreadable
/// it is rebuilt by a full scan of the container's object directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub object_count: u64,
    pub used_bytes: u64,
}

impl ContainerUsage {
    /// Load the sidecar at `path`, or rebuild it by scanning `objects_dir`
    /// when absent or corrupt. A rebuild persists the fresh counters.
    pub fn load_or_rescan(path: &Path, objects_dir: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(usage) => return Ok(usage),
                Err(e) => {
                    warn!(?path, error = %e, "unreadable usage sidecar, rescanning");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let usage = Self::rescan(objects_dir)?;
        usage.persist(path)?;
        Ok(usage)
    }

    /// Walk the object directory and count committed objects and bytes.
    pub fn rescan(objects_dir: &Path) -> Result<Self> {
        let mut usage = Self::default();
        if !objects_dir.exists() {
            return Ok(usage);
        }
        for entry in WalkDir::new(objects_dir) {
            let entry = entry.map_err(|e| Error::database(format!("usage rescan: {e}")))?;
            if entry.file_type().is_file() {
                usage.object_count += 1;
                usage.used_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        debug!(?objects_dir, count = usage.object_count, bytes = usage.used_bytes, "usage rescan");
        Ok(usage)
    }

    /// Apply a signed delta to both counters, saturating at zero.
    pub fn apply_delta(&mut self, objects: i64, bytes: i64) {
        self.object_count = add_signed(self.object_count, objects);
        self.used_bytes = add_signed(self.used_bytes, bytes);
    }

    /// Atomically persist the sidecar (write to a temp file, then rename).
    pub fn persist(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::illegal_argument("usage sidecar path has no parent"))?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::database(format!("usage encode: {e}")))?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::from(e.error))?;
        Ok(())
    }
}

fn add_signed(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta as u64)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}
