use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use arkiv_types::{Error, Result, Tenant};

use crate::traits::OffsetRepository;

/// Checkpoints held in process memory; for tests and drills.
#[derive(Default)]
pub struct InMemoryOffsetRepository {
    offsets: Mutex<HashMap<String, u64>>,
}

impl OffsetRepository for InMemoryOffsetRepository {
    fn get(&self, tenant: Tenant, collection: &str) -> Result<u64> {
        let offsets = self.offsets.lock().expect("offset repository poisoned");
        Ok(offsets.get(&key(tenant, collection)).copied().unwrap_or(0))
    }

    fn put(&self, tenant: Tenant, collection: &str, offset: u64) -> Result<()> {
        let mut offsets = self.offsets.lock().expect("offset repository poisoned");
        offsets.insert(key(tenant, collection), offset);
        Ok(())
    }
}

/// Checkpoints persisted as one JSON map file, rewritten atomically
/// (temp file + rename) on every update.
pub struct FileOffsetRepository {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileOffsetRepository {
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<HashMap<String, u64>> {
        match fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                warn!(path = ?self.path, error = %e, "unreadable offset file");
                Error::database(format!("offset file decode: {e}"))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl OffsetRepository for FileOffsetRepository {
    fn get(&self, tenant: Tenant, collection: &str) -> Result<u64> {
        let _guard = self.lock.lock().expect("offset repository poisoned");
        Ok(self.load()?.get(&key(tenant, collection)).copied().unwrap_or(0))
    }

    fn put(&self, tenant: Tenant, collection: &str, offset: u64) -> Result<()> {
        let _guard = self.lock.lock().expect("offset repository poisoned");
        let mut offsets = self.load()?;
        offsets.insert(key(tenant, collection), offset);

        let parent = self
            .path
            .parent()
            .ok_or_else(|| Error::illegal_argument("offset file path has no parent"))?;
        fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        let json = serde_json::to_vec_pretty(&offsets)
            .map_err(|e| Error::database(format!("offset file encode: {e}")))?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::from(e.error))?;
        debug!(%tenant, collection, offset, "checkpoint persisted");
        Ok(())
    }
}

fn key(tenant: Tenant, collection: &str) -> String {
    format!("{tenant}:{collection}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_checkpoint_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileOffsetRepository::open(dir.path().join("offsets.json"));
        assert_eq!(repo.get(Tenant(0), "unit").unwrap(), 0);
    }

    #[test]
    fn checkpoints_are_keyed_by_tenant_and_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.json");
        let repo = FileOffsetRepository::open(&path);

        repo.put(Tenant(0), "unit", 5).unwrap();
        repo.put(Tenant(0), "objectgroup", 9).unwrap();
        repo.put(Tenant(1), "unit", 2).unwrap();

        assert_eq!(repo.get(Tenant(0), "unit").unwrap(), 5);
        assert_eq!(repo.get(Tenant(0), "objectgroup").unwrap(), 9);
        assert_eq!(repo.get(Tenant(1), "unit").unwrap(), 2);

        // Survives a fresh handle.
        let reopened = FileOffsetRepository::open(&path);
        assert_eq!(reopened.get(Tenant(0), "unit").unwrap(), 5);
    }

    #[test]
    fn in_memory_repository_round_trips() {
        let repo = InMemoryOffsetRepository::default();
        assert_eq!(repo.get(Tenant(7), "unit").unwrap(), 0);
        repo.put(Tenant(7), "unit", 12).unwrap();
        assert_eq!(repo.get(Tenant(7), "unit").unwrap(), 12);
    }
}
