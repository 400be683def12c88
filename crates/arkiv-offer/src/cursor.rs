use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use arkiv_types::{Error, Result};

/// Opaque handle for a server-side listing cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CursorId(Uuid);

impl CursorId {
    fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for CursorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CursorId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::illegal_argument(format!("invalid cursor id {s:?}: {e}")))
    }
}

/// One object surfaced by a container listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEntry {
    pub object_id: String,
    pub size: u64,
}

struct CursorSession {
    container: String,
    entries: Vec<ObjectEntry>,
    position: usize,
}

/// Ephemeral cursor sessions over container listing snapshots. A cursor
/// holds the listing taken at creation time; objects committed afterwards
/// do not appear in it.
#[derive(Default)]
pub(crate) struct CursorRegistry {
    sessions: Mutex<HashMap<CursorId, CursorSession>>,
}

impl CursorRegistry {
    /// Register a listing snapshot and hand out its cursor id.
    pub(crate) fn create(&self, container: &str, entries: Vec<ObjectEntry>) -> CursorId {
        let id = CursorId::generate();
        debug!(container, %id, total = entries.len(), "cursor opened");
        let mut sessions = self.sessions.lock().expect("cursor registry mutex poisoned");
        sessions.insert(
            id,
            CursorSession {
                container: container.to_string(),
                entries,
                position: 0,
            },
        );
        id
    }

    /// Next page of at most `page_size` entries, or `None` once the
    /// snapshot is exhausted. An exhausted cursor stays open until it is
    /// finalized.
    pub(crate) fn next(&self, id: CursorId, page_size: usize) -> Result<Option<Vec<ObjectEntry>>> {
        let mut sessions = self.sessions.lock().expect("cursor registry mutex poisoned");
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("cursor {id}")))?;
        if session.position >= session.entries.len() {
            return Ok(None);
        }
        let end = (session.position + page_size.max(1)).min(session.entries.len());
        let page = session.entries[session.position..end].to_vec();
        session.position = end;
        Ok(Some(page))
    }

    /// Close a cursor and release its snapshot. Unknown ids are ignored so
    /// finalization is idempotent.
    pub(crate) fn finalize(&self, id: CursorId) {
        let mut sessions = self.sessions.lock().expect("cursor registry mutex poisoned");
        if let Some(session) = sessions.remove(&id) {
            debug!(container = %session.container, %id, "cursor closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(ids: &[&str]) -> Vec<ObjectEntry> {
        ids.iter()
            .map(|id| ObjectEntry {
                object_id: id.to_string(),
                size: 1,
            })
            .collect()
    }

    #[test]
    fn pages_until_exhaustion() {
        let registry = CursorRegistry::default();
        let id = registry.create("0_unit", entries(&["a", "b", "c", "d", "e"]));

        let first = registry.next(id, 2).unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].object_id, "a");

        let second = registry.next(id, 2).unwrap().unwrap();
        assert_eq!(second[0].object_id, "c");

        let third = registry.next(id, 2).unwrap().unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].object_id, "e");

        assert!(registry.next(id, 2).unwrap().is_none());
        // Exhausted but not finalized: still answers None, not NotFound.
        assert!(registry.next(id, 2).unwrap().is_none());
    }

    #[test]
    fn finalized_cursor_is_gone() {
        let registry = CursorRegistry::default();
        let id = registry.create("0_unit", entries(&["a"]));
        registry.finalize(id);
        assert!(registry.next(id, 10).is_err());
        // Idempotent.
        registry.finalize(id);
    }

    #[test]
    fn unknown_cursor_is_not_found() {
        let registry = CursorRegistry::default();
        let id: CursorId = Uuid::now_v7().to_string().parse().unwrap();
        let err = registry.next(id, 10).unwrap_err();
        assert_eq!(err.kind(), arkiv_types::ErrorKind::NotFound);
    }

    #[test]
    fn empty_snapshot_is_immediately_exhausted() {
        let registry = CursorRegistry::default();
        let id = registry.create("0_unit", Vec::new());
        assert!(registry.next(id, 10).unwrap().is_none());
    }
}
