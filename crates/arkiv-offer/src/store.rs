use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use sysinfo::Disks;
use tracing::{debug, error, info, warn};

use arkiv_digest::{hash_reader, DigestAlgorithm, DigestingReader};
use arkiv_types::{DataCategory, Error, OfferLogAction, OfferLogEntry, Order, Result};
use arkiv_verify::{BackgroundDigestValidator, CheckedObject, DigestSource};

use crate::cursor::{CursorId, CursorRegistry, ObjectEntry};
use crate::log::OfferLog;
use crate::multiplex::MultiplexedStreamReader;
use crate::usage::ContainerUsage;

const OBJECTS_DIR: &str = "obj";
const DIGESTS_DIR: &str = "dg";
const TMP_DIR: &str = "tmp";
const USAGE_FILE: &str = "usage.json";
const LOG_FILE: &str = "offer.log";

const DEFAULT_VALIDATOR_POOL_SIZE: usize = 4;
const DEFAULT_CURSOR_PAGE_SIZE: usize = 100;

/// Outcome of a successful single-object write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    pub digest: String,
    pub size: u64,
}

/// Identity of a stored object, as reported to audits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub object_id: String,
    pub digest: String,
    pub size: u64,
}

/// Capacity report for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub usable_space: u64,
    pub used_bytes: u64,
    pub object_count: u64,
}

struct CommitOutcome {
    digest: String,
    size: u64,
    /// True when an identical WORM object was already present and the write
    /// was skipped.
    existing: bool,
    object_delta: i64,
    byte_delta: i64,
}

/// One opened container: its log handle, cached usage counters and paths.
struct Container {
    name: String,
    root: PathBuf,
    log: OfferLog,
    usage: Mutex<ContainerUsage>,
}

impl Container {
    fn object_path(&self, object_id: &str) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(object_id)
    }

    fn digest_path(&self, object_id: &str) -> PathBuf {
        self.root.join(DIGESTS_DIR).join(object_id)
    }

    fn apply_usage(&self, objects: i64, bytes: i64) -> Result<()> {
        if objects == 0 && bytes == 0 {
            return Ok(());
        }
        let mut usage = self.usage.lock().expect("usage mutex poisoned");
        usage.apply_delta(objects, bytes);
        usage.persist(&self.root.join(USAGE_FILE))
    }

    /// Digest of the bytes currently under `object_id`: the sidecar when it
    /// matches the requested algorithm, else recomputed from the object (and
    /// persisted back).
    fn stored_digest(&self, object_id: &str, algorithm: DigestAlgorithm) -> Result<String> {
        let sidecar = self.digest_path(object_id);
        if let Ok(text) = fs::read_to_string(&sidecar) {
            if let Some((name, hex)) = text.trim().split_once(':') {
                if name == algorithm.name() && !hex.is_empty() {
                    return Ok(hex.to_string());
                }
            }
            debug!(container = %self.name, object_id, "digest sidecar stale, recomputing");
        }
        self.refresh_digest(object_id, algorithm)
    }

    /// Recompute the digest from the stored bytes and persist the sidecar.
    fn refresh_digest(&self, object_id: &str, algorithm: DigestAlgorithm) -> Result<String> {
        let file = open_object(&self.object_path(object_id), &self.name, object_id)?;
        let digest = hash_reader(algorithm, file)?;
        self.write_digest_sidecar(object_id, algorithm, &digest)?;
        Ok(digest)
    }

    fn write_digest_sidecar(
        &self,
        object_id: &str,
        algorithm: DigestAlgorithm,
        digest: &str,
    ) -> Result<()> {
        fs::write(
            self.digest_path(object_id),
            format!("{}:{digest}", algorithm.name()),
        )?;
        Ok(())
    }
}

/// Adapter binding one container and one digest algorithm to the
/// validator's [`DigestSource`] seam.
pub struct ContainerDigestProbe {
    container: Arc<Container>,
    algorithm: DigestAlgorithm,
}

impl DigestSource for ContainerDigestProbe {
    fn refresh_digest(&self, object_id: &str) -> Result<String> {
        self.container.refresh_digest(object_id, self.algorithm)
    }

    fn stored_digest(&self, object_id: &str) -> Result<String> {
        self.container.stored_digest(object_id, self.algorithm)
    }
}

/// Filesystem-backed offer store.
///
/// Containers are directories under the store root, created lazily on first
/// access. Writes are committed atomically through a per-container staging
/// directory; write-once categories rely on a create-if-absent rename, so
/// two concurrent writers of the same key cannot interleave bytes and the
/// loser is resolved by digest comparison.
pub struct OfferStore {
    root: PathBuf,
    validator_pool_size: usize,
    cursor_page_size: usize,
    containers: RwLock<HashMap<String, Arc<Container>>>,
    cursors: CursorRegistry,
}

impl OfferStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!(?root, "offer store opened");
        Ok(Self {
            root,
            validator_pool_size: DEFAULT_VALIDATOR_POOL_SIZE,
            cursor_page_size: DEFAULT_CURSOR_PAGE_SIZE,
            containers: RwLock::new(HashMap::new()),
            cursors: CursorRegistry::default(),
        })
    }

    pub fn with_validator_pool_size(mut self, pool_size: usize) -> Self {
        self.validator_pool_size = pool_size.max(1);
        self
    }

    pub fn with_cursor_page_size(mut self, page_size: usize) -> Self {
        self.cursor_page_size = page_size.max(1);
        self
    }

    /// Write one object. For write-once categories an existing object with
    /// the same digest makes the call an idempotent no-op; a different
    /// digest is a [`Conflict`](arkiv_types::ErrorKind::Conflict) and the
    /// stored bytes are left untouched. Every successful call, including
    /// the idempotent republish, appends one WRITE entry to the offer log.
    pub fn put<R: Read>(
        &self,
        container: &str,
        object_id: &str,
        reader: &mut R,
        category: DataCategory,
        algorithm: DigestAlgorithm,
    ) -> Result<PutResult> {
        validate_name(object_id, "object id")?;
        let container = self.container(container)?;
        let outcome = commit_object(&container, object_id, reader, category, algorithm)?;
        container.log.append(OfferLogAction::Write, object_id)?;
        container.apply_usage(outcome.object_delta, outcome.byte_delta)?;
        debug!(
            container = %container.name,
            object_id,
            size = outcome.size,
            existing = outcome.existing,
            "object put"
        );
        Ok(PutResult {
            digest: outcome.digest,
            size: outcome.size,
        })
    }

    /// Write a batch of objects from one multiplexed stream, one framed
    /// entry per declared id, in order.
    ///
    /// Each entry follows the same write-once rule as [`put`](Self::put). A
    /// failure aborts the remaining entries, but entries already durably
    /// written stay: their WRITE log records and the usage delta are applied
    /// on the error path too, then the original error is returned. Entries
    /// remaining in the stream after the declared ids make the whole call an
    /// `IllegalArgument`.
    ///
    /// Committed entries are handed to a fresh background digest validator;
    /// its findings are logged, never turned into a failure of this call.
    /// The returned objects are the validator's accepted set, in submission
    /// order.
    pub fn bulk_put<S: AsRef<str>, R: Read>(
        &self,
        container: &str,
        object_ids: &[S],
        reader: R,
        category: DataCategory,
        algorithm: DigestAlgorithm,
    ) -> Result<Vec<CheckedObject>> {
        for object_id in object_ids {
            validate_name(object_id.as_ref(), "object id")?;
        }
        let container = self.container(container)?;
        let probe = Arc::new(ContainerDigestProbe {
            container: Arc::clone(&container),
            algorithm,
        });
        let mut validator = BackgroundDigestValidator::new(probe, self.validator_pool_size);

        let mut stream = MultiplexedStreamReader::new(reader);
        let mut committed_ids: Vec<String> = Vec::new();
        let mut object_delta = 0i64;
        let mut byte_delta = 0i64;
        let mut failure: Option<Error> = None;

        for object_id in object_ids {
            let object_id = object_id.as_ref();
            let entry = match stream.next_entry() {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    failure = Some(Error::illegal_argument(format!(
                        "stream ended before declared object {object_id:?}"
                    )));
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            let mut entry = entry;
            match commit_object(&container, object_id, &mut entry, category, algorithm) {
                Ok(outcome) => {
                    committed_ids.push(object_id.to_string());
                    object_delta += outcome.object_delta;
                    byte_delta += outcome.byte_delta;
                    if outcome.existing {
                        validator.add_existing_worm_object_to_check(
                            object_id,
                            &outcome.digest,
                            outcome.size,
                        );
                    } else {
                        validator.add_written_object_to_check(
                            object_id,
                            &outcome.digest,
                            outcome.size,
                        );
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if failure.is_none() {
            let trailing = match stream.next_entry() {
                Ok(None) => None,
                Ok(Some(_)) => Some(Error::illegal_argument(
                    "more stream entries than declared object ids",
                )),
                Err(e) => Some(e),
            };
            failure = trailing;
            if failure.is_none() {
                if let Err(e) = stream.finish() {
                    failure = Some(e);
                }
            }
        }

        // The log records and the usage delta cover what was durably
        // committed, on the error path as well.
        if !committed_ids.is_empty() {
            if let Err(e) = container.log.append_batch(OfferLogAction::Write, &committed_ids) {
                error!(container = %container.name, error = %e, "offer log append after bulk write failed");
                failure.get_or_insert(e);
            }
            if let Err(e) = container.apply_usage(object_delta, byte_delta) {
                error!(container = %container.name, error = %e, "usage update after bulk write failed");
                failure.get_or_insert(e);
            }
        }

        validator.await_termination();
        if validator.has_conflicts_reported() {
            warn!(container = %container.name, "bulk write reported digest conflicts");
        }
        if validator.has_technical_exceptions_reported() {
            warn!(container = %container.name, "bulk write digest checks failed technically");
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(validator.written_objects()),
        }
    }

    /// Open an object for reading. Returns the reader and the object size.
    pub fn get_object(&self, container: &str, object_id: &str) -> Result<(File, u64)> {
        validate_name(object_id, "object id")?;
        let container = self.container(container)?;
        let file = open_object(&container.object_path(object_id), &container.name, object_id)?;
        let size = file.metadata()?.len();
        Ok((file, size))
    }

    /// Digest of a stored object. With `recompute` the bytes are re-hashed
    /// even if a matching sidecar exists; a recomputed digest is persisted
    /// back to the sidecar.
    pub fn get_object_digest(
        &self,
        container: &str,
        object_id: &str,
        algorithm: DigestAlgorithm,
        recompute: bool,
    ) -> Result<String> {
        validate_name(object_id, "object id")?;
        let container = self.container(container)?;
        if recompute {
            container.refresh_digest(object_id, algorithm)
        } else {
            container.stored_digest(object_id, algorithm)
        }
    }

    /// Identity (id, digest, size) of a stored object.
    pub fn object_metadata(
        &self,
        container: &str,
        object_id: &str,
        algorithm: DigestAlgorithm,
    ) -> Result<ObjectMetadata> {
        validate_name(object_id, "object id")?;
        let container = self.container(container)?;
        let size = open_object(&container.object_path(object_id), &container.name, object_id)?
            .metadata()?
            .len();
        let digest = container.stored_digest(object_id, algorithm)?;
        Ok(ObjectMetadata {
            object_id: object_id.to_string(),
            digest,
            size,
        })
    }

    /// Delete an object, if its category allows deletion. Appends one
    /// DELETE entry to the offer log and releases the usage it held.
    pub fn delete_object(
        &self,
        container: &str,
        object_id: &str,
        category: DataCategory,
    ) -> Result<()> {
        validate_name(object_id, "object id")?;
        if !category.can_delete() {
            return Err(Error::illegal_argument(format!(
                "category {category:?} does not allow delete"
            )));
        }
        let container = self.container(container)?;
        let path = container.object_path(object_id);
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!(
                    "object {object_id:?} in container {:?}",
                    container.name
                )));
            }
            Err(e) => return Err(e.into()),
        };

        // Remove the bytes before logging: a DELETE entry must never
        // describe an object the offer still holds.
        fs::remove_file(&path)?;
        match fs::remove_file(container.digest_path(object_id)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        container.log.append(OfferLogAction::Delete, object_id)?;
        container.apply_usage(-1, -(size as i64))?;
        debug!(container = %container.name, object_id, size, "object deleted");
        Ok(())
    }

    /// Page of offer log entries relative to `offset`: strictly greater in
    /// ascending order, strictly smaller in descending order.
    pub fn get_listing(
        &self,
        container: &str,
        offset: u64,
        limit: usize,
        order: Order,
    ) -> Result<Vec<OfferLogEntry>> {
        let container = self.container(container)?;
        container.log.read_range(offset, limit, order)
    }

    /// Snapshot the container's live objects into a server-side cursor.
    pub fn create_cursor(&self, container: &str) -> Result<CursorId> {
        let container = self.container(container)?;
        let objects_dir = container.root.join(OBJECTS_DIR);
        let mut entries = Vec::new();
        for entry in walkdir::WalkDir::new(&objects_dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| Error::database(format!("listing scan: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }
            entries.push(ObjectEntry {
                object_id: entry.file_name().to_string_lossy().into_owned(),
                size: entry.metadata().map(|m| m.len()).unwrap_or(0),
            });
        }
        entries.sort_by(|a, b| a.object_id.cmp(&b.object_id));
        Ok(self.cursors.create(&container.name, entries))
    }

    /// Next page of a cursor, `None` once the snapshot is exhausted.
    pub fn next(&self, cursor: CursorId) -> Result<Option<Vec<ObjectEntry>>> {
        self.cursors.next(cursor, self.cursor_page_size)
    }

    /// Close a cursor. Idempotent.
    pub fn finalize_cursor(&self, cursor: CursorId) {
        self.cursors.finalize(cursor);
    }

    /// Capacity report: the container's usage counters plus the usable
    /// space of the disk holding the store root.
    pub fn capacity(&self, container: &str) -> Result<Capacity> {
        let container = self.container(container)?;
        let usage = *container.usage.lock().expect("usage mutex poisoned");
        Ok(Capacity {
            usable_space: usable_space(&self.root),
            used_bytes: usage.used_bytes,
            object_count: usage.object_count,
        })
    }

    /// A [`DigestSource`] bound to one container and one algorithm, for
    /// driving a digest validator externally (audits).
    pub fn digest_probe(
        &self,
        container: &str,
        algorithm: DigestAlgorithm,
    ) -> Result<ContainerDigestProbe> {
        let container = self.container(container)?;
        Ok(ContainerDigestProbe {
            container,
            algorithm,
        })
    }

    /// Look up or lazily create a container's state.
    fn container(&self, name: &str) -> Result<Arc<Container>> {
        validate_name(name, "container")?;
        {
            let containers = self.containers.read().expect("container map poisoned");
            if let Some(container) = containers.get(name) {
                return Ok(Arc::clone(container));
            }
        }

        let mut containers = self.containers.write().expect("container map poisoned");
        if let Some(container) = containers.get(name) {
            return Ok(Arc::clone(container));
        }

        let root = self.root.join(name);
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(DIGESTS_DIR))?;
        fs::create_dir_all(root.join(TMP_DIR))?;
        let log = OfferLog::open(name, &root.join(LOG_FILE))?;
        let usage = ContainerUsage::load_or_rescan(&root.join(USAGE_FILE), &root.join(OBJECTS_DIR))?;
        debug!(container = name, "container opened");

        let container = Arc::new(Container {
            name: name.to_string(),
            root,
            log,
            usage: Mutex::new(usage),
        });
        containers.insert(name.to_string(), Arc::clone(&container));
        Ok(container)
    }
}

/// Stage the bytes into `tmp/`, then commit under the category's write
/// rule. The staged file is removed on every non-committed path.
fn commit_object<R: Read>(
    container: &Container,
    object_id: &str,
    reader: &mut R,
    category: DataCategory,
    algorithm: DigestAlgorithm,
) -> Result<CommitOutcome> {
    let mut staged = tempfile::NamedTempFile::new_in(container.root.join(TMP_DIR))?;
    let mut digesting = DigestingReader::new(algorithm, reader);
    io::copy(&mut digesting, staged.as_file_mut())?;
    let size = digesting.bytes_read();
    let digest = digesting.finalize_hex();
    staged.as_file().sync_all()?;

    let target = container.object_path(object_id);

    if category.can_rewrite() {
        let previous = match fs::metadata(&target) {
            Ok(meta) => Some(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        staged.persist(&target).map_err(|e| Error::from(e.error))?;
        finish_commit(container, object_id, algorithm, &digest, &target)?;
        let (object_delta, byte_delta) = match previous {
            Some(previous) => (0, size as i64 - previous as i64),
            None => (1, size as i64),
        };
        return Ok(CommitOutcome {
            digest,
            size,
            existing: false,
            object_delta,
            byte_delta,
        });
    }

    // Write-once: create-if-absent decides the race. The loser compares
    // digests against the committed bytes.
    match staged.persist_noclobber(&target) {
        Ok(_) => {
            finish_commit(container, object_id, algorithm, &digest, &target)?;
            Ok(CommitOutcome {
                digest,
                size,
                existing: false,
                object_delta: 1,
                byte_delta: size as i64,
            })
        }
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            let stored = container.stored_digest(object_id, algorithm)?;
            if stored == digest {
                debug!(container = %container.name, object_id, "identical write-once republish");
                Ok(CommitOutcome {
                    digest,
                    size,
                    existing: true,
                    object_delta: 0,
                    byte_delta: 0,
                })
            } else {
                Err(Error::conflict(format!(
                    "object {object_id:?} already holds different content \
                     (stored {stored}, offered {digest})"
                )))
            }
        }
        Err(e) => Err(Error::from(e.error)),
    }
}

/// Post-rename bookkeeping: fsync-visible object, digest sidecar. If the
/// sidecar cannot be written the freshly committed object is rolled back so
/// a failed put leaves no half-described key.
fn finish_commit(
    container: &Container,
    object_id: &str,
    algorithm: DigestAlgorithm,
    digest: &str,
    target: &Path,
) -> Result<()> {
    if let Err(e) = container.write_digest_sidecar(object_id, algorithm, digest) {
        warn!(container = %container.name, object_id, error = %e, "sidecar write failed, rolling back object");
        if let Err(rm) = fs::remove_file(target) {
            error!(container = %container.name, object_id, error = %rm, "rollback of committed object failed");
        }
        return Err(e);
    }
    Ok(())
}

fn open_object(path: &Path, container: &str, object_id: &str) -> Result<File> {
    File::open(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            Error::not_found(format!("object {object_id:?} in container {container:?}"))
        } else {
            e.into()
        }
    })
}

/// Usable bytes on the disk holding `root` (longest mount-point match).
fn usable_space(root: &Path) -> u64 {
    let disks = Disks::new_with_refreshed_list();
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    disks
        .iter()
        .filter(|disk| root.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
        .unwrap_or(0)
}

/// Container and object names become single path components; reject
/// anything that could escape the store tree.
fn validate_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::illegal_argument(format!("empty {what}")));
    }
    if name == "." || name == ".." {
        return Err(Error::illegal_argument(format!("invalid {what} {name:?}")));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(Error::illegal_argument(format!(
            "{what} {name:?} contains a path separator"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use arkiv_types::{ErrorKind, Tenant};

    use crate::multiplex::MultiplexedStreamWriter;

    fn store() -> (tempfile::TempDir, OfferStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = OfferStore::open(dir.path()).unwrap().with_cursor_page_size(2);
        (dir, store)
    }

    fn object_container() -> String {
        DataCategory::Object.container_name(Tenant(0))
    }

    fn put(
        store: &OfferStore,
        container: &str,
        id: &str,
        bytes: &[u8],
        category: DataCategory,
    ) -> Result<PutResult> {
        store.put(
            container,
            id,
            &mut &bytes[..],
            category,
            DigestAlgorithm::Blake3,
        )
    }

    #[test]
    fn put_then_get_round_trips() {
        let (_dir, store) = store();
        let container = object_container();

        let result = put(&store, &container, "ab12", b"payload", DataCategory::Object).unwrap();
        assert_eq!(result.size, 7);
        assert_eq!(result.digest, arkiv_digest::hash_hex(DigestAlgorithm::Blake3, b"payload"));

        let (mut reader, size) = store.get_object(&container, "ab12").unwrap();
        assert_eq!(size, 7);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[test]
    fn identical_worm_republish_is_a_noop_but_still_logged() {
        let (_dir, store) = store();
        let container = object_container();

        put(&store, &container, "x", b"same", DataCategory::Object).unwrap();
        let second = put(&store, &container, "x", b"same", DataCategory::Object).unwrap();
        assert_eq!(second.size, 4);

        // One object, counted once.
        let capacity = store.capacity(&container).unwrap();
        assert_eq!(capacity.object_count, 1);
        assert_eq!(capacity.used_bytes, 4);

        // But both publishes left a WRITE record.
        let listing = store.get_listing(&container, 0, 10, Order::Asc).unwrap();
        assert_eq!(listing.len(), 2);
        assert!(listing.iter().all(|e| e.object_id == "x"));
        assert_eq!(listing[1].sequence, 2);
    }

    #[test]
    fn different_worm_content_is_a_conflict_and_keeps_original() {
        let (_dir, store) = store();
        let container = object_container();

        put(&store, &container, "x", b"original", DataCategory::Object).unwrap();
        let err = put(&store, &container, "x", b"tampered", DataCategory::Object).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let (mut reader, _) = store.get_object(&container, "x").unwrap();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"original");

        // The failed write logged nothing.
        let listing = store.get_listing(&container, 0, 10, Order::Asc).unwrap();
        assert_eq!(listing.len(), 1);
    }

    #[test]
    fn rewritable_category_replaces_and_adjusts_usage() {
        let (_dir, store) = store();
        let container = DataCategory::Unit.container_name(Tenant(3));

        put(&store, &container, "u1", b"version one", DataCategory::Unit).unwrap();
        put(&store, &container, "u1", b"v2", DataCategory::Unit).unwrap();

        let (mut reader, size) = store.get_object(&container, "u1").unwrap();
        assert_eq!(size, 2);
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, b"v2");

        let capacity = store.capacity(&container).unwrap();
        assert_eq!(capacity.object_count, 1);
        assert_eq!(capacity.used_bytes, 2);
    }

    #[test]
    fn get_missing_object_is_not_found() {
        let (_dir, store) = store();
        let err = store.get_object(&object_container(), "nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn object_ids_cannot_escape_the_container() {
        let (_dir, store) = store();
        let container = object_container();
        for bad in ["", "..", "a/b", "a\\b"] {
            let err = put(&store, &container, bad, b"x", DataCategory::Object).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::IllegalArgument, "id {bad:?}");
        }
    }

    #[test]
    fn digest_sidecar_survives_and_recomputes() {
        let (dir, store) = store();
        let container = object_container();
        let expected = put(&store, &container, "d", b"bytes", DataCategory::Object)
            .unwrap()
            .digest;

        let cached = store
            .get_object_digest(&container, "d", DigestAlgorithm::Blake3, false)
            .unwrap();
        assert_eq!(cached, expected);

        // Remove the sidecar: the digest is recomputed and re-persisted.
        let sidecar = dir.path().join(&container).join(DIGESTS_DIR).join("d");
        fs::remove_file(&sidecar).unwrap();
        let recomputed = store
            .get_object_digest(&container, "d", DigestAlgorithm::Blake3, false)
            .unwrap();
        assert_eq!(recomputed, expected);
        assert!(sidecar.exists());

        // A different algorithm ignores the sidecar.
        let sha = store
            .get_object_digest(&container, "d", DigestAlgorithm::Sha256, false)
            .unwrap();
        assert_eq!(sha, arkiv_digest::hash_hex(DigestAlgorithm::Sha256, b"bytes"));
    }

    #[test]
    fn recompute_detects_tampered_bytes() {
        let (dir, store) = store();
        let container = object_container();
        let original = put(&store, &container, "t", b"good", DataCategory::Object)
            .unwrap()
            .digest;

        let path = dir.path().join(&container).join(OBJECTS_DIR).join("t");
        fs::write(&path, b"evil").unwrap();

        let cached = store
            .get_object_digest(&container, "t", DigestAlgorithm::Blake3, false)
            .unwrap();
        assert_eq!(cached, original, "sidecar still claims the original digest");

        let recomputed = store
            .get_object_digest(&container, "t", DigestAlgorithm::Blake3, true)
            .unwrap();
        assert_ne!(recomputed, original);
    }

    #[test]
    fn delete_respects_category_rules() {
        let (_dir, store) = store();
        let container = DataCategory::Backup.container_name(Tenant(0));
        put(&store, &container, "b", b"backup", DataCategory::Backup).unwrap();

        let err = store
            .delete_object(&container, "b", DataCategory::Backup)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);

        let unit_container = DataCategory::Unit.container_name(Tenant(0));
        put(&store, &unit_container, "u", b"unit", DataCategory::Unit).unwrap();
        store
            .delete_object(&unit_container, "u", DataCategory::Unit)
            .unwrap();
        assert_eq!(
            store.get_object(&unit_container, "u").unwrap_err().kind(),
            ErrorKind::NotFound
        );

        let listing = store.get_listing(&unit_container, 0, 10, Order::Asc).unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[1].action, OfferLogAction::Delete);

        let capacity = store.capacity(&unit_container).unwrap();
        assert_eq!(capacity.object_count, 0);
        assert_eq!(capacity.used_bytes, 0);
    }

    #[test]
    fn failed_removal_logs_no_delete_entry() {
        let (dir, store) = store();
        let container = DataCategory::Unit.container_name(Tenant(0));
        put(&store, &container, "u", b"unit", DataCategory::Unit).unwrap();

        // A directory under the object's key makes the removal fail.
        let path = dir.path().join(&container).join(OBJECTS_DIR).join("dir");
        fs::create_dir(&path).unwrap();
        assert!(store.delete_object(&container, "dir", DataCategory::Unit).is_err());

        let listing = store.get_listing(&container, 0, 10, Order::Asc).unwrap();
        assert!(listing.iter().all(|e| e.action == OfferLogAction::Write));
    }

    #[test]
    fn delete_missing_object_is_not_found() {
        let (_dir, store) = store();
        let container = DataCategory::Unit.container_name(Tenant(0));
        let err = store
            .delete_object(&container, "ghost", DataCategory::Unit)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    fn multiplexed(payloads: &[&[u8]]) -> Vec<u8> {
        let mut writer = MultiplexedStreamWriter::new(Vec::new());
        for payload in payloads {
            writer.append(payload).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn bulk_put_commits_all_entries_in_order() {
        let (_dir, store) = store();
        let container = object_container();

        let stream = multiplexed(&[b"one", b"two", b"three"]);
        let written = store
            .bulk_put(
                &container,
                &["a", "b", "c"],
                stream.as_slice(),
                DataCategory::Object,
                DigestAlgorithm::Blake3,
            )
            .unwrap();

        let ids: Vec<_> = written.iter().map(|o| o.object_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(written[2].size, 5);

        let listing = store.get_listing(&container, 0, 10, Order::Asc).unwrap();
        let sequences: Vec<u64> = listing.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);

        let capacity = store.capacity(&container).unwrap();
        assert_eq!(capacity.object_count, 3);
        assert_eq!(capacity.used_bytes, 11);
    }

    #[test]
    fn bulk_put_conflict_keeps_earlier_entries_logged() {
        let (_dir, store) = store();
        let container = object_container();
        put(&store, &container, "clash", b"original", DataCategory::Object).unwrap();

        let stream = multiplexed(&[b"fresh", b"different", b"never-reached"]);
        let err = store
            .bulk_put(
                &container,
                &["new1", "clash", "new2"],
                stream.as_slice(),
                DataCategory::Object,
                DigestAlgorithm::Blake3,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // "new1" was durably written and logged; "new2" never committed.
        assert!(store.get_object(&container, "new1").is_ok());
        assert_eq!(
            store.get_object(&container, "new2").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        let logged: Vec<_> = store
            .get_listing(&container, 0, 10, Order::Asc)
            .unwrap()
            .into_iter()
            .map(|e| e.object_id)
            .collect();
        assert_eq!(logged, vec!["clash", "new1"]);
    }

    #[test]
    fn bulk_put_rejects_trailing_entries() {
        let (_dir, store) = store();
        let container = object_container();

        let stream = multiplexed(&[b"one", b"extra"]);
        let err = store
            .bulk_put(
                &container,
                &["only"],
                stream.as_slice(),
                DataCategory::Object,
                DigestAlgorithm::Blake3,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);

        // The declared entry was still committed and logged.
        assert!(store.get_object(&container, "only").is_ok());
        assert_eq!(store.get_listing(&container, 0, 10, Order::Asc).unwrap().len(), 1);
    }

    #[test]
    fn bulk_put_rejects_short_stream() {
        let (_dir, store) = store();
        let container = object_container();

        let stream = multiplexed(&[b"one"]);
        let err = store
            .bulk_put(
                &container,
                &["a", "missing"],
                stream.as_slice(),
                DataCategory::Object,
                DigestAlgorithm::Blake3,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IllegalArgument);
        assert!(store.get_object(&container, "a").is_ok());
    }

    #[test]
    fn bulk_put_republish_mix_reports_existing_objects_too() {
        let (_dir, store) = store();
        let container = object_container();
        put(&store, &container, "old", b"stable", DataCategory::Object).unwrap();

        let stream = multiplexed(&[b"stable", b"brand-new"]);
        let written = store
            .bulk_put(
                &container,
                &["old", "new"],
                stream.as_slice(),
                DataCategory::Object,
                DigestAlgorithm::Blake3,
            )
            .unwrap();
        let ids: Vec<_> = written.iter().map(|o| o.object_id.as_str()).collect();
        assert_eq!(ids, vec!["old", "new"]);

        let capacity = store.capacity(&container).unwrap();
        assert_eq!(capacity.object_count, 2);
    }

    #[test]
    fn cursor_pages_through_a_snapshot() {
        let (_dir, store) = store();
        let container = object_container();
        for id in ["c1", "c2", "c3"] {
            put(&store, &container, id, b"x", DataCategory::Object).unwrap();
        }

        let cursor = store.create_cursor(&container).unwrap();

        // Written after the snapshot: invisible to this cursor.
        put(&store, &container, "c4", b"x", DataCategory::Object).unwrap();

        let first = store.next(cursor).unwrap().unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].object_id, "c1");
        let second = store.next(cursor).unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].object_id, "c3");
        assert!(store.next(cursor).unwrap().is_none());

        store.finalize_cursor(cursor);
        assert_eq!(store.next(cursor).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn usage_rebuilds_after_sidecar_loss() {
        let (dir, _) = {
            let (dir, store) = store();
            let container = object_container();
            put(&store, &container, "k", b"12345", DataCategory::Object).unwrap();
            (dir, ())
        };

        // Remove the sidecar and reopen the store: a rescan restores it.
        let container = object_container();
        fs::remove_file(dir.path().join(&container).join(USAGE_FILE)).unwrap();
        let store = OfferStore::open(dir.path()).unwrap();
        let capacity = store.capacity(&container).unwrap();
        assert_eq!(capacity.object_count, 1);
        assert_eq!(capacity.used_bytes, 5);
    }

    #[test]
    fn object_metadata_reports_identity() {
        let (_dir, store) = store();
        let container = object_container();
        let result = put(&store, &container, "m", b"meta", DataCategory::Object).unwrap();

        let meta = store
            .object_metadata(&container, "m", DigestAlgorithm::Blake3)
            .unwrap();
        assert_eq!(meta.object_id, "m");
        assert_eq!(meta.digest, result.digest);
        assert_eq!(meta.size, 4);
    }

    #[test]
    fn digest_probe_refresh_repairs_sidecar() {
        let (dir, store) = store();
        let container = object_container();
        let expected = put(&store, &container, "p", b"probe", DataCategory::Object)
            .unwrap()
            .digest;

        let sidecar = dir.path().join(&container).join(DIGESTS_DIR).join("p");
        fs::write(&sidecar, "blake3:deadbeef").unwrap();

        let probe = store
            .digest_probe(&container, DigestAlgorithm::Blake3)
            .unwrap();
        assert_eq!(probe.refresh_digest("p").unwrap(), expected);
        assert_eq!(
            fs::read_to_string(&sidecar).unwrap(),
            format!("blake3:{expected}")
        );
    }

    #[test]
    fn log_survives_store_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let container = object_container();
        {
            let store = OfferStore::open(dir.path()).unwrap();
            put(&store, &container, "a", b"1", DataCategory::Object).unwrap();
            put(&store, &container, "b", b"2", DataCategory::Object).unwrap();
        }
        let store = OfferStore::open(dir.path()).unwrap();
        put(&store, &container, "c", b"3", DataCategory::Object).unwrap();

        let listing = store.get_listing(&container, 0, 10, Order::Asc).unwrap();
        let sequences: Vec<u64> = listing.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }
}
