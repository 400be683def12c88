use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam::channel::{unbounded, Sender};
use tracing::{debug, error, warn};

use arkiv_types::Result;

/// Where the store reads digests back from. One implementation is bound to
/// one container and one digest algorithm, matching the validator's scope.
pub trait DigestSource: Send + Sync {
    /// Recompute the digest of the stored bytes and persist it to the digest
    /// cache (combined recompute-and-store primitive). Used for objects the
    /// current operation just wrote.
    fn refresh_digest(&self, object_id: &str) -> Result<String>;

    /// Return the digest of bytes already present under the key, from the
    /// cache when available. Used for WORM objects the writer chose not to
    /// rewrite.
    fn stored_digest(&self, object_id: &str) -> Result<String>;
}

/// Why an object was submitted for checking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckOrigin {
    /// Freshly written by the current operation.
    Written,
    /// Already present under a WORM key; the writer skipped the rewrite
    /// after computing an equal digest.
    ExistingWorm,
}

/// An object accepted as committed by the operation under validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckedObject {
    pub object_id: String,
    pub digest: String,
    pub size: u64,
}

struct CheckTask {
    slot: usize,
    origin: CheckOrigin,
    object: CheckedObject,
}

enum SlotState {
    Pending,
    /// Verification ran; the object is accepted (digest matched or a
    /// conflict was recorded, but the bytes are durable either way).
    Accepted(CheckedObject),
    /// Verification itself failed; the object is excluded from the result.
    Failed,
}

struct Shared {
    conflicts: AtomicUsize,
    technical: AtomicUsize,
    slots: Mutex<Vec<SlotState>>,
}

/// Asynchronous digest verification for one bulk operation.
///
/// Submission never blocks; [`await_termination`](Self::await_termination)
/// is the only synchronization point and must be called before inspecting
/// the aggregate results. Tasks are not cancellable and have no individual
/// timeout.
pub struct BackgroundDigestValidator {
    source: Arc<dyn DigestSource>,
    tx: Option<Sender<CheckTask>>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl BackgroundDigestValidator {
    /// Spawn a validator backed by `pool_size` worker threads.
    pub fn new(source: Arc<dyn DigestSource>, pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        let shared = Arc::new(Shared {
            conflicts: AtomicUsize::new(0),
            technical: AtomicUsize::new(0),
            slots: Mutex::new(Vec::new()),
        });

        let (tx, rx) = unbounded::<CheckTask>();
        let workers = (0..pool_size)
            .map(|_| {
                let rx = rx.clone();
                let shared = Arc::clone(&shared);
                let source = Arc::clone(&source);
                std::thread::spawn(move || {
                    for task in rx.iter() {
                        run_check(&*source, &shared, task);
                    }
                })
            })
            .collect();

        Self {
            source,
            tx: Some(tx),
            workers,
            shared,
        }
    }

    /// Queue a check for an object this operation just wrote: re-derive the
    /// digest of the committed bytes and compare against the claimed digest.
    pub fn add_written_object_to_check(&self, object_id: &str, digest: &str, size: u64) {
        self.submit(CheckOrigin::Written, object_id, digest, size);
    }

    /// Queue a check for a WORM object the writer accepted as already
    /// holding the same content.
    pub fn add_existing_worm_object_to_check(&self, object_id: &str, digest: &str, size: u64) {
        self.submit(CheckOrigin::ExistingWorm, object_id, digest, size);
    }

    fn submit(&self, origin: CheckOrigin, object_id: &str, digest: &str, size: u64) {
        let slot = {
            let mut slots = self.shared.slots.lock().expect("validator lock poisoned");
            slots.push(SlotState::Pending);
            slots.len() - 1
        };
        let task = CheckTask {
            slot,
            origin,
            object: CheckedObject {
                object_id: object_id.to_string(),
                digest: digest.to_string(),
                size,
            },
        };
        match self.tx.as_ref() {
            Some(tx) => {
                // Unbounded channel: the submitting thread never blocks.
                // A send can only fail if every worker died.
                if let Err(err) = tx.send(task) {
                    error!("validator pool unavailable, dropping check");
                    self.shared.technical.fetch_add(1, Ordering::SeqCst);
                    let mut slots = self.shared.slots.lock().expect("validator lock poisoned");
                    slots[err.0.slot] = SlotState::Failed;
                }
            }
            None => {
                // Submission after await_termination is a programming error;
                // record it as a technical failure rather than panic.
                warn!(object_id, "check submitted after validator termination");
                self.shared.technical.fetch_add(1, Ordering::SeqCst);
                let mut slots = self.shared.slots.lock().expect("validator lock poisoned");
                slots[slot] = SlotState::Failed;
            }
        }
    }

    /// Block until every submitted check has completed (success, conflict,
    /// or technical failure).
    pub fn await_termination(&mut self) {
        if let Some(tx) = self.tx.take() {
            drop(tx);
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("digest validator worker panicked");
                self.shared.technical.fetch_add(1, Ordering::SeqCst);
            }
        }
        debug!(
            conflicts = self.shared.conflicts.load(Ordering::SeqCst),
            technical = self.shared.technical.load(Ordering::SeqCst),
            "digest validation terminated"
        );
    }

    /// True iff any completed check found a digest mismatch.
    pub fn has_conflicts_reported(&self) -> bool {
        self.shared.conflicts.load(Ordering::SeqCst) > 0
    }

    /// True iff any check failed for an operational reason (I/O, storage),
    /// as opposed to a mismatch.
    pub fn has_technical_exceptions_reported(&self) -> bool {
        self.shared.technical.load(Ordering::SeqCst) > 0
    }

    /// The objects accepted as committed, in submission order. Checks whose
    /// verification failed technically are excluded; mismatching objects are
    /// still listed (their bytes are durable).
    pub fn written_objects(&self) -> Vec<CheckedObject> {
        let slots = self.shared.slots.lock().expect("validator lock poisoned");
        slots
            .iter()
            .filter_map(|slot| match slot {
                SlotState::Accepted(obj) => Some(obj.clone()),
                SlotState::Pending | SlotState::Failed => None,
            })
            .collect()
    }

    /// The digest source this validator reads from.
    pub fn source(&self) -> &Arc<dyn DigestSource> {
        &self.source
    }
}

impl Drop for BackgroundDigestValidator {
    fn drop(&mut self) {
        // Dropping without await_termination still shuts the pool down.
        self.await_termination();
    }
}

fn run_check(source: &dyn DigestSource, shared: &Shared, task: CheckTask) {
    let actual = match task.origin {
        CheckOrigin::Written => source.refresh_digest(&task.object.object_id),
        CheckOrigin::ExistingWorm => source.stored_digest(&task.object.object_id),
    };

    let state = match actual {
        Ok(actual) => {
            if actual != task.object.digest {
                error!(
                    object_id = %task.object.object_id,
                    expected = %task.object.digest,
                    actual = %actual,
                    origin = ?task.origin,
                    "digest conflict on committed object"
                );
                shared.conflicts.fetch_add(1, Ordering::SeqCst);
            }
            SlotState::Accepted(task.object)
        }
        Err(err) => {
            warn!(
                object_id = %task.object.object_id,
                error = %err,
                "digest check failed technically"
            );
            shared.technical.fetch_add(1, Ordering::SeqCst);
            SlotState::Failed
        }
    };

    let mut slots = shared.slots.lock().expect("validator lock poisoned");
    slots[task.slot] = state;
}
