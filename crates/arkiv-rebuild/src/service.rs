use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use arkiv_types::{DataCategory, Error, ErrorKind, OfferLogAction, OfferLogEntry, Order, Result, Tenant};

use crate::bundle::BackupBundle;
use crate::traits::{
    ConditionalUpsert, DerivedGuard, DocCollection, DocumentStore, LifecycleStore, OfferSource,
    OffsetRepository, GRAPH_UPDATED_AT,
};

/// What a replay invocation rebuilds: a document collection from backup
/// bundles, or a graph collection from precomputed patch archives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildCollection {
    Unit,
    ObjectGroup,
    UnitGraph,
    ObjectGroupGraph,
}

impl RebuildCollection {
    /// The offer store category holding this collection's log and objects.
    pub fn category(&self) -> DataCategory {
        match self {
            RebuildCollection::Unit => DataCategory::Unit,
            RebuildCollection::ObjectGroup => DataCategory::ObjectGroup,
            RebuildCollection::UnitGraph => DataCategory::UnitGraph,
            RebuildCollection::ObjectGroupGraph => DataCategory::ObjectGroupGraph,
        }
    }

    /// The document collection written to.
    pub fn doc_collection(&self) -> DocCollection {
        match self {
            RebuildCollection::Unit | RebuildCollection::UnitGraph => DocCollection::Units,
            RebuildCollection::ObjectGroup | RebuildCollection::ObjectGroupGraph => {
                DocCollection::ObjectGroups
            }
        }
    }

    pub fn is_graph(&self) -> bool {
        matches!(
            self,
            RebuildCollection::UnitGraph | RebuildCollection::ObjectGroupGraph
        )
    }

    /// System-derived fields that replayed backup data must never regress.
    fn derived_fields(&self) -> &'static [&'static str] {
        match self.doc_collection() {
            DocCollection::Units => &[GRAPH_UPDATED_AT, "_ancestors", "_depth"],
            DocCollection::ObjectGroups => &[GRAPH_UPDATED_AT, "_ancestors", "_parent_units"],
        }
    }

    /// Stable name, also the checkpoint key component.
    pub fn name(&self) -> &'static str {
        self.category().folder()
    }
}

impl FromStr for RebuildCollection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "unit" => Ok(RebuildCollection::Unit),
            "objectgroup" => Ok(RebuildCollection::ObjectGroup),
            "unitgraph" => Ok(RebuildCollection::UnitGraph),
            "objectgroupgraph" => Ok(RebuildCollection::ObjectGroupGraph),
            _ => Err(Error::illegal_argument(format!(
                "unknown rebuild collection {s:?}"
            ))),
        }
    }
}

impl std::fmt::Display for RebuildCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildRequest {
    pub collection: RebuildCollection,
    pub tenant: Tenant,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildStatus {
    Ok,
    Ko,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildResponse {
    pub collection: RebuildCollection,
    pub tenant: Tenant,
    pub status: RebuildStatus,
}

/// Tuning knobs for the replay pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RebuildConfig {
    /// Entries per upsert batch.
    pub bulk_size: usize,
    /// Attempts before a persistent write conflict becomes fatal.
    pub retry_budget: usize,
    /// Upper bound of the randomized pause between conflict retries.
    pub backoff_max_ms: u64,
}

impl Default for RebuildConfig {
    fn default() -> Self {
        Self {
            bulk_size: 16,
            retry_budget: 1000,
            backoff_max_ms: 50,
        }
    }
}

/// Sequential replay pipeline for one (tenant, collection) at a time.
///
/// An invocation reads the checkpoint, lists log entries past it, applies
/// them batch by batch and persists the new checkpoint only if the whole
/// invocation succeeded. A failed invocation leaves the persisted
/// checkpoint at its pre-invocation value: the next run redoes the already
/// applied batches, which is safe because every upsert is a pure function
/// of the immutable log/bundle pair and the derived fields re-read at
/// replay time.
pub struct RebuildService {
    offers: Arc<dyn OfferSource>,
    documents: Arc<dyn DocumentStore>,
    lifecycles: Arc<dyn LifecycleStore>,
    offsets: Arc<dyn OffsetRepository>,
    config: RebuildConfig,
}

impl RebuildService {
    pub fn new(
        offers: Arc<dyn OfferSource>,
        documents: Arc<dyn DocumentStore>,
        lifecycles: Arc<dyn LifecycleStore>,
        offsets: Arc<dyn OffsetRepository>,
    ) -> Self {
        Self {
            offers,
            documents,
            lifecycles,
            offsets,
            config: RebuildConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RebuildConfig) -> Self {
        self.config = config;
        self
    }

    /// Replay up to `request.limit` log entries past the checkpoint.
    pub fn reconstruct(&self, request: &RebuildRequest) -> RebuildResponse {
        let status = match self.run(request) {
            Ok(()) => RebuildStatus::Ok,
            Err(e) => {
                error!(
                    collection = %request.collection,
                    tenant = %request.tenant,
                    error = %e,
                    "reconstruction failed, checkpoint unchanged"
                );
                RebuildStatus::Ko
            }
        };
        RebuildResponse {
            collection: request.collection,
            tenant: request.tenant,
            status,
        }
    }

    fn run(&self, request: &RebuildRequest) -> Result<()> {
        let collection = request.collection;
        let start = self.offsets.get(request.tenant, collection.name())?;
        let entries = self.offers.listing(
            collection.category(),
            request.tenant,
            start,
            request.limit,
            Order::Asc,
        )?;
        if entries.is_empty() {
            debug!(collection = %collection, tenant = %request.tenant, offset = start, "nothing to replay");
            return Ok(());
        }

        let mut checkpoint = start;
        for batch in entries.chunks(self.config.bulk_size.max(1)) {
            if collection.is_graph() {
                self.replay_graph_batch(request, batch)?;
            } else {
                self.replay_document_batch(request, batch)?;
            }
            // In-memory advance; persisted only after the whole run.
            checkpoint = batch
                .last()
                .map(|entry| entry.sequence)
                .unwrap_or(checkpoint);
        }

        self.offsets
            .put(request.tenant, collection.name(), checkpoint)?;
        info!(
            collection = %collection,
            tenant = %request.tenant,
            from = start,
            to = checkpoint,
            entries = entries.len(),
            "reconstruction applied"
        );
        Ok(())
    }

    fn replay_document_batch(
        &self,
        request: &RebuildRequest,
        batch: &[OfferLogEntry],
    ) -> Result<()> {
        let collection = request.collection.doc_collection();

        let mut deleted_ids: Vec<String> = Vec::new();
        let mut bundles: Vec<(String, BackupBundle)> = Vec::new();
        for entry in batch {
            match entry.action {
                OfferLogAction::Delete => deleted_ids.push(entry.object_id.clone()),
                OfferLogAction::Write => {
                    let bytes = match self.offers.load(
                        request.collection.category(),
                        request.tenant,
                        &entry.object_id,
                    ) {
                        Ok(bytes) => bytes,
                        Err(e) if e.kind() == ErrorKind::NotFound => {
                            // The backup object was eliminated after the log
                            // entry was written; nothing left to replay.
                            warn!(
                                object_id = %entry.object_id,
                                sequence = entry.sequence,
                                "backup bundle gone, skipping entry"
                            );
                            continue;
                        }
                        Err(e) => return Err(e),
                    };
                    let bundle = BackupBundle::decode(&bytes)?;
                    let id = bundle.document_id()?;
                    bundles.push((id, bundle));
                }
            }
        }

        if bundles.is_empty() {
            self.replay_deletions(collection, &deleted_ids)?;
            return Ok(());
        }

        let ids: Vec<String> = bundles.iter().map(|(id, _)| id.clone()).collect();
        let fields = request.collection.derived_fields();

        let mut attempts = 0usize;
        loop {
            // Re-read the live derived fields each attempt: the batch is
            // rebuilt from the current marker values.
            let live = self.documents.find_projected(collection, &ids, fields)?;
            let mut upserts = Vec::with_capacity(bundles.len());
            for (id, bundle) in &bundles {
                let mut document = bundle.metadata.clone();
                let guard = match live.get(id) {
                    Some(projected) => {
                        merge_derived_fields(&mut document, projected, fields);
                        match projected.get(GRAPH_UPDATED_AT) {
                            Some(marker) if !marker.is_null() => {
                                DerivedGuard::Equals(marker.clone())
                            }
                            _ => DerivedGuard::Absent,
                        }
                    }
                    None => DerivedGuard::Absent,
                };
                upserts.push(ConditionalUpsert {
                    id: id.clone(),
                    document,
                    guard,
                });
            }

            match self.documents.bulk_upsert(collection, upserts) {
                Ok(()) => break,
                Err(e)
                    if matches!(e.kind(), ErrorKind::Conflict | ErrorKind::Database)
                        && attempts < self.config.retry_budget =>
                {
                    attempts += 1;
                    warn!(attempt = attempts, error = %e, "upsert batch conflicted, retrying");
                    self.backoff();
                }
                Err(e) => return Err(e),
            }
        }

        let lifecycles: Vec<Value> = bundles
            .iter()
            .map(|(_, bundle)| bundle.lifecycle.clone())
            .collect();
        self.lifecycles.bulk_raw_append(collection, lifecycles)?;

        // Deletions run after the writes: within a batch, a delete of a
        // document that was also written wins.
        self.replay_deletions(collection, &deleted_ids)?;
        Ok(())
    }

    fn replay_deletions(&self, collection: DocCollection, deleted_ids: &[String]) -> Result<()> {
        if deleted_ids.is_empty() {
            return Ok(());
        }
        debug!(count = deleted_ids.len(), "replaying deletions");
        self.documents.delete_documents(collection, deleted_ids)?;
        self.lifecycles.bulk_delete(collection, deleted_ids)?;
        Ok(())
    }

    fn replay_graph_batch(&self, request: &RebuildRequest, batch: &[OfferLogEntry]) -> Result<()> {
        let collection = request.collection.doc_collection();
        for entry in batch {
            if entry.action == OfferLogAction::Delete {
                warn!(object_id = %entry.object_id, "delete entry in a graph log, skipping");
                continue;
            }
            let bytes = match self.offers.load(
                request.collection.category(),
                request.tenant,
                &entry.object_id,
            ) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(object_id = %entry.object_id, "graph archive gone, skipping entry");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let decoded = zstd::decode_all(bytes.as_slice())
                .map_err(|e| Error::backup_integrity(format!("graph archive decompress: {e}")))?;
            let patch_sets: Vec<Vec<Value>> = serde_json::from_slice(&decoded)
                .map_err(|e| Error::backup_integrity(format!("graph archive decode: {e}")))?;
            for patches in patch_sets {
                // Commutative set-field merges: no guard, safe to reapply.
                self.documents.bulk_set_fields(collection, patches)?;
            }
        }
        Ok(())
    }

    fn backoff(&self) {
        let max = self.config.backoff_max_ms.max(1);
        let pause = rand::thread_rng().gen_range(1..=max);
        std::thread::sleep(Duration::from_millis(pause));
    }
}

/// Copy the live values of the derived fields onto the incoming snapshot,
/// so replayed backup data never regresses what the system computed after
/// the backup was taken.
fn merge_derived_fields(document: &mut Value, live: &Value, fields: &[&str]) {
    for field in fields {
        if let Some(value) = live.get(*field) {
            if let Some(target) = document.as_object_mut() {
                target.insert((*field).to_string(), value.clone());
            }
        }
    }
}
