use std::collections::HashMap;

use serde_json::Value;

use arkiv_types::{DataCategory, OfferLogEntry, Order, Result, Tenant};

/// Marker field stamped on a document whenever the system recomputes its
/// graph-derived fields. Replay guards its upserts on this marker so a
/// concurrent graph computation is never silently overwritten.
pub const GRAPH_UPDATED_AT: &str = "_graph_updated_at";

/// Document collections rebuilt by replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocCollection {
    Units,
    ObjectGroups,
}

/// Optimistic filter evaluated against the stored document's
/// [`GRAPH_UPDATED_AT`] marker at write time.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedGuard {
    /// The stored document must not exist, or must carry no marker.
    Absent,
    /// The stored marker must equal the value read when the batch was
    /// prepared.
    Equals(Value),
}

/// One guarded upsert: replace-or-insert `document` under `id`, provided
/// `guard` still holds.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalUpsert {
    pub id: String,
    pub document: Value,
    pub guard: DerivedGuard,
}

/// The metadata document store being rebuilt.
pub trait DocumentStore: Send + Sync {
    /// Fetch `fields` of the documents among `ids` that currently exist,
    /// keyed by document id. Missing ids are simply absent from the result.
    fn find_projected(
        &self,
        collection: DocCollection,
        ids: &[String],
        fields: &[&str],
    ) -> Result<HashMap<String, Value>>;

    /// Apply a batch of guarded upserts. A guard miss on any entry fails
    /// the whole batch with [`Conflict`](arkiv_types::ErrorKind::Conflict)
    /// and applies nothing; the caller re-reads and retries.
    fn bulk_upsert(&self, collection: DocCollection, upserts: Vec<ConditionalUpsert>)
        -> Result<()>;

    /// Merge field patches keyed by `_id`, inserting absent documents.
    /// Unguarded: graph patches are commutative and safe to reapply.
    fn bulk_set_fields(&self, collection: DocCollection, patches: Vec<Value>) -> Result<()>;

    /// Remove documents by id. Absent ids are ignored.
    fn delete_documents(&self, collection: DocCollection, ids: &[String]) -> Result<()>;
}

/// The lifecycle trail being rebuilt.
pub trait LifecycleStore: Send + Sync {
    /// Append raw lifecycle snapshots, one call per collection type.
    fn bulk_raw_append(&self, collection: DocCollection, lifecycles: Vec<Value>) -> Result<()>;

    /// Remove lifecycles by document id. Absent ids are ignored.
    fn bulk_delete(&self, collection: DocCollection, ids: &[String]) -> Result<()>;
}

/// Where replay reads the offer log and backup objects from.
pub trait OfferSource: Send + Sync {
    fn listing(
        &self,
        category: DataCategory,
        tenant: Tenant,
        offset: u64,
        limit: usize,
        order: Order,
    ) -> Result<Vec<OfferLogEntry>>;

    fn load(&self, category: DataCategory, tenant: Tenant, object_id: &str) -> Result<Vec<u8>>;
}

/// Persisted replay checkpoints, one offset per (tenant, collection).
pub trait OffsetRepository: Send + Sync {
    /// Current checkpoint, 0 when none was ever written.
    fn get(&self, tenant: Tenant, collection: &str) -> Result<u64>;

    fn put(&self, tenant: Tenant, collection: &str, offset: u64) -> Result<()>;
}
