//! Reconstruction of metadata and lifecycle stores by offer log replay.
//!
//! The offer store's append-only log is the source of truth; this crate
//! replays it — resumably and idempotently — into a mutable document store
//! and a lifecycle trail. Document collections are rebuilt from backup
//! bundles (metadata + lifecycle + source offset), graph collections from
//! compressed archives of partial-document patches. A per (tenant,
//! collection) checkpoint records the last applied sequence and is the sole
//! authority for resumption.
//!
//! The document and lifecycle stores are external collaborators behind
//! trait seams; in-memory implementations back tests and local drills.

mod bundle;
mod memory;
mod offsets;
mod service;
mod source;
mod traits;

pub use bundle::BackupBundle;
pub use memory::{InMemoryDocumentStore, InMemoryLifecycleStore};
pub use offsets::{FileOffsetRepository, InMemoryOffsetRepository};
pub use service::{
    RebuildCollection, RebuildConfig, RebuildRequest, RebuildResponse, RebuildService,
    RebuildStatus,
};
pub use source::LocalOfferSource;
pub use traits::{
    ConditionalUpsert, DerivedGuard, DocCollection, DocumentStore, LifecycleStore, OfferSource,
    OffsetRepository, GRAPH_UPDATED_AT,
};
