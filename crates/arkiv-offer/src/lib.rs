//! Content-addressable offer store.
//!
//! Durable object storage keyed by (container, object id), with:
//! - write-once (WORM) semantics per data category, enforced with a
//!   create-if-absent commit primitive;
//! - an append-only, monotonically sequenced offer log per container, the
//!   feed for reconstruction and replication;
//! - a per-container usage sidecar (object count, bytes used) rebuilt by
//!   full scan when missing;
//! - ephemeral server-side cursors for full listings;
//! - asynchronous digest validation of committed bytes via `arkiv-verify`.
//!
//! On-disk layout per container under the store root:
//!
//! ```text
//! <root>/<container>/obj/<object_id>   committed object bytes
//! <root>/<container>/dg/<object_id>    digest sidecar: "<algo>:<hex>"
//! <root>/<container>/usage.json        usage sidecar
//! <root>/<container>/offer.log         append-only framed offer log
//! <root>/<container>/tmp/              staging area for atomic commits
//! ```

mod cursor;
mod log;
mod multiplex;
mod store;
mod usage;

pub use cursor::{CursorId, ObjectEntry};
pub use log::OfferLog;
pub use multiplex::{EntryReader, MultiplexedStreamReader, MultiplexedStreamWriter};
pub use store::{Capacity, ContainerDigestProbe, ObjectMetadata, OfferStore, PutResult};
pub use usage::ContainerUsage;

pub use arkiv_verify::{CheckedObject, DigestSource};
