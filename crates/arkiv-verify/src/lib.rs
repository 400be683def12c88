//! Background object digest validator.
//!
//! The offer store's write path claims a digest for every object it commits
//! (or skips as an identical WORM republish). This crate re-derives those
//! digests off the request path, on a bounded worker pool, and aggregates
//! the outcome: conflicts (the bytes do not match the claimed digest) and
//! technical failures (the verification itself could not run).
//!
//! A validator instance is scoped to one logical operation — one container,
//! one digest algorithm — and is created fresh per bulk operation. A
//! reported conflict never undoes the durable write; it is an alarm for an
//! external integrity-repair process.

mod validator;

pub use validator::{BackgroundDigestValidator, CheckOrigin, CheckedObject, DigestSource};
