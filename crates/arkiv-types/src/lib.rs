//! Shared domain types for the arkiv storage offer.
//!
//! This crate defines the vocabulary the other arkiv crates speak:
//! tenants, data categories (and their WORM/mutability policy), offer log
//! entries, and the single tagged error type used across the workspace.

pub mod category;
pub mod error;
pub mod log;
pub mod tenant;

pub use category::DataCategory;
pub use error::{Error, ErrorKind, Result};
pub use log::{OfferLogAction, OfferLogEntry, Order};
pub use tenant::Tenant;
