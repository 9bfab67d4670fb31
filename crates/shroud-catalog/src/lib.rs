//! # shroud-catalog
//!
//! Read side of dump storage for shroud.
//!
//! - **Listing**: discovers dumps, joins heartbeat and metadata into a
//!   [`listing::DumpInfo`], filters by tag and status
//! - **Retention**: deletes dumps under one policy, with dry run
//!
//! Dumps whose heartbeat cannot be read are classified
//! `unknown-or-failed`, never silently treated as done.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod gc;
pub mod listing;
pub mod metrics;

pub use error::{CatalogError, Result};
pub use gc::{DeleteMode, DeleteOptions, RetentionEngine, RetentionReport};
pub use listing::{
    DumpInfo, DumpStatus, ListFilter, StorageResponse, latest_done_dump, list_dumps,
    resolve_dump, sorted_dumps_with_statuses,
};
