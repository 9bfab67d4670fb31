//! Retention and deletion of stored dumps.
//!
//! One request resolves to exactly one [`DeleteMode`], listed here in
//! priority order; when several criteria are set the first one applies:
//!
//! - **retain-for D**: delete `done` dumps at least D old
//! - **retain-recent N**: keep the N newest `done` dumps
//! - **prune-failed**: delete `failed` dumps (plus `unknown-or-failed` with
//!   `prune_unsafe`)
//! - **before-date T**: delete `done` dumps dated before T
//! - **dump-id**: delete one named dump regardless of status
//!
//! Only `prune-failed` with `prune_unsafe` and `dump-id` can touch a dump
//! whose status could not be read.
//!
//! # Usage
//!
//! ```rust,ignore
//! use shroud_catalog::gc::{DeleteOptions, RetentionEngine};
//!
//! let engine = RetentionEngine::new(storage, config.heartbeat.stale_after);
//! let report = engine
//!     .run(&DeleteOptions { retain_recent: Some(5), dry_run: true, ..Default::default() })
//!     .await?;
//! println!("would delete {} dumps", report.selected.len());
//! ```

mod collector;
mod policy;

pub use collector::{RetentionEngine, RetentionReport};
pub use policy::{DeleteMode, DeleteOptions};
