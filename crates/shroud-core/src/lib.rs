//! # shroud-core
//!
//! Shared primitives for the shroud dump/restore toolkit.
//!
//! - **Identifiers**: [`DumpId`] and [`TaskId`]
//! - **Storage**: the [`StorageBackend`] contract and the directory-semantics
//!   [`ScopedStorage`] view every component works through
//! - **Heartbeat**: the persisted liveness record of a dump and its
//!   read-time staleness rule
//! - **Metadata**: the `metadata.json` document written by a completed dump
//! - **Config / Observability**: explicit configuration and logging setup
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use chrono::Utc;
//! use shroud_core::prelude::*;
//!
//! let hb = Heartbeat {
//!     status: HeartbeatStatus::InProgress,
//!     updated_at: Utc::now() - chrono::Duration::minutes(20),
//! };
//! // Not refreshed within 15 minutes: the writer is presumed dead.
//! assert_eq!(
//!     hb.status_at(Duration::from_secs(15 * 60), Utc::now()),
//!     HeartbeatStatus::Failed
//! );
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod id;
pub mod metadata;
pub mod observability;
pub mod scoped_storage;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::heartbeat::{Heartbeat, HeartbeatReader, HeartbeatStatus, HeartbeatWriter};
    pub use crate::id::{DumpId, ObjectKind, TaskId};
    pub use crate::metadata::{DumpStat, Metadata, RestorationContext, RestorationItem, TaskStat};
    pub use crate::scoped_storage::{ObjectStat, ScopedStorage};
    pub use crate::storage::{LocalFsBackend, MemoryBackend, ObjectMeta, StorageBackend};
}

pub use config::Config;
pub use error::{Error, Result};
pub use heartbeat::{
    HEARTBEAT_FILE, Heartbeat, HeartbeatReader, HeartbeatStatus, HeartbeatWriter,
};
pub use id::{DumpId, ObjectKind, TaskId};
pub use metadata::{
    DumpStat, METADATA_FILE, Metadata, RestorationContext, RestorationItem, TaskStat,
};
pub use observability::{LogFormat, init_logging};
pub use scoped_storage::{ObjectStat, ScopedStorage};
pub use storage::{LocalFsBackend, MemoryBackend, ObjectMeta, StorageBackend};
