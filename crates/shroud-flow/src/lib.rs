//! # shroud-flow
//!
//! Dump and restore execution for shroud.
//!
//! This crate runs the DBMS-independent part of a dump or restore:
//!
//! - **Task pipeline**: producers build [`task::Dumper`]s or [`task::Restorer`]s;
//!   the core never sees engine-specific code
//! - **Worker pool**: bounded fan-out with fail-fast cancellation
//! - **Heartbeat worker**: keeps a running dump's liveness object fresh and
//!   finalizes it as `done` or `failed`
//! - **Ordered restore**: dispatches a task only after its dependencies have
//!   been restored
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shroud_core::config::Config;
//! use shroud_core::scoped_storage::ScopedStorage;
//! use shroud_core::storage::LocalFsBackend;
//! use shroud_flow::dump::{DumpOptions, DumpRunner};
//! use shroud_flow::task::DumpTaskProducer;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(producer: Arc<dyn DumpTaskProducer>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let backend = Arc::new(LocalFsBackend::new(&config.storage.directory)?);
//! let runner = DumpRunner::new(
//!     ScopedStorage::root(backend),
//!     producer,
//!     DumpOptions::from_config("postgresql", "shop", &config),
//! );
//! let outcome = runner.run(&CancellationToken::new()).await?;
//! println!("dump {} written", outcome.dump_id);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod dag;
pub mod dump;
pub mod error;
pub mod heartbeat;
pub mod metrics;
pub mod pool;
pub mod producer;
pub mod resolver;
pub mod restore;
pub mod task;
pub mod validation;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::dag::plan_restoration;
    pub use crate::dump::{DumpOptions, DumpOutcome, DumpRunner};
    pub use crate::error::{BoxError, Error, Result};
    pub use crate::heartbeat::{HeartbeatHandle, HeartbeatWorker};
    pub use crate::pool::{TaskSource, WorkerPool};
    pub use crate::producer::{OrderedProducer, ProducerSource, RestoreTaskProducer, UnorderedProducer};
    pub use crate::resolver::TaskResolver;
    pub use crate::restore::{RestoreOptions, RestoreOutcome, RestoreRunner};
    pub use crate::task::{
        DumpTaskProducer, Dumper, Restorer, RestorerFactory, SchemaDumper, SchemaRestorer, Task,
        TaskMeta,
    };
    pub use crate::validation::{Severity, ValidationContext, ValidationWarning};
}
