//! Error types for shroud-catalog operations.

use thiserror::Error;

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors that can occur while listing or deleting dumps.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The deletion request does not resolve to a mode.
    #[error("invalid delete options: {message}")]
    InvalidOptions {
        /// What is wrong with the request.
        message: String,
    },

    /// A named dump is not present in storage.
    #[error("dump {dump_id} not found")]
    DumpNotFound {
        /// The requested dump.
        dump_id: String,
    },

    /// No dump with a `done` heartbeat exists.
    #[error("no completed dump found")]
    NoCompletedDump,

    /// Removing a dump's objects failed.
    #[error("could not delete dump {dump_id}")]
    Delete {
        /// The dump being deleted.
        dump_id: String,
        /// The storage error.
        #[source]
        source: shroud_core::Error,
    },

    /// An error from shroud-core.
    #[error("core error: {0}")]
    Core(#[from] shroud_core::Error),
}

impl CatalogError {
    pub(crate) fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }
}
