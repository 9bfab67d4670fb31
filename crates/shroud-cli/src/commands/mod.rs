//! CLI command implementations.

pub mod delete;
pub mod list;
