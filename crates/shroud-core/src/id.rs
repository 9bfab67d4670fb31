//! Identifiers for dumps and units of work.
//!
//! - [`DumpId`] names a dump sub-scope in storage. Newly generated ids are
//!   ULIDs from one process-wide monotonic generator, so lexical order equals
//!   creation order even within the same millisecond.
//! - [`TaskId`] is the stable `"<kind>___<qualified-name>"` key used as the
//!   vertex identity of the restore dependency graph.
//!
//! # Example
//!
//! ```rust
//! use shroud_core::id::{DumpId, ObjectKind, TaskId};
//!
//! let dump = DumpId::generate();
//! let task = TaskId::new(ObjectKind::Table, "public.users");
//! assert_eq!(task.as_str(), "table___public.users");
//! assert!(dump.created_at().is_some());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{LazyLock, Mutex, PoisonError};
use ulid::{Generator, Ulid};

use crate::error::{Error, Result};

/// Separator between the object kind and the qualified name in a [`TaskId`].
pub const TASK_ID_SEPARATOR: &str = "___";

static GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// Identifier of one dump; also the name of its storage sub-scope.
///
/// Any non-empty directory name is accepted when reading storage, since
/// dumps written by other tools may not carry a ULID. Ordering is lexical.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DumpId(String);

impl DumpId {
    /// Generates a new dump ID from the current time.
    ///
    /// Each ID is strictly greater than the previous one generated by this
    /// process.
    #[must_use]
    pub fn generate() -> Self {
        let mut generator = GENERATOR.lock().unwrap_or_else(PoisonError::into_inner);
        let ulid = loop {
            match generator.generate() {
                Ok(ulid) => break ulid,
                // Random bits exhausted for this millisecond; wait for the next.
                Err(_) => std::thread::yield_now(),
            }
        };
        Self(ulid.to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the creation timestamp encoded in the ID, when it is a ULID.
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let ulid = Ulid::from_string(&self.0).ok()?;
        let ms = i64::try_from(ulid.timestamp_ms()).ok()?;
        DateTime::from_timestamp_millis(ms)
    }
}

impl fmt::Display for DumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DumpId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidId {
                message: "dump ID cannot be empty".into(),
            });
        }
        if s.contains('/') || s.contains('\\') || s == "." || s == ".." {
            return Err(Error::InvalidId {
                message: format!("invalid dump ID '{s}': must be a single path segment"),
            });
        }
        Ok(Self(s.to_string()))
    }
}

/// Kind of database object a task operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// Table data.
    Table,
    /// Sequence state.
    Sequence,
    /// Large object payload.
    LargeObject,
}

impl ObjectKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Sequence => "sequence",
            Self::LargeObject => "large_object",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "table" => Ok(Self::Table),
            "sequence" => Ok(Self::Sequence),
            "large_object" => Ok(Self::LargeObject),
            other => Err(Error::InvalidId {
                message: format!("unknown object kind '{other}'"),
            }),
        }
    }
}

/// Stable identity of a unit of work: `"<kind>___<qualified-name>"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Builds the task ID for an object of `kind` named `qualified_name`.
    #[must_use]
    pub fn new(kind: ObjectKind, qualified_name: &str) -> Self {
        Self(format!("{kind}{TASK_ID_SEPARATOR}{qualified_name}"))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the ID back into its kind and qualified name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidId`] if the separator is missing or the kind is unknown.
    pub fn parts(&self) -> Result<(ObjectKind, &str)> {
        let (kind, name) = self
            .0
            .split_once(TASK_ID_SEPARATOR)
            .ok_or_else(|| Error::InvalidId {
                message: format!("task ID '{}' has no kind separator", self.0),
            })?;
        Ok((kind.parse()?, name))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let id = Self(s.to_string());
        id.parts()?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_dump_ids_sort_by_creation() {
        let first = DumpId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = DumpId::generate();
        assert!(second > first);
    }

    #[test]
    fn ids_generated_back_to_back_are_strictly_increasing() {
        let ids: Vec<DumpId> = (0..1000).map(|_| DumpId::generate()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn ids_generated_across_threads_are_unique() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| (0..250).map(|_| DumpId::generate()).collect::<Vec<_>>()))
            .collect();
        let mut ids: Vec<DumpId> = handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("thread"))
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn dump_id_created_at_is_recent() {
        let id = DumpId::generate();
        let created = id.created_at().expect("ulid timestamp");
        assert!((Utc::now() - created).num_seconds() < 5);
    }

    #[test]
    fn foreign_dump_id_has_no_timestamp() {
        let id: DumpId = "1700000000000".parse().expect("plain id");
        assert!(id.created_at().is_none());
    }

    #[test]
    fn dump_id_rejects_path_segments() {
        assert!("".parse::<DumpId>().is_err());
        assert!("a/b".parse::<DumpId>().is_err());
        assert!("..".parse::<DumpId>().is_err());
    }

    #[test]
    fn task_id_layout() {
        let id = TaskId::new(ObjectKind::Table, "public.orders");
        assert_eq!(id.to_string(), "table___public.orders");
        let (kind, name) = id.parts().expect("parts");
        assert_eq!(kind, ObjectKind::Table);
        assert_eq!(name, "public.orders");
    }

    #[test]
    fn task_id_parse_rejects_unknown_kind() {
        assert!("view___public.v".parse::<TaskId>().is_err());
        assert!("no-separator".parse::<TaskId>().is_err());
    }
}
