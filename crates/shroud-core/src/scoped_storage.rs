//! Prefix-scoped view over a [`StorageBackend`] with directory semantics.
//!
//! A [`ScopedStorage`] is the unit every other component works with: the
//! storage root holds one sub-scope per dump, and a dump sub-scope holds the
//! `heartbeat`, `metadata.json` and data objects of that dump.
//!
//! # Security
//!
//! All relative paths are validated before they reach the backend:
//! - Path traversal segments (`.`, `..`) are rejected
//! - Absolute paths, backslashes and percent-encoding are rejected
//! - Control characters are rejected

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::storage::{ObjectMeta, StorageBackend};

/// Result of [`ScopedStorage::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    /// Scope-relative name of the object.
    pub name: String,
    /// Whether the object exists.
    pub exist: bool,
    /// Last modification time; `None` when the object does not exist.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Prefix-scoped storage wrapper.
#[derive(Clone)]
pub struct ScopedStorage {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
}

impl std::fmt::Debug for ScopedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStorage")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl ScopedStorage {
    /// Creates a storage view over the whole backend.
    #[must_use]
    pub fn root(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            prefix: String::new(),
        }
    }

    /// Creates a storage view restricted to `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if `prefix` contains traversal sequences or other
    /// disallowed characters.
    pub fn with_prefix(backend: Arc<dyn StorageBackend>, prefix: &str) -> Result<Self> {
        let prefix = prefix.trim_matches('/');
        if !prefix.is_empty() {
            Self::validate_path(prefix)?;
        }
        Ok(Self {
            backend,
            prefix: prefix.to_string(),
        })
    }

    /// Validates a relative path for path traversal attacks.
    fn validate_path(path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(Error::InvalidInput("empty path".into()));
        }

        if path.starts_with('/') || path.starts_with('\\') {
            return Err(Error::InvalidInput(format!(
                "absolute paths not allowed: {path}"
            )));
        }

        if path.contains('\\') {
            return Err(Error::InvalidInput(format!(
                "backslashes not allowed in paths: {path}"
            )));
        }

        if path.contains('%') {
            return Err(Error::InvalidInput(format!(
                "percent-encoding not allowed in paths: {path}"
            )));
        }

        if path.chars().any(char::is_control) {
            return Err(Error::InvalidInput(format!(
                "control characters not allowed in paths: {path}"
            )));
        }

        for segment in path.split('/') {
            if segment == "." || segment == ".." {
                return Err(Error::InvalidInput(format!(
                    "path traversal not allowed: {path}"
                )));
            }
        }

        Ok(())
    }

    /// Returns the backend-absolute prefix of this scope (no trailing slash).
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the last segment of the prefix; empty for the root scope.
    #[must_use]
    pub fn dirname(&self) -> &str {
        self.prefix.rsplit('/').next().unwrap_or_default()
    }

    /// Returns the backend for advanced operations.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn scoped_path(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }

    fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    /// Lists the direct children of this scope.
    ///
    /// Returns the names of objects stored directly in the scope and one
    /// sub-scope per child directory. Both are sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend listing fails.
    pub async fn list_dir(&self) -> Result<(Vec<String>, Vec<ScopedStorage>)> {
        let list_prefix = self.list_prefix();
        let metas = self.backend.list(&list_prefix).await?;

        let mut files = BTreeSet::new();
        let mut dirs = BTreeSet::new();
        for meta in metas {
            let Some(rest) = meta.path.strip_prefix(&list_prefix) else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) if !dir.is_empty() => {
                    dirs.insert(dir.to_string());
                }
                Some(_) => {}
                None => {
                    files.insert(rest.to_string());
                }
            }
        }

        let scopes = dirs
            .into_iter()
            .map(|dir| Self {
                backend: Arc::clone(&self.backend),
                prefix: self.scoped_path(&dir),
            })
            .collect();
        Ok((files.into_iter().collect(), scopes))
    }

    /// Reads the object at a scope-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the object is not found.
    pub async fn get_object(&self, path: &str) -> Result<Bytes> {
        Self::validate_path(path)?;
        self.backend.get(&self.scoped_path(path)).await
    }

    /// Writes the object at a scope-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the write fails.
    pub async fn put_object(&self, path: &str, data: Bytes) -> Result<()> {
        Self::validate_path(path)?;
        self.backend.put(&self.scoped_path(path), data).await
    }

    /// Deletes the given objects. Missing objects are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error on the first invalid path or failed delete.
    pub async fn delete(&self, paths: &[&str]) -> Result<()> {
        for path in paths {
            Self::validate_path(path)?;
            self.backend.delete(&self.scoped_path(path)).await?;
        }
        Ok(())
    }

    /// Recursively deletes everything stored under `path_prefix`.
    ///
    /// Returns the number of objects removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is invalid or any delete fails.
    pub async fn delete_all(&self, path_prefix: &str) -> Result<usize> {
        let path_prefix = path_prefix.trim_end_matches('/');
        Self::validate_path(path_prefix)?;
        let target = self.scoped_path(path_prefix);

        let mut victims: Vec<String> = self
            .backend
            .list(&format!("{target}/"))
            .await?
            .into_iter()
            .map(|m| m.path)
            .collect();
        if self.backend.head(&target).await?.is_some() {
            victims.push(target);
        }

        for path in &victims {
            self.backend.delete(path).await?;
        }
        Ok(victims.len())
    }

    /// Returns true if an object exists at the scope-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the lookup fails.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.head(path).await?.is_some())
    }

    /// Returns object metadata for a scope-relative path.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the lookup fails.
    pub async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        Self::validate_path(path)?;
        self.backend.head(&self.scoped_path(path)).await
    }

    /// Returns existence and modification time of a scope-relative object.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or the lookup fails.
    pub async fn stat(&self, path: &str) -> Result<ObjectStat> {
        let meta = self.head(path).await?;
        Ok(ObjectStat {
            name: path.to_string(),
            exist: meta.is_some(),
            last_modified: meta.map(|m| m.last_modified),
        })
    }

    /// Returns a view of a nested scope.
    ///
    /// With `relative == true` the path is resolved against this scope,
    /// otherwise against the backend root.
    ///
    /// # Errors
    ///
    /// Returns an error if the path contains traversal sequences.
    pub fn sub_storage(&self, path: &str, relative: bool) -> Result<Self> {
        let path = path.trim_matches('/');
        Self::validate_path(path)?;
        let prefix = if relative {
            self.scoped_path(path)
        } else {
            path.to_string()
        };
        Ok(Self {
            backend: Arc::clone(&self.backend),
            prefix,
        })
    }
}
