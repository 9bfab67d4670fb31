//! Storage backend abstraction for dump storage (local directory, memory).
//!
//! Backends expose a flat key space of `/`-separated object paths. Directory
//! semantics (listing sub-scopes, recursive deletion) are layered on top by
//! [`ScopedStorage`](crate::scoped_storage::ScopedStorage).
//!
//! Every backend must report `last_modified` for stored objects: dump liveness
//! is derived from the modification time of the heartbeat object.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Metadata about a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object path (key).
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification timestamp.
    pub last_modified: DateTime<Utc>,
}

/// Storage backend trait for object storage.
///
/// Implementations must be safe for concurrent use: workers of one run write
/// distinct objects in parallel while the heartbeat worker rewrites its own.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads entire object.
    ///
    /// Returns `Error::NotFound` if object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes (creates or replaces) an object.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Deletes an object.
    ///
    /// Succeeds even if object doesn't exist (idempotent).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix.
    ///
    /// Returns empty vec if no objects match. Order is unspecified.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;
}

/// In-memory storage backend for testing.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

fn poisoned<T>(_: T) -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the modification time of an existing object.
    ///
    /// Lets tests age heartbeats without waiting on the wall clock.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    pub fn set_last_modified(&self, path: &str, at: DateTime<Utc>) -> Result<()> {
        let mut objects = self.objects.write().map_err(poisoned)?;
        let object = objects
            .get_mut(path)
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))?;
        object.last_modified = at;
        Ok(())
    }

    /// Returns every stored path, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn paths(&self) -> Result<Vec<String>> {
        let objects = self.objects.read().map_err(poisoned)?;
        let mut paths: Vec<String> = objects.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(poisoned)?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        self.objects.write().map_err(poisoned)?.insert(
            path.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.write().map_err(poisoned)?.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(poisoned)?;

        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(path, obj)| ObjectMeta {
                path: path.clone(),
                size: obj.data.len() as u64,
                last_modified: obj.last_modified,
            })
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(poisoned)?;

        Ok(objects.get(path).map(|obj| ObjectMeta {
            path: path.to_string(),
            size: obj.data.len() as u64,
            last_modified: obj.last_modified,
        }))
    }
}

/// Storage backend rooted at a local directory.
///
/// Object paths map onto files below the root; parent directories are
/// created on write and pruned when they become empty on delete.
#[derive(Debug, Clone)]
pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    /// Opens a backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `root` does not exist or is not a directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let meta = std::fs::metadata(&root)
            .map_err(|e| Error::Config(format!("storage directory {}: {e}", root.display())))?;
        if !meta.is_dir() {
            return Err(Error::Config(format!(
                "storage directory {} is a file",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

fn io_error(op: &str, path: &str, err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::NotFound {
        Error::NotFound(format!("object not found: {path}"))
    } else {
        Error::storage_with_source(format!("{op} {path}"), err)
    }
}

fn to_meta(path: String, meta: &std::fs::Metadata) -> ObjectMeta {
    let last_modified = meta
        .modified()
        .map_or_else(|_| Utc::now(), DateTime::<Utc>::from);
    ObjectMeta {
        path,
        size: meta.len(),
        last_modified,
    }
}

/// Recursively collects files below `dir`, keyed relative to `root`.
fn walk(root: &Path, dir: &Path, out: &mut Vec<ObjectMeta>) -> io::Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        let path = entry.path();
        if meta.is_dir() {
            walk(root, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(to_meta(key, &meta));
        }
    }
    Ok(())
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        tokio::fs::read(self.file_path(path))
            .await
            .map(Bytes::from)
            .map_err(|e| io_error("read", path, e))
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let file = self.file_path(path);
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create directory for", path, e))?;
        }
        tokio::fs::write(&file, &data)
            .await
            .map_err(|e| io_error("write", path, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let file = self.file_path(path);
        match tokio::fs::remove_file(&file).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_error("delete", path, e)),
        }

        // Prune now-empty parents; remove_dir fails on non-empty dirs, which ends the walk.
        let mut dir = file.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == self.root || tokio::fs::remove_dir(&current).await.is_err() {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let root = self.root.clone();
        let start = match prefix.rfind('/') {
            Some(idx) => root.join(&prefix[..idx]),
            None => root.clone(),
        };
        let owned_prefix = prefix.to_string();

        let listed = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            walk(&root, &start, &mut out).map(|()| out)
        })
        .await
        .map_err(|e| Error::Internal {
            message: format!("list task panicked: {e}"),
        })?
        .map_err(|e| io_error("list", prefix, e))?;

        Ok(listed
            .into_iter()
            .filter(|m| m.path.starts_with(&owned_prefix))
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        match tokio::fs::metadata(self.file_path(path)).await {
            Ok(meta) if meta.is_file() => Ok(Some(to_meta(path.to_string(), &meta))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("stat", path, e)),
        }
    }
}
