//! Object Store Abstraction
//!
//! The bloom client is generic over any backend exposing get/put/delete/list
//! plus a not-found predicate. Keys are opaque strings produced by the key
//! resolver.
//!
//! Implementations:
//! - `InMemoryObjectStore`: For unit tests
//! - `LocalFsObjectStore`: For development and local testing
//! - `SimulatedObjectStore`: Fault and latency injection for deterministic tests
//! - `S3ObjectStore`: For production (feature-gated)

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

/// Metadata for a stored object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object key (path)
    pub key: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Creation timestamp (Unix ms)
    pub created_at_ms: u64,
    /// ETag or content hash (optional)
    pub etag: Option<String>,
}

/// Result of a list operation
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    /// Objects matching the prefix
    pub objects: Vec<ObjectMeta>,
    /// Continuation token for pagination (if more results exist)
    pub continuation_token: Option<String>,
}

/// Boxed future returned by object store operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = IoResult<T>> + Send + 'a>>;

/// Object store abstraction trait
pub trait ObjectStore: Send + Sync + 'static {
    /// Put an object (create or overwrite)
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()>;

    /// Get an object's contents
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>>;

    /// Check if an object exists
    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

    /// Delete an object
    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;

    /// List objects with a prefix
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult>;

    /// Get object metadata without downloading content
    fn head<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectMeta>;

    /// Whether an error returned by this store means the object is absent
    fn is_object_not_found_err(&self, err: &IoError) -> bool {
        err.kind() == ErrorKind::NotFound
    }

    /// Release the backend client
    fn stop(&self) {}
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        (**self).put(key, data)
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        (**self).get(key)
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        (**self).exists(key)
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        (**self).delete(key)
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        (**self).list(prefix, continuation_token)
    }

    fn head<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectMeta> {
        (**self).head(key)
    }

    fn is_object_not_found_err(&self, err: &IoError) -> bool {
        (**self).is_object_not_found_err(err)
    }

    fn stop(&self) {
        (**self).stop()
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// InMemoryObjectStore - For tests
// ============================================================================

/// In-memory object store for unit tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    data: Arc<RwLock<BTreeMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    created_at_ms: u64,
}

impl InMemoryObjectStore {
    /// Create a new in-memory object store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored objects (for testing)
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if empty (for testing)
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// All stored keys in order (for testing)
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let obj = StoredObject {
                data: data.to_vec(),
                created_at_ms: now_ms(),
            };
            self.data.write().insert(key.to_string(), obj);
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.data
                .read()
                .get(key)
                .map(|obj| obj.data.clone())
                .ok_or_else(|| IoError::new(ErrorKind::NotFound, format!("Key not found: {}", key)))
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { Ok(self.data.read().contains_key(key)) })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.data.write().remove(key);
            Ok(())
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        _continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        Box::pin(async move {
            // BTreeMap iteration is already key-ordered
            let objects = self
                .data
                .read()
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| ObjectMeta {
                    key: k.clone(),
                    size_bytes: v.data.len() as u64,
                    created_at_ms: v.created_at_ms,
                    etag: None,
                })
                .collect();

            Ok(ListResult {
                objects,
                continuation_token: None,
            })
        })
    }

    fn head<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectMeta> {
        Box::pin(async move {
            self.data
                .read()
                .get(key)
                .map(|obj| ObjectMeta {
                    key: key.to_string(),
                    size_bytes: obj.data.len() as u64,
                    created_at_ms: obj.created_at_ms,
                    etag: None,
                })
                .ok_or_else(|| IoError::new(ErrorKind::NotFound, format!("Key not found: {}", key)))
        })
    }
}

// ============================================================================
// LocalFsObjectStore - For development
// ============================================================================

/// Local filesystem object store for development and testing
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
}

impl LocalFsObjectStore {
    /// Create a new local filesystem object store
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsObjectStore { base_path }
    }

    /// Get the full path for a key
    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    /// Get the base path
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn created_at_ms(metadata: &std::fs::Metadata) -> u64 {
        metadata
            .created()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn walk_dir(dir: &Path, base: &Path, prefix: &str, objects: &mut Vec<ObjectMeta>) -> IoResult<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();

            if path.is_dir() {
                Self::walk_dir(&path, base, prefix, objects)?;
            } else if path.is_file() {
                let Ok(relative) = path.strip_prefix(base) else {
                    continue;
                };
                // Keys always use '/' regardless of platform separator
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                if key.starts_with(prefix) {
                    let metadata = std::fs::metadata(&path)?;
                    objects.push(ObjectMeta {
                        key,
                        size_bytes: metadata.len(),
                        created_at_ms: Self::created_at_ms(&metadata),
                        etag: None,
                    });
                }
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalFsObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.full_path(key);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, data).await
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move { tokio::fs::read(self.full_path(key)).await })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move { tokio::fs::try_exists(self.full_path(key)).await })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            match tokio::fs::remove_file(self.full_path(key)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()), // Already deleted
                Err(e) => Err(e),
            }
        })
    }

    fn list<'a>(
        &'a self,
        prefix: &'a str,
        _continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        Box::pin(async move {
            let base = self.base_path.clone();
            let prefix = prefix.to_string();

            tokio::task::spawn_blocking(move || {
                // Start from the deepest directory named by the prefix
                let dir_part = match prefix.rfind('/') {
                    Some(idx) => &prefix[..idx],
                    None => "",
                };
                let search_dir = base.join(dir_part);
                if !search_dir.is_dir() {
                    return Ok(ListResult::default());
                }

                let mut objects = Vec::new();
                Self::walk_dir(&search_dir, &base, &prefix, &mut objects)?;
                objects.sort_by(|a, b| a.key.cmp(&b.key));

                Ok(ListResult {
                    objects,
                    continuation_token: None,
                })
            })
            .await
            .map_err(|e| IoError::new(ErrorKind::Other, e))?
        })
    }

    fn head<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectMeta> {
        Box::pin(async move {
            let metadata = tokio::fs::metadata(self.full_path(key)).await?;
            Ok(ObjectMeta {
                key: key.to_string(),
                size_bytes: metadata.len(),
                created_at_ms: Self::created_at_ms(&metadata),
                etag: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inmemory_put_get() {
        let store = InMemoryObjectStore::new();

        store.put("test/key1", b"hello world").await.unwrap();
        let data = store.get("test/key1").await.unwrap();

        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_inmemory_get_missing_is_not_found() {
        let store = InMemoryObjectStore::new();

        let err = store.get("missing").await.unwrap_err();
        assert!(store.is_object_not_found_err(&err));
    }

    #[tokio::test]
    async fn test_inmemory_delete() {
        let store = InMemoryObjectStore::new();

        store.put("test/key1", b"data").await.unwrap();
        assert!(store.exists("test/key1").await.unwrap());

        store.delete("test/key1").await.unwrap();
        assert!(!store.exists("test/key1").await.unwrap());
    }

    #[tokio::test]
    async fn test_inmemory_list_is_sorted() {
        let store = InMemoryObjectStore::new();

        store.put("bloom/metas/t/b", b"data2").await.unwrap();
        store.put("bloom/metas/t/a", b"data1").await.unwrap();
        store.put("bloom/blooms/t/c", b"data3").await.unwrap();

        let result = store.list("bloom/metas/", None).await.unwrap();
        let keys: Vec<_> = result.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["bloom/metas/t/a", "bloom/metas/t/b"]);
    }

    #[tokio::test]
    async fn test_inmemory_head() {
        let store = InMemoryObjectStore::new();

        let data = b"hello world";
        store.put("test/key", data).await.unwrap();

        let meta = store.head("test/key").await.unwrap();
        assert_eq!(meta.key, "test/key");
        assert_eq!(meta.size_bytes, data.len() as u64);
    }

    #[tokio::test]
    async fn test_arc_dyn_store() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());

        store.put("k", b"v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"v");
    }

    #[tokio::test]
    async fn test_localfs_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsObjectStore::new(dir.path().to_path_buf());

        store.put("test/key1.txt", b"hello world").await.unwrap();
        let data = store.get("test/key1.txt").await.unwrap();

        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_localfs_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsObjectStore::new(dir.path().to_path_buf());

        store.put("bloom/metas/t/tbl/a", b"data1").await.unwrap();
        store.put("bloom/metas/t/tbl/b", b"data2").await.unwrap();
        store.put("bloom/blooms/t/tbl/c", b"data3").await.unwrap();

        let result = store.list("bloom/metas/t/tbl/", None).await.unwrap();
        let keys: Vec<_> = result.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["bloom/metas/t/tbl/a", "bloom/metas/t/tbl/b"]);

        let empty = store.list("bloom/metas/other/", None).await.unwrap();
        assert!(empty.objects.is_empty());
    }

    #[tokio::test]
    async fn test_localfs_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFsObjectStore::new(dir.path().to_path_buf());

        store.delete("never/written").await.unwrap();
    }
}
