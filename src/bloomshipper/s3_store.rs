//! S3 Object Store Implementation
//!
//! S3-compatible backend for production deployments, built on the
//! `object_store` crate from the Arrow ecosystem. Works against AWS S3 and
//! compatible services (MinIO, LocalStack) via a custom endpoint.

use crate::bloomshipper::config::S3Config;
use crate::bloomshipper::object_store::{ListResult, ObjectMeta, ObjectStore, StoreFuture};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore as ObjectStoreTrait;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::sync::Arc;

/// Objects returned per list page
const LIST_PAGE_SIZE: usize = 1000;

/// S3 object store for bloom metas and blocks
#[derive(Clone)]
pub struct S3ObjectStore {
    store: Arc<dyn ObjectStoreTrait>,
    prefix: String,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    ///
    /// Credentials come from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
    pub async fn new(config: S3Config) -> IoResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        builder = builder
            .with_access_key_id(std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default())
            .with_secret_access_key(std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default());

        let store = builder.build().map_err(|e| {
            IoError::new(
                ErrorKind::InvalidInput,
                format!("Failed to create S3 store: {}", e),
            )
        })?;

        Ok(S3ObjectStore {
            store: Arc::new(store),
            prefix: config.prefix,
        })
    }

    /// Wrap an existing `object_store` backend (for testing)
    pub fn from_store(store: Arc<dyn ObjectStoreTrait>, prefix: String) -> Self {
        S3ObjectStore { store, prefix }
    }

    fn full_path(&self, key: &str) -> ObjectPath {
        if self.prefix.is_empty() {
            ObjectPath::from(key)
        } else {
            ObjectPath::from(format!("{}/{}", self.prefix, key))
        }
    }

    fn strip_prefix(&self, path: &ObjectPath) -> String {
        let path_str = path.to_string();
        if self.prefix.is_empty() {
            return path_str;
        }
        let prefix_with_slash = format!("{}/", self.prefix);
        path_str
            .strip_prefix(&prefix_with_slash)
            .unwrap_or(&path_str)
            .to_string()
    }

    fn map_error(err: object_store::Error) -> IoError {
        match &err {
            object_store::Error::NotFound { .. } => IoError::new(ErrorKind::NotFound, err.to_string()),
            object_store::Error::AlreadyExists { .. } => {
                IoError::new(ErrorKind::AlreadyExists, err.to_string())
            }
            object_store::Error::Precondition { .. } => {
                IoError::new(ErrorKind::InvalidInput, err.to_string())
            }
            _ => IoError::new(ErrorKind::Other, err.to_string()),
        }
    }

    fn object_meta(key: String, meta: object_store::ObjectMeta) -> ObjectMeta {
        ObjectMeta {
            key,
            size_bytes: meta.size as u64,
            created_at_ms: meta
                .last_modified
                .timestamp_millis()
                .try_into()
                .unwrap_or(0),
            etag: meta.e_tag,
        }
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("prefix", &self.prefix)
            .finish()
    }
}

impl ObjectStore for S3ObjectStore {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.full_path(key);
            self.store
                .put(&path, bytes::Bytes::copy_from_slice(data).into())
                .await
                .map_err(Self::map_error)?;
            Ok(())
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let path = self.full_path(key);
            let result = self.store.get(&path).await.map_err(Self::map_error)?;
            let data = result.bytes().await.map_err(Self::map_error)?;
            Ok(data.to_vec())
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
        Box::pin(async move {
            let path = self.full_path(key);
            match self.store.head(&path).await {
                Ok(_) => Ok(true),
                Err(object_store::Error::NotFound { .. }) => Ok(false),
                Err(e) => Err(Self::map_error(e)),
            }
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let path = self.full_path(key);
            match self.store.delete(&path).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
                Err(e) => Err(Self::map_error(e)),
            }
        })
    }

    /// Pages by offset; the continuation token is the index of the next object
    fn list<'a>(
        &'a self,
        prefix: &'a str,
        continuation_token: Option<&'a str>,
    ) -> StoreFuture<'a, ListResult> {
        Box::pin(async move {
            use futures::TryStreamExt;

            let full_prefix = self.full_path(prefix);
            let offset: usize = continuation_token
                .and_then(|t| t.parse().ok())
                .unwrap_or(0);

            let mut all_objects: Vec<object_store::ObjectMeta> = self
                .store
                .list(Some(&full_prefix))
                .try_collect()
                .await
                .map_err(Self::map_error)?;
            // Backend listing order is unspecified; offsets need a stable one
            all_objects.sort_by(|a, b| a.location.cmp(&b.location));

            let total = all_objects.len();
            let objects = all_objects
                .into_iter()
                .skip(offset)
                .take(LIST_PAGE_SIZE)
                .map(|meta| {
                    let key = self.strip_prefix(&meta.location);
                    Self::object_meta(key, meta)
                })
                .collect();

            let next = offset + LIST_PAGE_SIZE;
            Ok(ListResult {
                objects,
                continuation_token: (next < total).then(|| next.to_string()),
            })
        })
    }

    fn head<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ObjectMeta> {
        Box::pin(async move {
            let path = self.full_path(key);
            let meta = self.store.head(&path).await.map_err(Self::map_error)?;
            Ok(Self::object_meta(key.to_string(), meta))
        })
    }
}
