//! Bloom Storage Client
//!
//! Reads and writes metas and blocks against an object store.
//!
//! ```text
//!              ┌──────────────┐  key()   ┌──────────────┐
//!  MetaRef ───►│ KeyResolver  ├─────────►│ ObjectStore  │ JSON metas
//!  BlockRef    └──────┬───────┘          │              │ tar.gz blocks
//!                     │ local_path()     └──────┬───────┘
//!                     ▼                         │ get
//!              ┌──────────────┐  unpack         │
//!              │ working dir  │◄────────────────┘
//!              └──────┬───────┘
//!                     ▼
//!               BlockDirectory (ref-counted)
//! ```
//!
//! Batched operations fan out with at most `concurrency` requests in
//! flight and fail on the first error. Results are index-aligned with the
//! requested refs. No retries happen here; that belongs to the backend.

use crate::bloomshipper::archive;
use crate::bloomshipper::block::{Block, BlockDirectory, DirectoryRegistry};
use crate::bloomshipper::checksum::HasherPool;
use crate::bloomshipper::concurrency::{for_each_job, map_jobs};
use crate::bloomshipper::config::BloomStoreConfig;
use crate::bloomshipper::object_store::{ListResult, ObjectStore};
use crate::bloomshipper::refs::{BlockRef, Meta, MetaRef};
use crate::bloomshipper::resolver::{
    DefaultKeyResolver, KeyError, KeyResolver, Location, PrefixedResolver,
};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Error type for storage client operations
#[derive(Debug)]
pub enum ClientError {
    /// Meta could not be serialized
    Encode(serde_json::Error),
    /// Object store request failed
    Backend {
        op: &'static str,
        key: String,
        source: io::Error,
    },
    /// Stored meta is not valid JSON
    Decode {
        key: String,
        source: serde_json::Error,
    },
    /// Block stream could not be rewound or read
    Seek { key: String, source: io::Error },
    /// Block was downloaded but could not be extracted
    Extract {
        key: String,
        path: PathBuf,
        source: io::Error,
    },
    /// Listed key does not follow the storage layout
    InvalidKey(KeyError),
    /// Client has been stopped
    Stopped,
}

impl ClientError {
    fn backend(op: &'static str, key: &str, source: io::Error) -> Self {
        ClientError::Backend {
            op,
            key: key.to_string(),
            source,
        }
    }

    /// The underlying backend error, if this is one
    pub fn backend_error(&self) -> Option<&io::Error> {
        match self {
            ClientError::Backend { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Encode(e) => write!(f, "failed to encode meta: {}", e),
            ClientError::Backend { op, key, source } => {
                write!(f, "failed to {} {}: {}", op, key, source)
            }
            ClientError::Decode { key, source } => {
                write!(f, "failed to decode meta {}: {}", key, source)
            }
            ClientError::Seek { key, source } => {
                write!(f, "failed to read block data for {}: {}", key, source)
            }
            ClientError::Extract { key, path, source } => write!(
                f,
                "failed to extract block {} into {}: {}",
                key,
                path.display(),
                source
            ),
            ClientError::InvalidKey(e) => write!(f, "{}", e),
            ClientError::Stopped => write!(f, "bloom client stopped"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Encode(e) => Some(e),
            ClientError::Backend { source, .. }
            | ClientError::Seek { source, .. }
            | ClientError::Extract { source, .. } => Some(source),
            ClientError::Decode { source, .. } => Some(source),
            ClientError::InvalidKey(e) => Some(e),
            ClientError::Stopped => None,
        }
    }
}

impl From<KeyError> for ClientError {
    fn from(e: KeyError) -> Self {
        ClientError::InvalidKey(e)
    }
}

/// Storage client for bloom metas and blocks
pub struct BloomClient<S: ObjectStore> {
    key_resolver: DefaultKeyResolver,
    fs_resolver: PrefixedResolver<DefaultKeyResolver>,
    concurrency: usize,
    client: S,
    directories: DirectoryRegistry,
    hashers: HasherPool,
    cancel: CancellationToken,
    stopped: AtomicBool,
}

impl<S: ObjectStore> BloomClient<S> {
    /// Create a client staging extracted blocks under `working_directory`
    pub fn new(working_directory: impl Into<PathBuf>, concurrency: usize, client: S) -> Self {
        debug_assert!(concurrency > 0, "Precondition: concurrency must be positive");

        BloomClient {
            key_resolver: DefaultKeyResolver,
            fs_resolver: PrefixedResolver::new(working_directory, DefaultKeyResolver),
            concurrency: concurrency.max(1),
            client,
            directories: DirectoryRegistry::new(),
            hashers: HasherPool::new(),
            cancel: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &BloomStoreConfig, client: S) -> Self {
        Self::new(config.working_directory.clone(), config.workers, client)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn working_directory(&self) -> &Path {
        self.fs_resolver.prefix()
    }

    pub fn key_resolver(&self) -> &DefaultKeyResolver {
        &self.key_resolver
    }

    /// Registry of extracted directories handed out by this client
    pub fn directories(&self) -> &DirectoryRegistry {
        &self.directories
    }

    /// Hasher pool for building refs
    pub fn hashers(&self) -> &HasherPool {
        &self.hashers
    }

    pub fn object_store(&self) -> &S {
        &self.client
    }

    /// Token tripped when the client stops
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_object_not_found_err(&self, err: &ClientError) -> bool {
        err.backend_error()
            .is_some_and(|e| self.client.is_object_not_found_err(e))
    }

    fn ensure_running(&self) -> Result<(), ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Stopped);
        }
        Ok(())
    }

    // ========================================================================
    // Metas
    // ========================================================================

    pub async fn put_meta(&self, meta: &Meta) -> Result<(), ClientError> {
        self.ensure_running()?;
        let key = self.key_resolver.meta(&meta.meta_ref).addr;
        let data = serde_json::to_vec(meta).map_err(ClientError::Encode)?;

        self.client
            .put(&key, &data)
            .await
            .map_err(|e| ClientError::backend("put meta", &key, e))?;

        debug!(key = %key, bytes = data.len(), "put meta");
        Ok(())
    }

    /// Fetch a meta; its ref is taken from the argument, not the body
    pub async fn get_meta(&self, meta_ref: MetaRef) -> Result<Meta, ClientError> {
        self.ensure_running()?;
        let key = self.key_resolver.meta(&meta_ref).addr;

        let data = self
            .client
            .get(&key)
            .await
            .map_err(|e| ClientError::backend("get meta", &key, e))?;

        let mut meta: Meta = serde_json::from_slice(&data)
            .map_err(|source| ClientError::Decode { key: key.clone(), source })?;
        meta.meta_ref = meta_ref;

        debug!(key = %key, blocks = meta.blocks.len(), "got meta");
        Ok(meta)
    }

    pub async fn get_metas(&self, refs: &[MetaRef]) -> Result<Vec<Meta>, ClientError> {
        let metas = map_jobs(refs.len(), self.concurrency, |idx| {
            self.get_meta(refs[idx].clone())
        })
        .await?;

        info!(count = metas.len(), "fetched metas");
        Ok(metas)
    }

    pub async fn delete_metas(&self, refs: &[MetaRef]) -> Result<(), ClientError> {
        for_each_job(refs.len(), self.concurrency, |idx| async move {
            self.ensure_running()?;
            let key = self.key_resolver.meta(&refs[idx]).addr;
            self.client
                .delete(&key)
                .await
                .map_err(|e| ClientError::backend("delete meta", &key, e))?;
            debug!(key = %key, "deleted meta");
            Ok::<(), ClientError>(())
        })
        .await?;

        info!(count = refs.len(), "deleted metas");
        Ok(())
    }

    /// Every meta key stored under `prefix`, following continuation tokens
    pub async fn list_meta_keys(&self, prefix: &str) -> Result<Vec<String>, ClientError> {
        self.ensure_running()?;
        let mut keys = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let ListResult {
                objects,
                continuation_token,
            } = self
                .client
                .list(prefix, token.as_deref())
                .await
                .map_err(|e| ClientError::backend("list metas", prefix, e))?;

            keys.extend(objects.into_iter().map(|o| o.key));
            match continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        Ok(keys)
    }

    // ========================================================================
    // Blocks
    // ========================================================================

    /// Upload a block. The block's stream is closed on every path.
    ///
    /// `ObjectStore::put` takes a byte slice, so the whole archive is held in
    /// memory for the duration of the upload. Peak memory per call is one
    /// archive, allocated once from the stream's length.
    pub async fn put_block(&self, block: Block) -> Result<(), ClientError> {
        let Block {
            block_ref,
            mut data,
        } = block;
        let key = self.key_resolver.block(&block_ref).addr;

        let read = (|| -> io::Result<Vec<u8>> {
            let len = data.seek(SeekFrom::End(0))?;
            data.seek(SeekFrom::Start(0))?;
            let mut buf = Vec::with_capacity(len as usize);
            data.read_to_end(&mut buf)?;
            Ok(buf)
        })();

        if let Err(e) = data.close() {
            warn!(key = %key, error = %e, "failed to close block data");
        }

        let buf = read.map_err(|source| ClientError::Seek {
            key: key.clone(),
            source,
        })?;

        self.ensure_running()?;
        self.client
            .put(&key, &buf)
            .await
            .map_err(|e| ClientError::backend("put block", &key, e))?;

        debug!(key = %key, bytes = buf.len(), "put block");
        Ok(())
    }

    /// Download and extract a block into the working directory
    pub async fn get_block(&self, block_ref: BlockRef) -> Result<BlockDirectory, ClientError> {
        self.ensure_running()?;
        let Location {
            addr: key,
            local_path,
        } = self.fs_resolver.block(&block_ref);

        let data = self
            .client
            .get(&key)
            .await
            .map_err(|e| ClientError::backend("get block", &key, e))?;

        // The handle travels with the extraction so that a cancelled fetch
        // releases the directory only after unpacking stops writing to it
        let directory = self.directories.acquire(block_ref, local_path.clone());

        let extracted = tokio::task::spawn_blocking(move || {
            archive::unpack(data.as_slice(), directory.path()).map(|()| directory)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
        .and_then(|r| r);

        match extracted {
            Ok(directory) => {
                debug!(key = %key, path = %local_path.display(), "extracted block");
                Ok(directory)
            }
            Err(source) => Err(ClientError::Extract {
                key,
                path: local_path,
                source,
            }),
        }
    }

    /// Fetch blocks in order. On failure every directory already extracted
    /// for this batch is released.
    pub async fn get_blocks(&self, refs: &[BlockRef]) -> Result<Vec<BlockDirectory>, ClientError> {
        let directories = map_jobs(refs.len(), self.concurrency, |idx| {
            self.get_block(refs[idx].clone())
        })
        .await?;

        info!(count = directories.len(), "fetched blocks");
        Ok(directories)
    }

    pub async fn delete_blocks(&self, refs: &[BlockRef]) -> Result<(), ClientError> {
        for_each_job(refs.len(), self.concurrency, |idx| async move {
            self.ensure_running()?;
            let key = self.key_resolver.block(&refs[idx]).addr;
            self.client
                .delete(&key)
                .await
                .map_err(|e| ClientError::backend("delete block", &key, e))?;
            debug!(key = %key, "deleted block");
            Ok::<(), ClientError>(())
        })
        .await?;

        info!(count = refs.len(), "deleted blocks");
        Ok(())
    }

    /// Stop the client and release the backend. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        self.client.stop();
        info!("bloom client stopped");
    }
}


impl<S: ObjectStore> fmt::Debug for BloomClient<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BloomClient")
            .field("working_directory", &self.fs_resolver.prefix())
            .field("concurrency", &self.concurrency)
            .field("directories", &self.directories)
            .field("stopped", &self.stopped.load(Ordering::Acquire))
            .finish()
    }
}
