//! Blocks in Transit and Extracted Block Directories
//!
//! A `Block` is an archived block on its way to the object store: a ref plus
//! a seekable byte stream the holder must close exactly once.
//!
//! A `BlockDirectory` is a handle on a block extracted to local disk. Handles
//! to the same local path share one atomic reference count through the
//! `DirectoryRegistry`:
//!
//! ```text
//! acquire / clone  → count += 1
//! close / drop     → count -= 1 → at 0: remove directory from disk
//! ```
//!
//! Removal happens on the releasing thread, under the registry lock, so a
//! concurrent acquire either revives the entry before removal or creates a
//! fresh one after it.

use crate::bloomshipper::archive;
use crate::bloomshipper::model::{FingerprintBounds, Time};
use crate::bloomshipper::refs::{BlockRef, Ref};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Readable, seekable stream with an explicit close
pub trait ReadSeekClose: Read + Seek + Send {
    fn close(self: Box<Self>) -> io::Result<()>;
}

/// Makes any `Read + Seek` stream closable; close just drops it
#[derive(Debug)]
pub struct ClosableReadSeekerAdapter<R>(pub R);

impl<R: Read> Read for ClosableReadSeekerAdapter<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R: Seek> Seek for ClosableReadSeekerAdapter<R> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

impl<R: Read + Seek + Send> ReadSeekClose for ClosableReadSeekerAdapter<R> {
    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

impl ReadSeekClose for fs::File {
    fn close(self: Box<Self>) -> io::Result<()> {
        Ok(())
    }
}

/// Series-level metadata of a built block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMetadata {
    pub bounds: FingerprintBounds,
    pub from: Time,
    pub through: Time,
    pub checksum: u32,
}

/// Archived block bytes headed for the object store
pub struct Block {
    pub block_ref: BlockRef,
    pub data: Box<dyn ReadSeekClose>,
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("block_ref", &self.block_ref)
            .finish()
    }
}

impl Block {
    pub fn new(block_ref: BlockRef, data: Box<dyn ReadSeekClose>) -> Self {
        Block { block_ref, data }
    }

    /// Archive a local block directory into an in-memory block
    pub fn from_directory(
        tenant: &str,
        table: &str,
        metadata: &BlockMetadata,
        dir: &Path,
    ) -> io::Result<Block> {
        let block_ref = BlockRef(Ref::new(
            tenant,
            table,
            metadata.bounds,
            metadata.from,
            metadata.through,
            metadata.checksum,
        ));

        let buf = archive::pack_directory_to_vec(dir)?;

        Ok(Block {
            block_ref,
            data: Box::new(ClosableReadSeekerAdapter(Cursor::new(buf))),
        })
    }
}

// ============================================================================
// Extracted block directories
// ============================================================================

struct DirectoryState {
    block_ref: BlockRef,
    path: PathBuf,
    refs: AtomicUsize,
}

/// Tracks live extracted directories by local path
#[derive(Clone, Default)]
pub struct DirectoryRegistry {
    live: Arc<Mutex<HashMap<PathBuf, Arc<DirectoryState>>>>,
}

impl DirectoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference on the directory at `path`, registering it if absent
    pub fn acquire(&self, block_ref: BlockRef, path: PathBuf) -> BlockDirectory {
        let state = {
            let mut live = self.live.lock();
            let state = live
                .entry(path.clone())
                .or_insert_with(|| {
                    Arc::new(DirectoryState {
                        block_ref,
                        path,
                        refs: AtomicUsize::new(0),
                    })
                })
                .clone();
            state.refs.fetch_add(1, Ordering::AcqRel);
            state
        };

        BlockDirectory {
            state,
            registry: self.clone(),
        }
    }

    /// Number of directories currently referenced
    pub fn live_directories(&self) -> usize {
        self.live.lock().len()
    }

    fn release(&self, state: &Arc<DirectoryState>) {
        if state.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }

        let mut live = self.live.lock();
        // Re-acquired between the decrement and taking the lock
        if state.refs.load(Ordering::Acquire) != 0 {
            return;
        }
        // Another handle already released and replaced this entry
        if !live
            .get(&state.path)
            .is_some_and(|current| Arc::ptr_eq(current, state))
        {
            return;
        }
        live.remove(&state.path);

        match fs::remove_dir_all(&state.path) {
            Ok(()) => debug!(block = %state.block_ref, path = %state.path.display(), "removed block directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                block = %state.block_ref,
                path = %state.path.display(),
                error = %e,
                "failed to remove block directory"
            ),
        }
    }
}

impl fmt::Debug for DirectoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryRegistry")
            .field("live", &self.live_directories())
            .finish()
    }
}

/// Counted handle on an extracted block directory
pub struct BlockDirectory {
    state: Arc<DirectoryState>,
    registry: DirectoryRegistry,
}

impl BlockDirectory {
    pub fn block_ref(&self) -> &BlockRef {
        &self.state.block_ref
    }

    pub fn bounds(&self) -> FingerprintBounds {
        self.state.block_ref.bounds
    }

    pub fn path(&self) -> &Path {
        &self.state.path
    }

    /// Current number of handles on this directory
    pub fn ref_count(&self) -> usize {
        self.state.refs.load(Ordering::Acquire)
    }

    /// Read view over the extracted block
    pub fn querier(&self) -> BlockQuerier<'_> {
        BlockQuerier { dir: self }
    }

    /// Release this handle. Equivalent to dropping it.
    pub fn close(self) {
        drop(self)
    }
}

impl Clone for BlockDirectory {
    fn clone(&self) -> Self {
        self.state.refs.fetch_add(1, Ordering::AcqRel);
        BlockDirectory {
            state: self.state.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl Drop for BlockDirectory {
    fn drop(&mut self) {
        self.registry.release(&self.state);
    }
}

impl fmt::Debug for BlockDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockDirectory")
            .field("block_ref", &self.state.block_ref)
            .field("path", &self.state.path)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Reads the files of an extracted block
#[derive(Debug, Clone, Copy)]
pub struct BlockQuerier<'a> {
    dir: &'a BlockDirectory,
}

impl BlockQuerier<'_> {
    pub fn block_ref(&self) -> &BlockRef {
        self.dir.block_ref()
    }

    /// Relative paths of all files in the block, `/`-separated and sorted
    pub fn entries(&self) -> io::Result<Vec<String>> {
        fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    walk(root, &path, out)?;
                } else if let Ok(relative) = path.strip_prefix(root) {
                    out.push(
                        relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/"),
                    );
                }
            }
            Ok(())
        }

        let mut out = Vec::new();
        walk(self.dir.path(), self.dir.path(), &mut out)?;
        out.sort();
        Ok(out)
    }

    /// Contents of one file of the block
    pub fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.dir.path().join(name))
    }
}
