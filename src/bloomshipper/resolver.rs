//! Key Resolution
//!
//! Maps refs to content-addressed locations. The remote layout is the
//! contract between compactors (writers) and the query path (readers):
//!
//! ```text
//! bloom/metas/<tenant>/<table>/<min>-<max>-<start>-<end>-<checksum>
//! bloom/blooms/<tenant>/<table>/<min>-<max>-<start>-<end>-<checksum>
//! ```
//!
//! All numeric fields are fixed-width lowercase hex so that a prefix listing
//! returns keys in a stable order. Timestamps are written as their two's
//! complement bits, so key order only follows time order for timestamps at
//! or after the epoch. Negative timestamps are rejected in debug builds.

use crate::bloomshipper::model::{FingerprintBounds, Time};
use crate::bloomshipper::refs::{BlockRef, MetaRef, Ref};
use std::fmt;
use std::path::{Path, PathBuf};

pub const ROOT_FOLDER: &str = "bloom";
pub const METAS_FOLDER: &str = "metas";
pub const BLOOMS_FOLDER: &str = "blooms";
pub const DELIMITER: &str = "/";
pub const FILE_NAME_PART_DELIMITER: &str = "-";

/// Number of `/`-separated components in a full key
const KEY_COMPONENTS: usize = 5;
/// Number of `-`-separated fields in a file name
const FILE_NAME_PARTS: usize = 5;

/// Error parsing a storage key back into a ref
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyError {
    pub key: String,
    pub reason: String,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid key {}: {}", self.key, self.reason)
    }
}

impl std::error::Error for KeyError {}

/// Where an artifact lives remotely and where it is staged locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Object store key
    pub addr: String,
    /// Local filesystem path
    pub local_path: PathBuf,
}

impl Location {
    fn from_parts(parts: &[&str]) -> Self {
        Location {
            addr: parts.join(DELIMITER),
            local_path: parts.iter().collect(),
        }
    }
}

/// Maps refs to storage locations
pub trait KeyResolver: Send + Sync {
    fn meta(&self, r: &MetaRef) -> Location;
    fn block(&self, r: &BlockRef) -> Location;
}

/// Canonical remote layout
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyResolver;

impl DefaultKeyResolver {
    fn file_name(r: &Ref) -> String {
        debug_assert!(
            r.start_timestamp.0 >= 0,
            "ref start {} is negative and would sort after every epoch timestamp",
            r.start_timestamp
        );
        format!(
            "{}{sep}{:016x}{sep}{:016x}{sep}{:08x}",
            r.bounds,
            r.start_timestamp.0 as u64,
            r.end_timestamp.0 as u64,
            r.checksum,
            sep = FILE_NAME_PART_DELIMITER,
        )
    }

    fn location(folder: &str, r: &Ref) -> Location {
        let file_name = Self::file_name(r);
        Location::from_parts(&[
            ROOT_FOLDER,
            folder,
            &r.tenant_id,
            &r.table_name,
            &file_name,
        ])
    }

    /// Key prefix under which all metas of a tenant/table are stored
    pub fn meta_prefix(&self, tenant: &str, table: &str) -> String {
        [ROOT_FOLDER, METAS_FOLDER, tenant, table, ""].join(DELIMITER)
    }

    /// Rebuild a `MetaRef` from its storage key
    pub fn parse_meta_key(&self, key: &str) -> Result<MetaRef, KeyError> {
        let err = |reason: &str| KeyError {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        let components: Vec<&str> = key.split(DELIMITER).collect();
        if components.len() != KEY_COMPONENTS {
            return Err(err("wrong number of path components"));
        }
        if components[0] != ROOT_FOLDER || components[1] != METAS_FOLDER {
            return Err(err("not a meta key"));
        }
        let (tenant, table, file_name) = (components[2], components[3], components[4]);
        if tenant.is_empty() || table.is_empty() {
            return Err(err("empty tenant or table"));
        }

        let parts: Vec<&str> = file_name.split(FILE_NAME_PART_DELIMITER).collect();
        if parts.len() != FILE_NAME_PARTS {
            return Err(err("wrong number of file name parts"));
        }
        let hex = |s: &str| u64::from_str_radix(s, 16).map_err(|e| err(&e.to_string()));

        let min = hex(parts[0])?;
        let max = hex(parts[1])?;
        let start = hex(parts[2])? as i64;
        let end = hex(parts[3])? as i64;
        let checksum = u32::from_str_radix(parts[4], 16).map_err(|e| err(&e.to_string()))?;

        if min > max {
            return Err(err("inverted fingerprint bounds"));
        }
        if end < start {
            return Err(err("inverted time range"));
        }

        Ok(MetaRef(Ref::new(
            tenant,
            table,
            FingerprintBounds::new(min, max),
            Time(start),
            Time(end),
            checksum,
        )))
    }
}

impl KeyResolver for DefaultKeyResolver {
    fn meta(&self, r: &MetaRef) -> Location {
        Self::location(METAS_FOLDER, r)
    }

    fn block(&self, r: &BlockRef) -> Location {
        Self::location(BLOOMS_FOLDER, r)
    }
}

/// Resolver that stages local paths under a working directory while
/// leaving remote keys untouched
#[derive(Debug, Clone)]
pub struct PrefixedResolver<R: KeyResolver> {
    prefix: PathBuf,
    inner: R,
}

impl<R: KeyResolver> PrefixedResolver<R> {
    pub fn new(prefix: impl Into<PathBuf>, inner: R) -> Self {
        PrefixedResolver {
            prefix: prefix.into(),
            inner,
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    fn prefixed(&self, loc: Location) -> Location {
        Location {
            addr: loc.addr,
            local_path: self.prefix.join(loc.local_path),
        }
    }
}

impl<R: KeyResolver> KeyResolver for PrefixedResolver<R> {
    fn meta(&self, r: &MetaRef) -> Location {
        self.prefixed(self.inner.meta(r))
    }

    fn block(&self, r: &BlockRef) -> Location {
        self.prefixed(self.inner.block(r))
    }
}
