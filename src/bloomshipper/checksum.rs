//! CRC32-C Hasher Pool
//!
//! Refs and metas are checksummed with a running CRC32 over the Castagnoli
//! polynomial, matching the checksums other bloom readers and writers put
//! into keys. Hashers are handed out from a pool owned by the caller
//! (typically the client) instead of a process-wide singleton. A guard
//! resets the hasher on acquire and puts it back on drop.

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};

/// Upper bound on idle hashers retained by a pool
const POOL_IDLE_MAX: usize = 64;

/// Reflected Castagnoli polynomial
const CASTAGNOLI: u32 = 0x82F6_3B78;

const TABLE: [u32; 256] = make_table();

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ CASTAGNOLI;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
}

/// Running CRC32-C
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc32c {
    state: u32,
}

impl Default for Crc32c {
    fn default() -> Self {
        Self { state: !0 }
    }
}

impl Crc32c {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        let mut crc = self.state;
        for &byte in data {
            crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xff) as usize];
        }
        self.state = crc;
    }

    pub fn reset(&mut self) {
        self.state = !0;
    }

    pub fn finalize(&self) -> u32 {
        !self.state
    }
}

/// One-shot CRC32-C of `data`
pub fn crc32c(data: &[u8]) -> u32 {
    let mut hasher = Crc32c::new();
    hasher.update(data);
    hasher.finalize()
}

/// Pool of reusable `Crc32c` hashers
#[derive(Debug, Default)]
pub struct HasherPool {
    idle: Mutex<Vec<Crc32c>>,
}

impl HasherPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a hasher with a fresh (empty) state
    pub fn acquire(&self) -> PooledHasher<'_> {
        let mut hasher = self.idle.lock().pop().unwrap_or_default();
        hasher.reset();
        PooledHasher { pool: self, hasher }
    }

    /// Number of idle hashers (for testing)
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, hasher: Crc32c) {
        let mut idle = self.idle.lock();
        if idle.len() < POOL_IDLE_MAX {
            idle.push(hasher);
        }
    }
}

/// Scoped hasher borrowed from a `HasherPool`
pub struct PooledHasher<'a> {
    pool: &'a HasherPool,
    hasher: Crc32c,
}

impl PooledHasher<'_> {
    /// Current checksum without consuming the hasher
    pub fn sum32(&self) -> u32 {
        self.hasher.finalize()
    }
}

impl Deref for PooledHasher<'_> {
    type Target = Crc32c;

    fn deref(&self) -> &Self::Target {
        &self.hasher
    }
}

impl DerefMut for PooledHasher<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.hasher
    }
}

impl Drop for PooledHasher<'_> {
    fn drop(&mut self) {
        self.pool.release(self.hasher);
    }
}
