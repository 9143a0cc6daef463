//! Value Types for Bloom Block Addressing
//!
//! Timestamps, half-open time intervals, closed fingerprint ranges and the
//! identifiers of the index files a meta was built from.

use crate::bloomshipper::checksum::Crc32c;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds in one day, the table period of the index.
pub const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Position of a value relative to a range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsCheck {
    Before,
    Overlap,
    After,
}

/// Point in time as milliseconds since the Unix epoch
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Time(pub i64);

impl Time {
    pub fn from_millis(ms: i64) -> Self {
        Time(ms)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Strictly earlier than `other`
    pub fn before(self, other: Time) -> bool {
        self.0 < other.0
    }

    /// Strictly later than `other`
    pub fn after(self, other: Time) -> bool {
        self.0 > other.0
    }

    /// Day number since the epoch (floor division)
    pub fn day(self) -> i64 {
        self.0.div_euclid(MILLIS_PER_DAY)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time range with an inclusive start and an exclusive end
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: Time,
    pub end: Time,
}

impl Interval {
    pub fn new(start: Time, end: Time) -> Self {
        debug_assert!(
            !end.before(start),
            "Invariant violated: interval end ({}) before start ({})",
            end,
            start
        );
        Interval { start, end }
    }

    /// Where `t` falls relative to `[start, end)`
    pub fn cmp(&self, t: Time) -> BoundsCheck {
        if t.before(self.start) {
            BoundsCheck::Before
        } else if !t.before(self.end) {
            BoundsCheck::After
        } else {
            BoundsCheck::Overlap
        }
    }

    /// True unless one interval lies strictly before the other
    pub fn overlaps(&self, target: Interval) -> bool {
        self.cmp(target.start) != BoundsCheck::After
            && self.cmp(target.end) != BoundsCheck::Before
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Closed range of stream fingerprints, `min` and `max` both inclusive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FingerprintBounds {
    #[serde(rename = "Min")]
    pub min: u64,
    #[serde(rename = "Max")]
    pub max: u64,
}

impl FingerprintBounds {
    pub fn new(min: u64, max: u64) -> Self {
        debug_assert!(
            min <= max,
            "Invariant violated: bounds min ({:x}) > max ({:x})",
            min,
            max
        );
        FingerprintBounds { min, max }
    }

    /// Where `fp` falls relative to the bounds
    pub fn cmp(&self, fp: u64) -> BoundsCheck {
        if fp < self.min {
            BoundsCheck::Before
        } else if fp > self.max {
            BoundsCheck::After
        } else {
            BoundsCheck::Overlap
        }
    }

    pub fn overlaps(&self, target: FingerprintBounds) -> bool {
        self.cmp(target.min) != BoundsCheck::After && self.cmp(target.max) != BoundsCheck::Before
    }

    /// Ordering used to sort blocks: by `min`, then by `max`
    pub fn less(&self, other: &FingerprintBounds) -> bool {
        if self.min != other.min {
            return self.min < other.min;
        }
        self.max <= other.max
    }

    pub fn hash(&self, hasher: &mut Crc32c) {
        hasher.update(&self.min.to_be_bytes());
        hasher.update(&self.max.to_be_bytes());
    }
}

impl fmt::Display for FingerprintBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}-{:016x}", self.min, self.max)
    }
}

/// Identifier of a single-tenant TSDB index file used as a compaction source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TsdbIdentifier {
    /// Creation time of the index file in Unix seconds
    #[serde(rename = "TS")]
    pub ts: i64,
    #[serde(rename = "From")]
    pub from: Time,
    #[serde(rename = "Through")]
    pub through: Time,
    #[serde(rename = "Checksum")]
    pub checksum: u32,
}

impl TsdbIdentifier {
    pub fn name(&self) -> String {
        format!(
            "{}-{}-{}-{:x}.tsdb",
            self.ts, self.from, self.through, self.checksum
        )
    }

    pub fn hash(&self, hasher: &mut Crc32c) {
        hasher.update(self.name().as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(start: i64, end: i64) -> Interval {
        Interval::new(Time(start), Time(end))
    }

    #[test]
    fn test_interval_cmp_is_half_open() {
        let i = interval(10, 20);
        assert_eq!(i.cmp(Time(9)), BoundsCheck::Before);
        assert_eq!(i.cmp(Time(10)), BoundsCheck::Overlap);
        assert_eq!(i.cmp(Time(19)), BoundsCheck::Overlap);
        assert_eq!(i.cmp(Time(20)), BoundsCheck::After);
    }

    #[test]
    fn test_interval_overlaps() {
        let query = interval(10, 30);
        assert!(query.overlaps(interval(0, 10)));
        assert!(query.overlaps(interval(15, 25)));
        assert!(query.overlaps(interval(0, 100)));
        assert!(!query.overlaps(interval(0, 5)));
        assert!(!query.overlaps(interval(30, 40)));
    }

    #[test]
    fn test_bounds_cmp_and_overlap() {
        let b = FingerprintBounds::new(100, 200);
        assert_eq!(b.cmp(99), BoundsCheck::Before);
        assert_eq!(b.cmp(100), BoundsCheck::Overlap);
        assert_eq!(b.cmp(200), BoundsCheck::Overlap);
        assert_eq!(b.cmp(201), BoundsCheck::After);

        assert!(b.overlaps(FingerprintBounds::new(200, 300)));
        assert!(b.overlaps(FingerprintBounds::new(0, 100)));
        assert!(b.overlaps(FingerprintBounds::new(0, u64::MAX)));
        assert!(!b.overlaps(FingerprintBounds::new(201, 300)));
        assert!(!b.overlaps(FingerprintBounds::new(0, 99)));
    }

    #[test]
    fn test_bounds_less() {
        let a = FingerprintBounds::new(0, 50);
        let b = FingerprintBounds::new(0, 100);
        let c = FingerprintBounds::new(10, 20);
        assert!(a.less(&b));
        assert!(!b.less(&a));
        assert!(b.less(&c));
    }

    #[test]
    fn test_bounds_display() {
        let b = FingerprintBounds::new(0xab, 0xffff);
        assert_eq!(b.to_string(), "00000000000000ab-000000000000ffff");
    }

    #[test]
    fn test_time_day() {
        assert_eq!(Time(0).day(), 0);
        assert_eq!(Time(MILLIS_PER_DAY - 1).day(), 0);
        assert_eq!(Time(MILLIS_PER_DAY).day(), 1);
    }

    #[test]
    fn test_tsdb_identifier_name() {
        let id = TsdbIdentifier {
            ts: 1700000000,
            from: Time(1000),
            through: Time(2000),
            checksum: 0xbeef,
        };
        assert_eq!(id.name(), "1700000000-1000-2000-beef.tsdb");
    }
}
