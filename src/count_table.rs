
//! Fixed-size table of saturating 8-bit k-mer counters.
//!
//! Counters are indexed by `canonical_key % tablesize`; distinct k-mers may
//! share a slot and their counts blend (this is an approximate, Bloom-style
//! counter, never an exact map). Writers serialize on one table-wide lock
//! for the whole of a sequence ingest; readers never lock and, the counters
//! being single bytes, never observe a torn value.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use rayon::prelude::*;

use crate::kmer::{KmerCodec, KmerPair};

pub const MAX_COUNT: u8 = u8::MAX;

/// Optional half-open canonical-key window; `lower == upper == 0` disables
/// filtering. Used to split one input across several tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyBounds {
    pub lower: u64,
    pub upper: u64,
}

impl KeyBounds {
    pub const INACTIVE: KeyBounds = KeyBounds { lower: 0, upper: 0 };

    #[inline]
    pub fn admits(self, key: u64) -> bool {
        (self.lower == 0 && self.upper == 0) || (key >= self.lower && key < self.upper)
    }
}

pub struct CountTable {
    codec: KmerCodec,
    counts: Vec<AtomicU8>,
    write_lock: Mutex<()>,
}

impl CountTable {
    /// Inputs are range-checked by `Tunables::validate` before this runs.
    pub fn new(k: usize, tablesize: usize) -> Self {
        assert!(tablesize > 0, "tablesize must be positive");

        let mut counts = Vec::with_capacity(tablesize);
        counts.resize_with(tablesize, AtomicU8::default);

        CountTable {
            codec: KmerCodec::new(k),
            counts,
            write_lock: Mutex::new(()),
        }
    }

    pub fn k(&self) -> usize {
        self.codec.k()
    }

    pub fn tablesize(&self) -> usize {
        self.counts.len()
    }

    pub fn codec(&self) -> KmerCodec {
        self.codec
    }

    pub fn check_read(&self, seq: &[u8]) -> bool {
        self.codec.check_read(seq)
    }

    #[inline]
    fn slot(&self, key: u64) -> &AtomicU8 {
        &self.counts[(key % self.counts.len() as u64) as usize]
    }

    // Only ever called with the write lock held, so plain load/store is
    // enough; concurrent readers see either the old or the new byte.
    #[inline]
    fn bump(&self, key: u64) {
        let slot = self.slot(key);
        let count = slot.load(Ordering::Relaxed);
        if count != MAX_COUNT {
            slot.store(count + 1, Ordering::Relaxed);
        }
    }

    /// Count every k-mer of `seq` whose canonical key passes `bounds`.
    /// Returns the number of k-mers counted (saturated slots included).
    pub fn increment_sequence(&self, seq: &[u8], bounds: KeyBounds) -> u64 {
        // recover rather than poison-propagate so the lock is released on
        // every exit path
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut n_counted = 0;
        for pair in self.codec.windows(seq) {
            let key = pair.canonical();
            if bounds.admits(key) {
                self.bump(key);
                n_counted += 1;
            }
        }

        n_counted
    }

    #[inline]
    pub fn get_count_by_key(&self, key: u64) -> u8 {
        self.slot(key).load(Ordering::Relaxed)
    }

    #[inline]
    pub fn get_count_by_pair(&self, pair: KmerPair) -> u8 {
        self.get_count_by_key(pair.canonical())
    }

    /// Count of a single k-mer given as a string; `None` if it is not a
    /// clean length-k ACGT window.
    pub fn get_count_by_sequence(&self, kmer: &[u8]) -> Option<u8> {
        if kmer.len() != self.k() {
            return None;
        }
        Some(self.get_count_by_pair(self.codec.init(kmer)?))
    }

    /// Minimum counter over the k-mers of `seq`. Empty, short, or invalid
    /// input folds to `MAX_COUNT`.
    pub fn min_count_over(&self, seq: &[u8], bounds: KeyBounds) -> u8 {
        let mut min_count = MAX_COUNT;
        for pair in self.codec.windows(seq) {
            let key = pair.canonical();
            if bounds.admits(key) {
                min_count = min_count.min(self.get_count_by_key(key));
            }
        }
        min_count
    }

    /// Maximum counter over the k-mers of `seq`. Empty, short, or invalid
    /// input folds to 0.
    pub fn max_count_over(&self, seq: &[u8], bounds: KeyBounds) -> u8 {
        let mut max_count = 0;
        for pair in self.codec.windows(seq) {
            let key = pair.canonical();
            if bounds.admits(key) {
                max_count = max_count.max(self.get_count_by_key(key));
            }
        }
        max_count
    }

    /// Histogram of counter values across the whole table.
    pub fn abundance_distribution(&self) -> [u64; 256] {
        self.counts
            .par_chunks(64 * 1024)
            .map(|chunk| {
                let mut hist = [0u64; 256];
                for slot in chunk {
                    hist[slot.load(Ordering::Relaxed) as usize] += 1;
                }
                hist
            })
            .reduce(
                || [0u64; 256],
                |mut acc, hist| {
                    for (a, h) in acc.iter_mut().zip(hist.iter()) {
                        *a += h;
                    }
                    acc
                },
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_window_counted() {
        let table = CountTable::new(4, 1_000_000);
        let seq = b"AAAACCCCGGGGTTTT";

        assert_eq!(table.increment_sequence(seq, KeyBounds::INACTIVE), 13);
        for i in 0..13 {
            assert_eq!(table.get_count_by_sequence(&seq[i..i + 4]), Some(1));
        }

        assert_eq!(table.increment_sequence(seq, KeyBounds::INACTIVE), 13);
        for i in 0..13 {
            assert_eq!(table.get_count_by_sequence(&seq[i..i + 4]), Some(2));
        }
    }

    #[test]
    fn test_reverse_complement_shares_counter() {
        let table = CountTable::new(4, 1_000_000);

        table.increment_sequence(b"AAAA", KeyBounds::INACTIVE);
        table.increment_sequence(b"TTTT", KeyBounds::INACTIVE);

        assert_eq!(table.get_count_by_sequence(b"AAAA"), Some(2));
        assert_eq!(table.get_count_by_sequence(b"TTTT"), Some(2));
    }

    #[test]
    fn test_tablesize_one_collides_everything() {
        let table = CountTable::new(4, 1);
        let n = table.increment_sequence(b"ACGTACGTAC", KeyBounds::INACTIVE);
        assert_eq!(n, 7);
        // every key lands in the single slot
        assert_eq!(table.get_count_by_sequence(b"ACGT"), Some(7));
        assert_eq!(table.get_count_by_key(12345), 7);
    }

    #[test]
    fn test_counter_saturates() {
        let table = CountTable::new(4, 64);
        for _ in 0..300 {
            table.increment_sequence(b"ACCA", KeyBounds::INACTIVE);
        }
        assert_eq!(table.get_count_by_sequence(b"ACCA"), Some(MAX_COUNT));
    }

    #[test]
    fn test_bounds_filter_increments() {
        let codec = KmerCodec::new(4);
        let key = codec.init(b"ACCA").unwrap().canonical();

        // a window admitting only this key
        let bounds = KeyBounds {
            lower: key,
            upper: key + 1,
        };

        let table = CountTable::new(4, 1024);
        let n = table.increment_sequence(b"ACCATTTT", bounds);
        assert_eq!(n, 1);
        assert_eq!(table.get_count_by_sequence(b"ACCA"), Some(1));
        assert_eq!(table.get_count_by_sequence(b"TTTT"), Some(0));
    }

    #[test]
    fn test_min_max_folds() {
        let table = CountTable::new(4, 1_000_000);
        table.increment_sequence(b"AAAAC", KeyBounds::INACTIVE);
        table.increment_sequence(b"AAAA", KeyBounds::INACTIVE);

        // AAAA counted twice, AAAC once
        assert_eq!(table.min_count_over(b"AAAAC", KeyBounds::INACTIVE), 1);
        assert_eq!(table.max_count_over(b"AAAAC", KeyBounds::INACTIVE), 2);

        // degenerate inputs
        assert_eq!(table.min_count_over(b"AC", KeyBounds::INACTIVE), MAX_COUNT);
        assert_eq!(table.max_count_over(b"AC", KeyBounds::INACTIVE), 0);
        assert_eq!(table.min_count_over(b"", KeyBounds::INACTIVE), MAX_COUNT);
    }

    #[test]
    fn test_invalid_read_leaves_counts_unchanged() {
        let table = CountTable::new(4, 1024);
        assert!(!table.check_read(b"ACGTNACGT"));

        // ingest stops at the N; the prefix windows are still counted when
        // called directly, which is why callers gate on check_read
        let n = table.increment_sequence(b"ACGN", KeyBounds::INACTIVE);
        assert_eq!(n, 0);
        assert_eq!(table.abundance_distribution()[0], 1024);
    }

    #[test]
    fn test_abundance_distribution() {
        let table = CountTable::new(4, 4096);
        table.increment_sequence(b"AAAAA", KeyBounds::INACTIVE);

        let dist = table.abundance_distribution();
        // AAAA twice in one slot, none elsewhere
        assert_eq!(dist[2], 1);
        assert_eq!(dist[0], 4095);
        assert_eq!(dist.iter().sum::<u64>(), 4096);
    }
}
