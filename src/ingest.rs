
//! Streaming FASTA ingest into the count table.

use std::path::Path;

use anyhow::{Context, Result};
use needletail::parse_fastx_file;

use crate::count_table::{CountTable, KeyBounds};
use crate::progress::ProgressReporter;
use crate::readmask::ReadMask;

#[derive(Clone, Copy, Debug, Default)]
pub struct IngestStats {
    /// Reads seen in the file, masked ones included.
    pub total_reads: u64,
    /// K-mers counted into the table.
    pub n_consumed: u64,
}

/// Count every k-mer of every unmasked, valid read of `infile`.
///
/// Invalid reads (shorter than k, or containing a non-ACGT base) never touch
/// the table; with `update_mask` their bits are cleared in `readmask`, or
/// collected into a fresh mask returned alongside the stats when no mask was
/// supplied. The callback fires every `callback_period` reads and may abort
/// the pass by returning an error; counts made so far stay in the table.
pub fn consume_fasta(
    table: &CountTable,
    infile: &Path,
    bounds: KeyBounds,
    mut readmask: Option<&mut ReadMask>,
    update_mask: bool,
    reporter: &mut ProgressReporter,
) -> Result<(IngestStats, Option<ReadMask>)> {
    let mut reader = parse_fastx_file(infile)
        .with_context(|| format!("failed to open reads file {}", infile.display()))?;

    let mut stats = IngestStats::default();
    let mut invalid_reads: Vec<u64> = Vec::new();

    while let Some(record) = reader.next() {
        let record = record?;
        let seq = record.seq();
        let read_num = stats.total_reads;

        if readmask.as_ref().is_none_or(|mask| mask.get(read_num as usize)) {
            if table.check_read(&seq) {
                stats.n_consumed += table.increment_sequence(&seq, bounds);
            } else if update_mask {
                match readmask.as_deref_mut() {
                    Some(mask) => mask.set(read_num as usize, false),
                    None => invalid_reads.push(read_num),
                }
            }
        }

        stats.total_reads += 1;
        reporter.tick("consume", stats.total_reads, stats.n_consumed)?;
    }

    // a post-hoc mask when an update was requested but none was supplied
    let new_mask = if update_mask && readmask.is_none() {
        let mut mask = ReadMask::new(stats.total_reads as usize);
        for &read_num in &invalid_reads {
            mask.set(read_num as usize, false);
        }
        Some(mask)
    } else {
        None
    };

    Ok((stats, new_mask))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressFn;
    use std::fs::File;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn write_fasta(dir: &TempDir, reads: &[&str]) -> std::path::PathBuf {
        let path = dir.path().join("reads.fa");
        let mut f = File::create(&path).unwrap();
        for (i, read) in reads.iter().enumerate() {
            writeln!(f, ">read{i}\n{read}").unwrap();
        }
        path
    }

    #[test]
    fn test_counts_and_stats() {
        let dir = TempDir::new().unwrap();
        let path = write_fasta(&dir, &["AAAACCCCGGGGTTTT", "ACGTACGT"]);

        let table = CountTable::new(4, 1_000_000);
        let (stats, new_mask) = consume_fasta(
            &table,
            &path,
            KeyBounds::INACTIVE,
            None,
            false,
            &mut ProgressReporter::silent(),
        )
        .unwrap();

        assert_eq!(stats.total_reads, 2);
        assert_eq!(stats.n_consumed, 13 + 5);
        assert!(new_mask.is_none());
        assert_eq!(table.get_count_by_sequence(b"AAAA"), Some(1));
    }

    #[test]
    fn test_invalid_read_masked_out_post_hoc() {
        let dir = TempDir::new().unwrap();
        let path = write_fasta(&dir, &["ACGTACGT", "ACGTNCGT", "ACG"]);

        let table = CountTable::new(4, 1_000_000);
        let (stats, new_mask) = consume_fasta(
            &table,
            &path,
            KeyBounds::INACTIVE,
            None,
            true,
            &mut ProgressReporter::silent(),
        )
        .unwrap();

        assert_eq!(stats.total_reads, 3);
        let mask = new_mask.unwrap();
        assert_eq!(mask.len(), 3);
        assert!(mask.get(0));
        assert!(!mask.get(1));
        assert!(!mask.get(2));
    }

    #[test]
    fn test_supplied_mask_skips_and_updates() {
        let dir = TempDir::new().unwrap();
        let path = write_fasta(&dir, &["AAAAAAAA", "CCCCCCCC", "GGNGGGGG"]);

        let table = CountTable::new(4, 1_000_000);
        let mut mask = ReadMask::new(3);
        mask.set(0, false); // pre-masked: must not be counted

        let (stats, new_mask) = consume_fasta(
            &table,
            &path,
            KeyBounds::INACTIVE,
            Some(&mut mask),
            true,
            &mut ProgressReporter::silent(),
        )
        .unwrap();

        assert!(new_mask.is_none());
        assert_eq!(stats.total_reads, 3);
        assert_eq!(table.get_count_by_sequence(b"AAAA"), Some(0));
        assert_eq!(table.get_count_by_sequence(b"CCCC"), Some(5));
        // the invalid read's bit was cleared in place
        assert!(!mask.get(2));
    }

    #[test]
    fn test_callback_abort_propagates() {
        let dir = TempDir::new().unwrap();
        let reads: Vec<String> = (0..25).map(|_| "ACGTACGT".to_string()).collect();
        let read_refs: Vec<&str> = reads.iter().map(String::as_str).collect();
        let path = write_fasta(&dir, &read_refs);

        let table = CountTable::new(4, 1_000_000);
        let mut calls = 0u32;
        let mut callback = |_: &'static str, _: u64, _: u64| -> Result<()> {
            calls += 1;
            anyhow::bail!("enough")
        };
        let mut reporter = ProgressReporter::new(10, Some(&mut callback as &mut ProgressFn));

        let err = consume_fasta(
            &table,
            &path,
            KeyBounds::INACTIVE,
            None,
            false,
            &mut reporter,
        );
        assert!(err.is_err());
        drop(reporter);
        assert_eq!(calls, 1);
        // counts made before the abort are kept: 10 reads got in, each
        // carrying ACGT at two positions
        assert_eq!(table.get_count_by_sequence(b"ACGT"), Some(20));
    }
}
