
//! Traversal of the implicit k-mer graph.
//!
//! A vertex exists wherever the count table holds a non-zero counter for a
//! canonical key; its neighbors are the eight single-base extensions (four
//! appended on the forward strand, four prepended). Components are walked
//! with an explicit stack — they routinely outgrow any call stack — and a
//! seen-set keyed by canonical keys.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use needletail::parse_fastx_file;
use rustc_hash::FxHashSet;

use crate::count_table::CountTable;
use crate::io_utils::write_fasta_record;
use crate::kmer::KmerPair;
use crate::progress::ProgressReporter;
use crate::readmask::ReadMask;

pub type SeenSet = FxHashSet<u64>;

/// Size of the connected component containing `start`, skipping anything
/// already in `seen` and marking everything newly visited.
///
/// With `threshold > 0` the walk returns as soon as the running count
/// reaches it; the result is then a lower bound, not an exact size. A start
/// vertex with a zero counter contributes nothing.
pub fn connected_component_size(
    table: &CountTable,
    start: KmerPair,
    seen: &mut SeenSet,
    threshold: u64,
) -> u64 {
    let codec = table.codec();
    let mut count = 0;
    let mut stack = vec![start];

    while let Some(pair) = stack.pop() {
        let key = pair.canonical();
        if table.get_count_by_key(key) == 0 {
            continue;
        }
        if !seen.insert(key) {
            continue;
        }
        count += 1;

        if threshold > 0 && count >= threshold {
            return count;
        }

        // pushed in reverse so pops run forward-A..T then backward-A..T
        for bits in (0..4u8).rev() {
            stack.push(codec.extend_left(pair, bits));
        }
        for bits in (0..4u8).rev() {
            stack.push(codec.extend_right(pair, bits));
        }
    }

    count
}

/// Copy reads whose first k-mer sits in a component of at least `min_size`
/// vertices; everything else is dropped. Returns (total, kept).
pub fn trim_small_components(
    table: &CountTable,
    infile: &Path,
    outfile: &Path,
    min_size: u64,
    reporter: &mut ProgressReporter,
) -> Result<(u64, u64)> {
    let mut reader = parse_fastx_file(infile)
        .with_context(|| format!("failed to open reads file {}", infile.display()))?;
    let mut out = BufWriter::new(
        File::create(outfile)
            .with_context(|| format!("failed to create output file {}", outfile.display()))?,
    );

    let mut total_reads = 0u64;
    let mut reads_kept = 0u64;

    while let Some(record) = reader.next() {
        let record = record?;
        let seq = record.seq();

        if table.check_read(&seq) {
            if let Some(first) = table.codec().init(&seq) {
                let mut seen = SeenSet::default();
                let size = connected_component_size(table, first, &mut seen, min_size);

                if size >= min_size {
                    write_fasta_record(&mut out, record.id(), &seq)?;
                    reads_kept += 1;
                }
            }
        }

        total_reads += 1;
        reporter.tick("trim", total_reads, reads_kept)?;
    }

    Ok((total_reads, reads_kept))
}

/// Mask keeping only reads whose first k-mer lies in the component of the
/// seed sequence's first k-mer.
pub fn filter_connected(
    table: &CountTable,
    seed: &[u8],
    infile: &Path,
    total_reads: u64,
    reporter: &mut ProgressReporter,
) -> Result<ReadMask> {
    let mut seen = SeenSet::default();
    if let Some(first) = table.codec().init(seed) {
        connected_component_size(table, first, &mut seen, 0);
    }

    let mut reader = parse_fastx_file(infile)
        .with_context(|| format!("failed to open reads file {}", infile.display()))?;
    let mut mask = ReadMask::new(total_reads as usize);
    let mut read_num = 0u64;
    let mut n_kept = 0u64;

    while let Some(record) = reader.next() {
        let record = record?;
        let seq = record.seq();

        let keep = table
            .codec()
            .init(&seq)
            .is_some_and(|first| seen.contains(&first.canonical()));
        if keep {
            n_kept += 1;
        } else {
            mask.set(read_num as usize, false);
        }

        read_num += 1;
        reporter.tick("filter_connected", read_num, n_kept)?;
    }

    Ok(mask)
}
