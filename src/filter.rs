
//! Per-read abundance filters.
//!
//! All of these decide which reads to keep from what the count table says
//! about their k-mers: a read passes when at least one k-mer is abundant
//! (`filter_any`), when all are (`filter_all`), when at least `min_hits`
//! are (`filter_limit_n`), or when `run_length` consecutive k-mers are
//! (`filter_run`). The result is always a fresh [`ReadMask`] with any old
//! mask ANDed in, so filters chain.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use needletail::parse_fastx_file;

use crate::count_table::{CountTable, KeyBounds};
use crate::io_utils::write_fasta_record;
use crate::minmax::MinMaxTable;
use crate::progress::ProgressReporter;
use crate::readmask::ReadMask;

/// Record the min and max k-mer count of every unmasked valid read.
/// Invalid or masked reads keep their zero entries.
pub fn fasta_to_minmax(
    table: &CountTable,
    infile: &Path,
    total_reads: u64,
    readmask: Option<&ReadMask>,
    reporter: &mut ProgressReporter,
) -> Result<MinMaxTable> {
    let mut reader = parse_fastx_file(infile)
        .with_context(|| format!("failed to open reads file {}", infile.display()))?;

    let mut minmax = MinMaxTable::new(total_reads as usize);
    let mut read_num = 0u64;

    while let Some(record) = reader.next() {
        let record = record?;
        let seq = record.seq();

        if readmask.is_none_or(|mask| mask.get(read_num as usize)) && table.check_read(&seq) {
            minmax.add_min(
                read_num as usize,
                table.min_count_over(&seq, KeyBounds::INACTIVE),
            );
            minmax.add_max(
                read_num as usize,
                table.max_count_over(&seq, KeyBounds::INACTIVE),
            );
        }

        read_num += 1;
        reporter.tick("minmax", read_num, 0)?;
    }

    Ok(minmax)
}

/// Keep reads whose *maximum* k-mer count reaches `threshold`.
pub fn filter_any(
    minmax: &MinMaxTable,
    threshold: u8,
    old_mask: Option<&ReadMask>,
    reporter: &mut ProgressReporter,
) -> Result<ReadMask> {
    filter_minmax(minmax, old_mask, reporter, |mm, i| mm.get_max(i) >= threshold)
}

/// Keep reads whose *minimum* k-mer count reaches `threshold`.
pub fn filter_all(
    minmax: &MinMaxTable,
    threshold: u8,
    old_mask: Option<&ReadMask>,
    reporter: &mut ProgressReporter,
) -> Result<ReadMask> {
    filter_minmax(minmax, old_mask, reporter, |mm, i| mm.get_min(i) >= threshold)
}

fn filter_minmax(
    minmax: &MinMaxTable,
    old_mask: Option<&ReadMask>,
    reporter: &mut ProgressReporter,
    keep: impl Fn(&MinMaxTable, usize) -> bool,
) -> Result<ReadMask> {
    let mut mask = ReadMask::new(minmax.len());
    if let Some(old) = old_mask {
        mask.merge(old);
    }

    let mut n_kept = mask.n_kept() as u64;
    for read_num in 0..minmax.len() {
        if mask.get(read_num) && !keep(minmax, read_num) {
            mask.set(read_num, false);
            n_kept -= 1;
        }
        reporter.tick("filter", read_num as u64 + 1, n_kept)?;
    }

    Ok(mask)
}

/// Keep reads with at least `min_hits` k-mers of count >= `threshold`.
pub fn filter_limit_n(
    table: &CountTable,
    infile: &Path,
    total_reads: u64,
    threshold: u8,
    min_hits: u32,
    old_mask: Option<&ReadMask>,
    reporter: &mut ProgressReporter,
) -> Result<ReadMask> {
    filter_by_read(table, infile, total_reads, old_mask, reporter, |table, seq| {
        let mut n_met = 0u32;
        for pair in table.codec().windows(seq) {
            if table.get_count_by_pair(pair) >= threshold {
                n_met += 1;
                if n_met >= min_hits {
                    return true;
                }
            }
        }
        false
    })
}

/// Keep reads with a run of at least `run_length` consecutive k-mers of
/// count >= `threshold`.
pub fn filter_run(
    table: &CountTable,
    infile: &Path,
    total_reads: u64,
    threshold: u8,
    run_length: u32,
    old_mask: Option<&ReadMask>,
    reporter: &mut ProgressReporter,
) -> Result<ReadMask> {
    filter_by_read(table, infile, total_reads, old_mask, reporter, |table, seq| {
        let mut this_run = 0u32;
        for pair in table.codec().windows(seq) {
            if table.get_count_by_pair(pair) >= threshold {
                this_run += 1;
                if this_run >= run_length {
                    return true;
                }
            } else {
                this_run = 0;
            }
        }
        false
    })
}

fn filter_by_read(
    table: &CountTable,
    infile: &Path,
    total_reads: u64,
    old_mask: Option<&ReadMask>,
    reporter: &mut ProgressReporter,
    keep: impl Fn(&CountTable, &[u8]) -> bool,
) -> Result<ReadMask> {
    let mut reader = parse_fastx_file(infile)
        .with_context(|| format!("failed to open reads file {}", infile.display()))?;

    let mut mask = ReadMask::new(total_reads as usize);
    if let Some(old) = old_mask {
        mask.merge(old);
    }

    let mut read_num = 0u64;
    let mut n_kept = 0u64;

    while let Some(record) = reader.next() {
        let record = record?;
        let seq = record.seq();

        if mask.get(read_num as usize) {
            if table.check_read(&seq) && keep(table, &seq) {
                n_kept += 1;
            } else {
                mask.set(read_num as usize, false);
            }
        }

        read_num += 1;
        reporter.tick("filter", read_num, n_kept)?;
    }

    Ok(mask)
}

/// Copy the reads whose mask bit survives to `outfile`; returns kept count.
pub fn output_filtered_fasta(
    infile: &Path,
    outfile: &Path,
    mask: &ReadMask,
    reporter: &mut ProgressReporter,
) -> Result<u64> {
    let mut reader = parse_fastx_file(infile)
        .with_context(|| format!("failed to open reads file {}", infile.display()))?;
    let mut out = BufWriter::new(
        File::create(outfile)
            .with_context(|| format!("failed to create output file {}", outfile.display()))?,
    );

    let mut read_num = 0u64;
    let mut n_kept = 0u64;

    while let Some(record) = reader.next() {
        let record = record?;

        if mask.get(read_num as usize) {
            write_fasta_record(&mut out, record.id(), &record.seq())?;
            n_kept += 1;
        }

        read_num += 1;
        reporter.tick("output", read_num, n_kept)?;
    }

    Ok(n_kept)
}
