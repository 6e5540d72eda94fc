
//! Reporting utilities over the count table: the abundance histogram,
//! per-position k-mer count totals, and dumping k-mers at a target
//! abundance. All simple consumers of the count query API.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use needletail::parse_fastx_file;

use crate::count_table::CountTable;
use crate::progress::ProgressReporter;
use crate::readmask::ReadMask;

/// Write the abundance histogram as TSV: `abundance\tn_slots`.
pub fn write_abundance_distribution(table: &CountTable, outfile: &Path) -> Result<()> {
    let mut out = BufWriter::new(
        File::create(outfile)
            .with_context(|| format!("failed to create output file {}", outfile.display()))?,
    );

    writeln!(out, "abundance\tn_slots")?;
    for (abundance, n_slots) in table.abundance_distribution().iter().enumerate() {
        writeln!(out, "{abundance}\t{n_slots}")?;
    }

    Ok(())
}

/// Tally, for each read offset, how many k-mers starting there have been
/// seen — restricted to k-mers of count exactly `limit_count` when it is
/// non-zero. Offsets at or past `max_read_len` are dropped.
pub fn counts_by_position(
    table: &CountTable,
    infile: &Path,
    max_read_len: usize,
    limit_count: u8,
    readmask: Option<&ReadMask>,
    reporter: &mut ProgressReporter,
) -> Result<Vec<u64>> {
    let mut reader = parse_fastx_file(infile)
        .with_context(|| format!("failed to open reads file {}", infile.display()))?;

    let mut totals = vec![0u64; max_read_len];
    let mut read_num = 0u64;

    while let Some(record) = reader.next() {
        let record = record?;
        let seq = record.seq();

        if readmask.is_none_or(|mask| mask.get(read_num as usize)) && table.check_read(&seq) {
            for (pos, pair) in table.codec().windows(&seq).enumerate() {
                if pos >= max_read_len {
                    break;
                }
                let count = table.get_count_by_pair(pair);
                if limit_count == 0 || count == limit_count {
                    totals[pos] += 1;
                }
            }
        }

        read_num += 1;
        reporter.tick("posfreq", read_num, 0)?;
    }

    Ok(totals)
}

/// Write per-position totals as TSV: `position\tn_kmers`.
pub fn write_counts_by_position(totals: &[u64], outfile: &Path) -> Result<()> {
    let mut out = BufWriter::new(
        File::create(outfile)
            .with_context(|| format!("failed to create output file {}", outfile.display()))?,
    );

    writeln!(out, "position\tn_kmers")?;
    for (pos, n_kmers) in totals.iter().enumerate() {
        writeln!(out, "{pos}\t{n_kmers}")?;
    }

    Ok(())
}

/// Print every k-mer occurrence (as read, forward strand) whose counter
/// equals `abundance`. Returns the number of lines written.
pub fn dump_kmers_by_abundance(
    table: &CountTable,
    infile: &Path,
    abundance: u8,
    readmask: Option<&ReadMask>,
    out: &mut dyn Write,
    reporter: &mut ProgressReporter,
) -> Result<u64> {
    let mut reader = parse_fastx_file(infile)
        .with_context(|| format!("failed to open reads file {}", infile.display()))?;

    let codec = table.codec();
    let mut read_num = 0u64;
    let mut n_dumped = 0u64;

    while let Some(record) = reader.next() {
        let record = record?;
        let seq = record.seq();

        if readmask.is_none_or(|mask| mask.get(read_num as usize)) && table.check_read(&seq) {
            for pair in codec.windows(&seq) {
                if table.get_count_by_pair(pair) == abundance {
                    writeln!(out, "{}", codec.decode(pair.fwd))?;
                    n_dumped += 1;
                }
            }
        }

        read_num += 1;
        reporter.tick("dump", read_num, n_dumped)?;
    }

    Ok(n_dumped)
}
