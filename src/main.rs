
//! Main entry point for the graphmer application.
//!
//! This file handles command-line parsing, logging setup, and orchestration
//! of the individual commands: k-mer abundance counting, per-read abundance
//! filtering, small-component trimming, graph partitioning of reads, and
//! the per-position / per-abundance reporting passes. Results are written
//! to files in the specified output directory.

use std::env;
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::ProgressBar;
use log::info;

use crate::cli::{Cli, Commands, FilterMode};
use crate::config::Tunables;
use crate::count_table::{CountTable, KeyBounds};
use crate::io_utils::read_stem;
use crate::logging::setup_logger;
use crate::partition::Partitioner;
use crate::progress::{progress_bar, read_spinner, ProgressFn, ProgressReporter};

mod cli;
pub mod checkpoint;
pub mod config;
pub mod count_table;
pub mod filter;
pub mod graph;
pub mod ingest;
pub mod io_utils;
pub mod kmer;
pub mod logging;
pub mod minmax;
pub mod partition;
pub mod progress;
pub mod readmask;
pub mod report;

/// Common initialization required by all commands.
fn init(threads: usize) -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    info!("{} v{}", env!("CARGO_PKG_NAME"), VERSION);
    info!("{}", env::args().collect::<Vec<String>>().join(" "));

    info!("Using {} threads.", threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()?;

    Ok(())
}

fn new_table(tunables: &Tunables) -> CountTable {
    let table = CountTable::new(tunables.k, tunables.tablesize);
    info!(
        "Allocated count table: k = {}, {} slots.",
        table.k(),
        table.tablesize()
    );
    table
}

/// Drive a spinner or bar from the core's progress callback.
fn progress_callback(bar: &ProgressBar) -> impl FnMut(&'static str, u64, u64) -> Result<()> + '_ {
    move |stage, processed, _kept| {
        bar.set_message(stage);
        bar.set_position(processed);
        Ok(())
    }
}

fn main() -> Result<()> {
    let start = Instant::now();

    let args = Cli::parse();

    std::fs::create_dir_all(&args.out_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            args.out_dir.display()
        )
    })?;
    setup_logger(&args.out_dir)?;

    init(args.threads)?;

    let mut tunables = Tunables::new(args.kmer_length, args.tablesize);
    tunables.callback_period = args.callback_period;
    if let Commands::Partition {
        tag_depth,
        max_examined,
        ..
    } = &args.command
    {
        tunables.partition_tag_depth = *tag_depth;
        tunables.partition_max_examined = *max_examined;
    }
    tunables.validate()?;

    match &args.command {
        Commands::Abundance { input } => run_abundance(&tunables, input, &args.out_dir)?,
        Commands::Filter {
            input,
            threshold,
            mode,
            run_length,
            min_hits,
            seed_seq,
        } => run_filter(
            &tunables,
            input,
            &args.out_dir,
            *threshold,
            *mode,
            *run_length,
            *min_hits,
            seed_seq.as_deref(),
        )?,
        Commands::Trim { input, min_size } => {
            run_trim(&tunables, input, &args.out_dir, *min_size)?
        }
        Commands::Partition {
            input,
            exact,
            save_state,
            load_state,
            ..
        } => run_partition(
            &tunables,
            input,
            &args.out_dir,
            *exact,
            *save_state,
            load_state.as_deref(),
        )?,
        Commands::Posfreq {
            input,
            max_read_len,
            limit_count,
        } => run_posfreq(&tunables, input, &args.out_dir, *max_read_len, *limit_count)?,
        Commands::Dump { input, abundance } => run_dump(&tunables, input, *abundance)?,
    }

    info!("Elapsed time (sec): {:.2}", start.elapsed().as_secs_f32());
    info!("Done.");

    Ok(())
}

fn run_abundance(tunables: &Tunables, input: &Path, out_dir: &Path) -> Result<()> {
    let table = new_table(tunables);

    let spinner = read_spinner("reads");
    let mut callback = progress_callback(&spinner);
    let mut reporter = ProgressReporter::new(
        tunables.callback_period,
        Some(&mut callback as &mut ProgressFn),
    );

    let (stats, _) = ingest::consume_fasta(
        &table,
        input,
        KeyBounds::INACTIVE,
        None,
        false,
        &mut reporter,
    )?;
    drop(reporter);
    spinner.finish_and_clear();

    info!(
        "Consumed {} k-mers across {} reads.",
        stats.n_consumed, stats.total_reads
    );

    let out_path = out_dir.join(format!("{}.hist.tsv", read_stem(input)));
    report::write_abundance_distribution(&table, &out_path)?;
    info!("Abundance histogram written to {}.", out_path.display());

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_filter(
    tunables: &Tunables,
    input: &Path,
    out_dir: &Path,
    threshold: u8,
    mode: FilterMode,
    run_length: u32,
    min_hits: u32,
    seed_seq: Option<&str>,
) -> Result<()> {
    let table = new_table(tunables);

    let spinner = read_spinner("reads");
    let mut callback = progress_callback(&spinner);
    let mut reporter = ProgressReporter::new(
        tunables.callback_period,
        Some(&mut callback as &mut ProgressFn),
    );

    // invalid reads drop out of the mask right away
    let (stats, invalid_mask) = ingest::consume_fasta(
        &table,
        input,
        KeyBounds::INACTIVE,
        None,
        true,
        &mut reporter,
    )?;
    drop(reporter);
    spinner.finish_and_clear();
    info!(
        "Consumed {} k-mers across {} reads.",
        stats.n_consumed, stats.total_reads
    );

    // the re-scan passes know the read count up front
    let bar = progress_bar(stats.total_reads);
    let mut callback = progress_callback(&bar);
    let mut reporter = ProgressReporter::new(
        tunables.callback_period,
        Some(&mut callback as &mut ProgressFn),
    );

    let mask = match mode {
        FilterMode::Any | FilterMode::All => {
            let minmax = filter::fasta_to_minmax(
                &table,
                input,
                stats.total_reads,
                invalid_mask.as_ref(),
                &mut reporter,
            )?;
            if mode == FilterMode::Any {
                filter::filter_any(&minmax, threshold, invalid_mask.as_ref(), &mut reporter)?
            } else {
                filter::filter_all(&minmax, threshold, invalid_mask.as_ref(), &mut reporter)?
            }
        }
        FilterMode::Limit => filter::filter_limit_n(
            &table,
            input,
            stats.total_reads,
            threshold,
            min_hits,
            invalid_mask.as_ref(),
            &mut reporter,
        )?,
        FilterMode::Run => filter::filter_run(
            &table,
            input,
            stats.total_reads,
            threshold,
            run_length,
            invalid_mask.as_ref(),
            &mut reporter,
        )?,
        FilterMode::Connected => {
            let Some(seed) = seed_seq else {
                bail!("--mode connected requires --seed-seq");
            };
            let mut mask = graph::filter_connected(
                &table,
                seed.as_bytes(),
                input,
                stats.total_reads,
                &mut reporter,
            )?;
            if let Some(invalid) = &invalid_mask {
                mask.merge(invalid);
            }
            mask
        }
    };

    let out_path = out_dir.join(format!("{}.keep.fa", read_stem(input)));
    let n_kept = filter::output_filtered_fasta(input, &out_path, &mask, &mut reporter)?;
    drop(reporter);
    bar.finish_and_clear();

    info!(
        "Kept {} of {} reads; written to {}.",
        n_kept,
        stats.total_reads,
        out_path.display()
    );

    Ok(())
}

fn run_trim(tunables: &Tunables, input: &Path, out_dir: &Path, min_size: u64) -> Result<()> {
    let table = new_table(tunables);

    let spinner = read_spinner("reads");
    let mut callback = progress_callback(&spinner);
    let mut reporter = ProgressReporter::new(
        tunables.callback_period,
        Some(&mut callback as &mut ProgressFn),
    );

    let (stats, _) = ingest::consume_fasta(
        &table,
        input,
        KeyBounds::INACTIVE,
        None,
        false,
        &mut reporter,
    )?;
    info!(
        "Consumed {} k-mers across {} reads.",
        stats.n_consumed, stats.total_reads
    );

    let out_path = out_dir.join(format!("{}.keep.fa", read_stem(input)));
    let (total, kept) =
        graph::trim_small_components(&table, input, &out_path, min_size, &mut reporter)?;
    drop(reporter);
    spinner.finish_and_clear();

    info!(
        "Kept {} of {} reads in components of >= {} k-mers; written to {}.",
        kept,
        total,
        min_size,
        out_path.display()
    );

    Ok(())
}

fn run_partition(
    tunables: &Tunables,
    input: &Path,
    out_dir: &Path,
    exact: bool,
    save_state: bool,
    load_state: Option<&Path>,
) -> Result<()> {
    let table = new_table(tunables);
    let mut engine = Partitioner::new(&table, tunables);

    if let Some(state_dir) = load_state {
        engine.load_state(state_dir)?;
        info!(
            "Resumed {} partitions from {}.",
            engine.partition_count(),
            state_dir.display()
        );
    }

    let spinner = read_spinner("reads");
    let mut callback = progress_callback(&spinner);
    let mut reporter = ProgressReporter::new(
        tunables.callback_period,
        Some(&mut callback as &mut ProgressFn),
    );

    if exact {
        let n_created = engine.exact_partition_file(input, &mut reporter)?;
        info!("Exact partitioning created {} partitions.", n_created);
    } else {
        let n_reads = engine.partition_file(input, &mut reporter)?;
        info!(
            "Partitioned {} reads into {} live partitions.",
            n_reads,
            engine.partition_count()
        );
    }

    if save_state {
        engine.save_state(out_dir)?;
        info!("Partition state saved to {}.", out_dir.display());
    }

    let out_path = out_dir.join(format!("{}.part.fa", read_stem(input)));
    let n_partitions = engine.output_partitioned_file(input, &out_path, &mut reporter)?;
    drop(reporter);
    spinner.finish_and_clear();

    let n_surrendered = engine.surrender_ids().count();
    info!(
        "{} partitions written to {} ({} surrendered).",
        n_partitions,
        out_path.display(),
        n_surrendered
    );

    Ok(())
}

fn run_posfreq(
    tunables: &Tunables,
    input: &Path,
    out_dir: &Path,
    max_read_len: usize,
    limit_count: u8,
) -> Result<()> {
    let table = new_table(tunables);

    let spinner = read_spinner("reads");
    let mut callback = progress_callback(&spinner);
    let mut reporter = ProgressReporter::new(
        tunables.callback_period,
        Some(&mut callback as &mut ProgressFn),
    );

    let (stats, mask) = ingest::consume_fasta(
        &table,
        input,
        KeyBounds::INACTIVE,
        None,
        true,
        &mut reporter,
    )?;
    info!(
        "Consumed {} k-mers across {} reads.",
        stats.n_consumed, stats.total_reads
    );

    let totals = report::counts_by_position(
        &table,
        input,
        max_read_len,
        limit_count,
        mask.as_ref(),
        &mut reporter,
    )?;
    drop(reporter);
    spinner.finish_and_clear();

    let out_path = out_dir.join(format!("{}.posfreq.tsv", read_stem(input)));
    report::write_counts_by_position(&totals, &out_path)?;
    info!("Positional k-mer counts written to {}.", out_path.display());

    Ok(())
}

fn run_dump(tunables: &Tunables, input: &Path, abundance: u8) -> Result<()> {
    let table = new_table(tunables);

    let spinner = read_spinner("reads");
    let mut callback = progress_callback(&spinner);
    let mut reporter = ProgressReporter::new(
        tunables.callback_period,
        Some(&mut callback as &mut ProgressFn),
    );

    let (stats, mask) = ingest::consume_fasta(
        &table,
        input,
        KeyBounds::INACTIVE,
        None,
        true,
        &mut reporter,
    )?;
    info!(
        "Consumed {} k-mers across {} reads.",
        stats.n_consumed, stats.total_reads
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let n_dumped = report::dump_kmers_by_abundance(
        &table,
        input,
        abundance,
        mask.as_ref(),
        &mut out,
        &mut reporter,
    )?;
    drop(reporter);
    spinner.finish_and_clear();

    info!("Dumped {} k-mers of abundance {}.", n_dumped, abundance);

    Ok(())
}
