
//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{CALLBACK_PERIOD, PARTITION_MAX_EXAMINED, PARTITION_TAG_DEPTH};
use crate::kmer::MAX_K;

const DEFAULT_K: usize = 21;
const DEFAULT_TABLESIZE: usize = 100_000_000;

#[derive(Parser)]
#[command(author, version, about = "K-mer counting and read graph partitioning", long_about = None)]
#[command(styles = get_styles())]
#[command(disable_help_subcommand = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Length of k-mers to use
    #[arg(short, long, global = true, default_value_t = DEFAULT_K, value_parser = validate_kmer_length)]
    pub kmer_length: usize,

    /// Number of counter slots in the k-mer table
    #[arg(short = 'T', long, global = true, default_value_t = DEFAULT_TABLESIZE, value_parser = validate_tablesize)]
    pub tablesize: usize,

    /// Number of threads to use
    #[arg(short, long, global = true, default_value_t = 1, value_parser = validate_threads)]
    pub threads: usize,

    /// Output directory
    #[arg(short, long, global = true, default_value = "graphmer_out", value_parser = clap::value_parser!(PathBuf))]
    pub out_dir: PathBuf,

    /// Reads between progress callbacks
    #[arg(long, global = true, default_value_t = CALLBACK_PERIOD)]
    pub callback_period: u64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Count k-mers in reads and write the abundance histogram
    Abundance {
        /// Input FASTA(.gz) reads
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Keep reads passing a per-read k-mer abundance test
    Filter {
        /// Input FASTA(.gz) reads
        #[arg(short, long)]
        input: PathBuf,

        /// Minimum k-mer count a read must exhibit
        #[arg(long, default_value_t = 2)]
        threshold: u8,

        /// How the threshold applies across a read's k-mers
        #[arg(long, value_enum, default_value_t = FilterMode::Any)]
        mode: FilterMode,

        /// Consecutive qualifying k-mers required by --mode run
        #[arg(long, default_value_t = 3)]
        run_length: u32,

        /// Qualifying k-mers required by --mode limit
        #[arg(long, default_value_t = 1)]
        min_hits: u32,

        /// Seed sequence whose component --mode connected keeps
        #[arg(long)]
        seed_seq: Option<String>,
    },

    /// Drop reads whose first k-mer sits in a small graph component
    Trim {
        /// Input FASTA(.gz) reads
        #[arg(short, long)]
        input: PathBuf,

        /// Minimum component size (in k-mers) a read must belong to
        #[arg(long, default_value_t = 50)]
        min_size: u64,
    },

    /// Group reads into connected-graph partitions
    Partition {
        /// Input FASTA(.gz) reads
        #[arg(short, long)]
        input: PathBuf,

        /// Fully explore components instead of budgeted search
        #[arg(long)]
        exact: bool,

        /// Write partition.map / surrender.set into the output directory
        #[arg(long)]
        save_state: bool,

        /// Resume from a directory holding partition.map / surrender.set
        #[arg(long)]
        load_state: Option<PathBuf>,

        /// BFS frontier budget before surrendering
        #[arg(long, default_value_t = PARTITION_TAG_DEPTH)]
        tag_depth: usize,

        /// Dequeued-node budget before surrendering
        #[arg(long, default_value_t = PARTITION_MAX_EXAMINED)]
        max_examined: u64,
    },

    /// Tally k-mer counts by read position
    Posfreq {
        /// Input FASTA(.gz) reads
        #[arg(short, long)]
        input: PathBuf,

        /// Longest read prefix to tally
        #[arg(long, default_value_t = 200)]
        max_read_len: usize,

        /// Only count k-mers of exactly this abundance (0 = all)
        #[arg(long, default_value_t = 0)]
        limit_count: u8,
    },

    /// Print k-mers whose count equals a target abundance
    Dump {
        /// Input FASTA(.gz) reads
        #[arg(short, long)]
        input: PathBuf,

        /// Target abundance
        #[arg(long)]
        abundance: u8,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FilterMode {
    /// At least one k-mer meets the threshold
    Any,
    /// Every k-mer meets the threshold
    All,
    /// A run of consecutive k-mers meets the threshold
    Run,
    /// At least --min-hits k-mers meet the threshold
    Limit,
    /// The read's first k-mer lies in the seed sequence's component
    Connected,
}

fn validate_kmer_length(k: &str) -> Result<usize, String> {
    let k: usize = k
        .parse()
        .map_err(|_| format!("`{k}` isn't a valid k-mer length"))?;

    if !(1..=MAX_K).contains(&k) {
        return Err(format!("k-mer length must be in the range [1, {MAX_K}]"));
    }

    Ok(k)
}

fn validate_tablesize(tablesize: &str) -> Result<usize, String> {
    let tablesize: usize = tablesize
        .parse()
        .map_err(|_| format!("`{tablesize}` isn't a valid table size"))?;

    if tablesize == 0 {
        return Err("tablesize must be positive".to_string());
    }

    Ok(tablesize)
}

fn validate_threads(threads: &str) -> Result<usize, String> {
    let threads: usize = threads
        .parse()
        .map_err(|_| format!("`{threads}` isn't a valid value"))?;

    if !(1..=1024).contains(&threads) {
        return Err("Threads must be in the range [1, 1024]".to_string());
    }

    Ok(threads)
}

fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .usage(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
        .header(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
        .literal(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .invalid(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .error(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .valid(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .placeholder(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
}

#[test]
fn test_verify_cli() {
    use clap::CommandFactory;
    Cli::command().debug_assert()
}
