
//! Run parameters shared by the count table and the partition engine.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::kmer::MAX_K;

/// BFS frontier budget before a partition search surrenders.
pub const PARTITION_TAG_DEPTH: usize = 500;
/// Total dequeued-node budget before a partition search surrenders.
pub const PARTITION_MAX_EXAMINED: u64 = 1_000_000;
/// Progress callback cadence, in reads.
pub const CALLBACK_PERIOD: u64 = 10_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunables {
    /// k-mer length, 1..=32.
    pub k: usize,
    /// Number of counter slots; keys are reduced modulo this.
    pub tablesize: usize,
    pub partition_tag_depth: usize,
    pub partition_max_examined: u64,
    pub callback_period: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            k: 21,
            tablesize: 100_000_000,
            partition_tag_depth: PARTITION_TAG_DEPTH,
            partition_max_examined: PARTITION_MAX_EXAMINED,
            callback_period: CALLBACK_PERIOD,
        }
    }
}

impl Tunables {
    pub fn new(k: usize, tablesize: usize) -> Self {
        Tunables {
            k,
            tablesize,
            ..Tunables::default()
        }
    }

    /// Reject parameter sets before any table is allocated.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_K).contains(&self.k) {
            bail!("k-mer length must be in the range [1, {}]", MAX_K);
        }

        if self.tablesize == 0 {
            bail!("tablesize must be positive");
        }

        if self.callback_period == 0 {
            bail!("callback period must be positive");
        }

        if self.partition_tag_depth == 0 || self.partition_max_examined == 0 {
            bail!("partition traversal budgets must be positive");
        }

        Ok(())
    }
}
