
//! Partitioning of reads into connected components of the k-mer graph.
//!
//! The first k-mer of every read is a *tag*. Tags are keyed by their forward
//! packing in `partition_map`, which points into an arena of partition-id
//! cells; several tags sharing one cell are, by construction, in the same
//! partition. `reverse_pmap` lists the cells currently holding each live id,
//! so a merge rewrites the cells of the losing classes instead of touching
//! every tag. Cells are never freed while the engine lives, which keeps all
//! existing tag bindings valid across merges.
//!
//! Truncated partitioning walks a budgeted BFS from each read looking for
//! previously-placed tags; when a budget trips, the read still gets an id
//! but the id is recorded in the surrender set — the cluster is known to be
//! under-explored, and downstream consumers can re-process it.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use ahash::{HashSet, HashSetExt};
use anyhow::{anyhow, Context, Result};
use needletail::parse_fastx_file;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::Tunables;
use crate::count_table::{CountTable, KeyBounds};
use crate::graph::SeenSet;
use crate::io_utils::write_partitioned_record;
use crate::kmer::KmerPair;
use crate::progress::ProgressReporter;

pub type PartitionId = u32;
pub type CellIndex = usize;

pub struct Partitioner<'t> {
    table: &'t CountTable,
    cells: Vec<PartitionId>,
    partition_map: FxHashMap<u64, Option<CellIndex>>,
    reverse_pmap: FxHashMap<PartitionId, FxHashSet<CellIndex>>,
    surrender_set: FxHashSet<PartitionId>,
    next_partition_id: PartitionId,
    tag_depth: usize,
    max_examined: u64,
}

impl<'t> Partitioner<'t> {
    pub fn new(table: &'t CountTable, tunables: &Tunables) -> Self {
        Partitioner {
            table,
            cells: Vec::new(),
            partition_map: FxHashMap::default(),
            reverse_pmap: FxHashMap::default(),
            surrender_set: FxHashSet::default(),
            next_partition_id: 1,
            tag_depth: tunables.partition_tag_depth,
            max_examined: tunables.partition_max_examined,
        }
    }

    /// Number of live partition ids.
    pub fn partition_count(&self) -> usize {
        self.reverse_pmap.len()
    }

    pub fn is_surrendered(&self, pid: PartitionId) -> bool {
        self.surrender_set.contains(&pid)
    }

    /// Partition of a tag, by forward packing. `None` if the k-mer was never
    /// tagged or is tagged but not yet assigned.
    pub fn partition_of(&self, kmer_f: u64) -> Option<PartitionId> {
        let cell = self.cell_of(kmer_f)?;
        Some(self.cells[cell])
    }

    #[inline]
    fn cell_of(&self, kmer_f: u64) -> Option<CellIndex> {
        self.partition_map.get(&kmer_f).copied().flatten()
    }

    fn alloc_cell(&mut self, pid: PartitionId) -> CellIndex {
        self.cells.push(pid);
        self.cells.len() - 1
    }

    fn fresh_partition(&mut self) -> (PartitionId, CellIndex) {
        let pid = self.next_partition_id;
        self.next_partition_id += 1;
        let cell = self.alloc_cell(pid);
        self.reverse_pmap.entry(pid).or_default().insert(cell);
        (pid, cell)
    }

    /// If either strand of `pair` is a tag, the tagged packing.
    fn tagged_key(&self, pair: KmerPair) -> Option<u64> {
        if self.partition_map.contains_key(&pair.fwd) {
            Some(pair.fwd)
        } else if self.partition_map.contains_key(&pair.rev) {
            Some(pair.rev)
        } else {
            None
        }
    }

    /// Budgeted BFS from `start` collecting every tag reachable through
    /// counted vertices. The boolean is true when a traversal budget tripped
    /// and the collection is therefore incomplete. The start k-mer does not
    /// match itself, but a start that is already a tag from an earlier read
    /// resolves to that tag immediately.
    pub fn find_all_tags(&self, start: KmerPair) -> (FxHashSet<u64>, bool) {
        let mut tagged_kmers = FxHashSet::default();

        if let Some(tag) = self.tagged_key(start) {
            tagged_kmers.insert(tag);
            return (tagged_kmers, false);
        }

        let codec = self.table.codec();
        let mut keeper = SeenSet::default();
        let mut queue: VecDeque<KmerPair> = VecDeque::new();
        queue.push_back(start);

        let mut examined = 0u64;
        let mut first = true;
        let mut surrender = false;

        while !queue.is_empty() {
            examined += 1;
            if examined > self.max_examined || queue.len() > self.tag_depth {
                surrender = true;
                break;
            }

            let Some(pair) = queue.pop_front() else { break };

            if !keeper.insert(pair.canonical()) {
                continue;
            }

            // a tag ends the search in this direction
            if !first {
                if let Some(tag) = self.tagged_key(pair) {
                    tagged_kmers.insert(tag);
                    continue;
                }
            }

            for bits in 0..4u8 {
                let next = codec.extend_right(pair, bits);
                if self.table.get_count_by_pair(next) > 0 {
                    queue.push_back(next);
                }
            }
            for bits in 0..4u8 {
                let prev = codec.extend_left(pair, bits);
                if self.table.get_count_by_pair(prev) > 0 {
                    queue.push_back(prev);
                }
            }

            first = false;
        }

        (tagged_kmers, surrender)
    }

    /// Give the tag `kmer_f` a partition: a fresh id when no tagged
    /// neighbors were found, otherwise the minimum id across every class the
    /// tagged k-mers (and `kmer_f` itself) belong to, merging those classes.
    pub fn assign_partition_id(
        &mut self,
        kmer_f: u64,
        tagged_kmers: &FxHashSet<u64>,
        surrender: bool,
    ) -> PartitionId {
        let pid = if tagged_kmers.is_empty() {
            let (pid, cell) = self.fresh_partition();
            self.partition_map.insert(kmer_f, Some(cell));
            pid
        } else {
            self.reassign_partition_ids(kmer_f, tagged_kmers)
        };

        if surrender {
            self.surrender_set.insert(pid);
        }

        debug_assert!(self.invariants_hold());
        pid
    }

    fn reassign_partition_ids(
        &mut self,
        kmer_f: u64,
        tagged_kmers: &FxHashSet<u64>,
    ) -> PartitionId {
        // every tag handed back by find_all_tags was bound when it was
        // assigned, so the cell lookups cannot miss
        let mut cells: Vec<CellIndex> = tagged_kmers
            .iter()
            .filter_map(|&tag| self.cell_of(tag))
            .collect();
        debug_assert_eq!(cells.len(), tagged_kmers.len());

        let Some(&anchor) = cells.first() else {
            // unreachable through find_all_tags; stay total regardless
            let (pid, cell) = self.fresh_partition();
            self.partition_map.insert(kmer_f, Some(cell));
            return pid;
        };

        // kmer_f may already hold a cell of its own (repeated first k-mer);
        // its class takes part in the merge too
        if let Some(cell) = self.cell_of(kmer_f) {
            cells.push(cell);
        }
        self.partition_map.insert(kmer_f, Some(anchor));

        let mut min_pid = self.cells[anchor];
        for &cell in &cells {
            min_pid = min_pid.min(self.cells[cell]);
        }

        for &cell in &cells {
            let pid = self.cells[cell];
            if pid == min_pid {
                continue;
            }
            let Some(class) = self.reverse_pmap.remove(&pid) else {
                continue;
            };
            for &member in &class {
                self.cells[member] = min_pid;
            }
            self.reverse_pmap.entry(min_pid).or_default().extend(class);

            // a surrendered id that loses its class passes the mark on
            if self.surrender_set.remove(&pid) {
                self.surrender_set.insert(min_pid);
            }
        }

        min_pid
    }

    /// Truncated (progressive) partitioning of a read file. Each valid read
    /// is consumed into the count table, then its first k-mer is tagged and
    /// assigned. Returns the number of valid reads processed.
    pub fn partition_file(&mut self, infile: &Path, reporter: &mut ProgressReporter) -> Result<u64> {
        let mut reader = parse_fastx_file(infile)
            .with_context(|| format!("failed to open reads file {}", infile.display()))?;

        let mut total_reads = 0u64;
        while let Some(record) = reader.next() {
            let record = record?;
            let seq = record.seq();

            if !self.table.check_read(&seq) {
                continue;
            }
            self.table.increment_sequence(&seq, KeyBounds::INACTIVE);

            let Some(first) = self.table.codec().init(&seq) else {
                continue;
            };
            let (tagged_kmers, surrender) = self.find_all_tags(first);
            self.assign_partition_id(first.fwd, &tagged_kmers, surrender);

            total_reads += 1;
            reporter.tick("partition", total_reads, u64::from(self.next_partition_id) - 1)?;
        }

        Ok(total_reads)
    }

    /// Exact partitioning: tag the first k-mer of every valid read while
    /// consuming it, then fully explore each untagged-component and point
    /// every tag it contains at one shared cell. No surrender policy.
    /// Returns the number of partitions created.
    pub fn exact_partition_file(
        &mut self,
        infile: &Path,
        reporter: &mut ProgressReporter,
    ) -> Result<u32> {
        let mut reader = parse_fastx_file(infile)
            .with_context(|| format!("failed to open reads file {}", infile.display()))?;

        let mut total_reads = 0u64;
        while let Some(record) = reader.next() {
            let record = record?;
            let seq = record.seq();

            if self.table.check_read(&seq) {
                self.table.increment_sequence(&seq, KeyBounds::INACTIVE);
                if let Some(first) = self.table.codec().init(&seq) {
                    self.partition_map.entry(first.fwd).or_insert(None);
                }
            }

            total_reads += 1;
            reporter.tick("tag", total_reads, 0)?;
        }

        let first_new_pid = self.next_partition_id;
        let tags: Vec<u64> = self.partition_map.keys().copied().collect();
        for kmer_f in tags {
            if self.cell_of(kmer_f).is_some() {
                continue;
            }
            let (_, cell) = self.fresh_partition();
            let start = self.table.codec().pair_from_forward(kmer_f);
            self.set_partition_id(start, cell);
        }

        debug_assert!(self.invariants_hold());
        Ok(self.next_partition_id - first_new_pid)
    }

    /// Walk the whole component of `start` and bind every tag in it (either
    /// strand) to `cell`.
    fn set_partition_id(&mut self, start: KmerPair, cell: CellIndex) {
        let codec = self.table.codec();
        let mut keeper = SeenSet::default();
        let mut stack = vec![start];

        while let Some(pair) = stack.pop() {
            if self.table.get_count_by_pair(pair) == 0 {
                continue;
            }
            if !keeper.insert(pair.canonical()) {
                continue;
            }

            for key in [pair.fwd, pair.rev] {
                if let Some(slot) = self.partition_map.get_mut(&key) {
                    match slot {
                        Some(existing) => debug_assert_eq!(*existing, cell),
                        None => *slot = Some(cell),
                    }
                }
            }

            for bits in (0..4u8).rev() {
                stack.push(codec.extend_left(pair, bits));
            }
            for bits in (0..4u8).rev() {
                stack.push(codec.extend_right(pair, bits));
            }
        }
    }

    /// Re-read `infile` and write each valid read annotated with its
    /// partition id, `*`-flagged when the id surrendered. Returns the number
    /// of distinct ids seen.
    pub fn output_partitioned_file(
        &self,
        infile: &Path,
        outfile: &Path,
        reporter: &mut ProgressReporter,
    ) -> Result<u64> {
        let mut reader = parse_fastx_file(infile)
            .with_context(|| format!("failed to open reads file {}", infile.display()))?;
        let mut out = BufWriter::new(
            File::create(outfile)
                .with_context(|| format!("failed to create output file {}", outfile.display()))?,
        );

        let mut partitions: HashSet<PartitionId> = HashSet::new();
        let mut total_reads = 0u64;

        while let Some(record) = reader.next() {
            let record = record?;
            let seq = record.seq();

            if !self.table.check_read(&seq) {
                continue;
            }
            let Some(first) = self.table.codec().init(&seq) else {
                continue;
            };
            let pid = self.partition_of(first.fwd).ok_or_else(|| {
                anyhow!(
                    "read {} was never partitioned; was it in the partitioned input?",
                    String::from_utf8_lossy(record.id())
                )
            })?;

            write_partitioned_record(&mut out, record.id(), &seq, pid, self.is_surrendered(pid))?;
            partitions.insert(pid);

            total_reads += 1;
            reporter.tick("output", total_reads, partitions.len() as u64)?;
        }

        Ok(partitions.len() as u64)
    }

    /// Tags grouped into partitions, outer and inner lists sorted. Intended
    /// for state comparisons in tests and diagnostics.
    pub fn equivalence_classes(&self) -> Vec<Vec<u64>> {
        let mut by_pid: FxHashMap<PartitionId, Vec<u64>> = FxHashMap::default();
        for (&kmer_f, cell) in &self.partition_map {
            if let Some(cell) = cell {
                by_pid.entry(self.cells[*cell]).or_default().push(kmer_f);
            }
        }

        let mut classes: Vec<Vec<u64>> = by_pid.into_values().collect();
        for class in &mut classes {
            class.sort_unstable();
        }
        classes.sort_unstable();
        classes
    }

    // --- checkpoint plumbing ----------------------------------------------

    /// All assigned tags with their current partition ids.
    pub fn bound_tags(&self) -> impl Iterator<Item = (u64, PartitionId)> + '_ {
        self.partition_map
            .iter()
            .filter_map(|(&kmer_f, cell)| cell.map(|c| (kmer_f, self.cells[c])))
    }

    pub fn surrender_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.surrender_set.iter().copied()
    }

    /// Recreate the single shared cell for a reloaded partition id.
    pub(crate) fn restore_class(&mut self, pid: PartitionId) -> CellIndex {
        let cell = self.alloc_cell(pid);
        self.reverse_pmap.entry(pid).or_default().insert(cell);
        self.next_partition_id = self.next_partition_id.max(pid + 1);
        cell
    }

    /// Bind a reloaded tag to a restored cell.
    pub(crate) fn bind_tag(&mut self, kmer_f: u64, cell: CellIndex) {
        self.partition_map.insert(kmer_f, Some(cell));
    }

    /// Mark a reloaded id as surrendered; refused for ids that are not live.
    pub(crate) fn mark_surrendered(&mut self, pid: PartitionId) -> bool {
        if self.reverse_pmap.contains_key(&pid) {
            self.surrender_set.insert(pid);
            true
        } else {
            false
        }
    }

    /// I1: every bound tag's cell is registered under the cell's id.
    /// I2: every registered cell holds the id it is registered under.
    /// I3: surrendered ids are live.
    pub(crate) fn invariants_hold(&self) -> bool {
        let i1 = self.partition_map.values().flatten().all(|cell| {
            self.reverse_pmap
                .get(&self.cells[*cell])
                .is_some_and(|class| class.contains(cell))
        });

        let i2 = self
            .reverse_pmap
            .iter()
            .all(|(pid, class)| class.iter().all(|&cell| self.cells[cell] == *pid));

        let i3 = self
            .surrender_set
            .iter()
            .all(|pid| self.reverse_pmap.contains_key(pid));

        i1 && i2 && i3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::TempDir;

    fn write_fasta(dir: &TempDir, name: &str, reads: &[&str]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut f = File::create(&path).unwrap();
        for (i, read) in reads.iter().enumerate() {
            writeln!(f, ">read{i}\n{read}").unwrap();
        }
        f.sync_all().unwrap();
        path
    }

    fn tunables(k: usize) -> Tunables {
        Tunables::new(k, 1_000_000)
    }

    #[test]
    fn test_two_components_two_partitions_exact() {
        let dir = TempDir::new().unwrap();
        let path = write_fasta(&dir, "reads.fa", &["AAAAAAAAAA", "CCCCCCCCCC"]);

        let table = CountTable::new(5, 1_000_000);
        let mut engine = Partitioner::new(&table, &tunables(5));
        let n = engine
            .exact_partition_file(&path, &mut ProgressReporter::silent())
            .unwrap();

        assert_eq!(n, 2);
        assert_eq!(engine.partition_count(), 2);

        let codec = table.codec();
        let a = engine.partition_of(codec.init(b"AAAAA").unwrap().fwd);
        let c = engine.partition_of(codec.init(b"CCCCC").unwrap().fwd);
        assert!(a.is_some() && c.is_some());
        assert_ne!(a, c);
    }

    #[test]
    fn test_exact_joins_tags_in_one_component() {
        let dir = TempDir::new().unwrap();
        let read = "ACGTACGGTTAACC";
        let path = write_fasta(&dir, "reads.fa", &[read, &read[2..], &read[4..]]);

        let table = CountTable::new(5, 1_000_000);
        let mut engine = Partitioner::new(&table, &tunables(5));
        let n = engine
            .exact_partition_file(&path, &mut ProgressReporter::silent())
            .unwrap();

        assert_eq!(n, 1);
        assert_eq!(engine.equivalence_classes().len(), 1);
        assert_eq!(engine.equivalence_classes()[0].len(), 3);
    }

    #[test]
    fn test_truncated_merges_to_smallest_id() {
        let dir = TempDir::new().unwrap();
        let read = "ACGTACGGTTAACC";
        let path = write_fasta(&dir, "reads.fa", &[read, &read[2..], &read[4..]]);

        let table = CountTable::new(5, 1_000_000);
        let mut engine = Partitioner::new(&table, &tunables(5));
        let n_reads = engine
            .partition_file(&path, &mut ProgressReporter::silent())
            .unwrap();
        assert_eq!(n_reads, 3);

        let codec = table.codec();
        for start in [&read[..5], &read[2..7], &read[4..9]] {
            let first = codec.init(start.as_bytes()).unwrap();
            assert_eq!(engine.partition_of(first.fwd), Some(1));
        }
        assert_eq!(engine.partition_count(), 1);
        assert!(engine.invariants_hold());
    }

    #[test]
    fn test_disjoint_reads_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let path = write_fasta(&dir, "reads.fa", &["AAAAAAAAAA", "CCCCCCCCCC", "GGTGGTGGTA"]);

        let table = CountTable::new(5, 1_000_000);
        let mut engine = Partitioner::new(&table, &tunables(5));
        engine
            .partition_file(&path, &mut ProgressReporter::silent())
            .unwrap();

        assert_eq!(engine.partition_count(), 3);
        assert!(engine.surrender_ids().next().is_none());
    }

    #[test]
    fn test_merge_order_does_not_change_classes() {
        let read = "ACGTACGGTTAACC";
        let orders: [&[&str]; 3] = [
            &[read, &read[2..], &read[4..], "AAAAAAAAAA"],
            &[&read[4..], "AAAAAAAAAA", read, &read[2..]],
            &["AAAAAAAAAA", &read[2..], &read[4..], read],
        ];

        let mut all_classes = Vec::new();
        for reads in orders {
            let dir = TempDir::new().unwrap();
            let path = write_fasta(&dir, "reads.fa", reads);

            let table = CountTable::new(5, 1_000_000);
            let mut engine = Partitioner::new(&table, &tunables(5));
            engine
                .partition_file(&path, &mut ProgressReporter::silent())
                .unwrap();
            all_classes.push(engine.equivalence_classes());
        }

        assert_eq!(all_classes[0], all_classes[1]);
        assert_eq!(all_classes[1], all_classes[2]);
    }

    #[test]
    fn test_repeated_first_kmer_reuses_partition() {
        let dir = TempDir::new().unwrap();
        let path = write_fasta(&dir, "reads.fa", &["ACGTACGGTT", "ACGTACGGTT"]);

        let table = CountTable::new(5, 1_000_000);
        let mut engine = Partitioner::new(&table, &tunables(5));
        engine
            .partition_file(&path, &mut ProgressReporter::silent())
            .unwrap();

        assert_eq!(engine.partition_count(), 1);
    }

    #[test]
    fn test_budget_trip_surrenders() {
        let dir = TempDir::new().unwrap();
        let read = "ACGTACGGTTAACC";
        let path = write_fasta(&dir, "reads.fa", &[read, &read[2..]]);

        let table = CountTable::new(5, 1_000_000);
        let mut params = tunables(5);
        params.partition_max_examined = 1; // surrender almost immediately
        let mut engine = Partitioner::new(&table, &params);
        engine
            .partition_file(&path, &mut ProgressReporter::silent())
            .unwrap();

        // the second read could not reach the first read's tag, and both
        // searches tripped the budget before their queues drained
        assert_eq!(engine.partition_count(), 2);
        let mut surrendered: Vec<PartitionId> = engine.surrender_ids().collect();
        surrendered.sort_unstable();
        assert_eq!(surrendered, vec![1, 2]);
        assert!(engine.invariants_hold());
    }

    #[test]
    fn test_surrender_mark_survives_merge() {
        let table = CountTable::new(5, 1_000_000);
        let codec = table.codec();
        table.increment_sequence(b"AAAAA", KeyBounds::INACTIVE);
        table.increment_sequence(b"CCCCC", KeyBounds::INACTIVE);

        let mut engine = Partitioner::new(&table, &tunables(5));

        let a = codec.init(b"AAAAA").unwrap();
        let c = codec.init(b"CCCCC").unwrap();

        let none = FxHashSet::default();
        let pid_a = engine.assign_partition_id(a.fwd, &none, false);
        let pid_c = engine.assign_partition_id(c.fwd, &none, true);
        assert!(engine.is_surrendered(pid_c));

        // force-merge the two classes through a third tag
        let mut tags = FxHashSet::default();
        tags.insert(a.fwd);
        tags.insert(c.fwd);
        let g = codec.init(b"GGTGG").unwrap();
        let merged = engine.assign_partition_id(g.fwd, &tags, false);

        assert_eq!(merged, pid_a.min(pid_c));
        assert!(engine.is_surrendered(merged));
        assert!(engine.invariants_hold());
    }

    #[test]
    fn test_output_marks_surrendered_reads() {
        let dir = TempDir::new().unwrap();
        let read = "ACGTACGGTTAACC";
        let path = write_fasta(&dir, "reads.fa", &[read, &read[2..]]);

        let table = CountTable::new(5, 1_000_000);
        let mut params = tunables(5);
        params.partition_max_examined = 1;
        let mut engine = Partitioner::new(&table, &params);
        engine
            .partition_file(&path, &mut ProgressReporter::silent())
            .unwrap();

        let out_path = dir.path().join("reads.part.fa");
        let n = engine
            .output_partitioned_file(&path, &out_path, &mut ProgressReporter::silent())
            .unwrap();
        assert_eq!(n, 2);

        let out = std::fs::read_to_string(&out_path).unwrap();
        assert!(out.contains(">read0\t1*\n"));
        assert!(out.contains(">read1\t2*\n"));
    }

    #[test]
    fn test_find_all_tags_skips_start_self_match() {
        let table = CountTable::new(5, 1_000_000);
        let codec = table.codec();
        table.increment_sequence(b"AAAAAAAAAA", KeyBounds::INACTIVE);

        let mut engine = Partitioner::new(&table, &tunables(5));
        let first = codec.init(b"AAAAA").unwrap();

        // nothing tagged yet: no tags found, no surrender
        let (tags, surrender) = engine.find_all_tags(first);
        assert!(tags.is_empty());
        assert!(!surrender);

        // once assigned, the same start resolves to its own tag up front
        engine.assign_partition_id(first.fwd, &tags, surrender);
        let (tags, surrender) = engine.find_all_tags(first);
        assert_eq!(tags.len(), 1);
        assert!(tags.contains(&first.fwd));
        assert!(!surrender);
    }

    #[test]
    fn test_invalid_reads_are_not_partitioned() {
        let dir = TempDir::new().unwrap();
        let path = write_fasta(&dir, "reads.fa", &["ACGTNCGGTT", "AAAAAAAAAA"]);

        let table = CountTable::new(5, 1_000_000);
        let mut engine = Partitioner::new(&table, &tunables(5));
        let n_reads = engine
            .partition_file(&path, &mut ProgressReporter::silent())
            .unwrap();

        assert_eq!(n_reads, 1);
        assert_eq!(engine.partition_count(), 1);
    }
}
