
//! Binary checkpoint of a partitioning run.
//!
//! Two files, little-endian, fixed-width, written through 1 MiB buffers:
//! `partition.map` holds `(u64 forward packing, u32 partition id)` records
//! for every assigned tag, `surrender.set` holds the surrendered `u32` ids.
//! Reload happens in two passes over the map records: the first discovers
//! the distinct ids and recreates one shared cell per id, the second binds
//! every tag to its id's cell — on-disk id numbering and cell sharing both
//! survive the round trip.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use rustc_hash::FxHashMap;

use crate::partition::{CellIndex, PartitionId, Partitioner};

pub const PARTITION_MAP_FILE: &str = "partition.map";
pub const SURRENDER_SET_FILE: &str = "surrender.set";

const CHECKPOINT_BUF: usize = 1 << 20;

impl Partitioner<'_> {
    /// Write `partition.map` and `surrender.set` into `dir`.
    pub fn save_state(&self, dir: &Path) -> Result<()> {
        let map_path = dir.join(PARTITION_MAP_FILE);
        let mut out = BufWriter::with_capacity(
            CHECKPOINT_BUF,
            File::create(&map_path)
                .with_context(|| format!("failed to create {}", map_path.display()))?,
        );

        let mut n_tags = 0u64;
        for (kmer_f, pid) in self.bound_tags() {
            out.write_u64::<LittleEndian>(kmer_f)?;
            out.write_u32::<LittleEndian>(pid)?;
            n_tags += 1;
        }
        out.flush()?;

        let surrender_path = dir.join(SURRENDER_SET_FILE);
        let mut out = BufWriter::with_capacity(
            CHECKPOINT_BUF,
            File::create(&surrender_path)
                .with_context(|| format!("failed to create {}", surrender_path.display()))?,
        );

        let mut n_surrendered = 0u64;
        for pid in self.surrender_ids() {
            out.write_u32::<LittleEndian>(pid)?;
            n_surrendered += 1;
        }
        out.flush()?;

        debug!("checkpointed {n_tags} tags, {n_surrendered} surrendered partitions");
        Ok(())
    }

    /// Reload a checkpoint written by [`Partitioner::save_state`] into this
    /// engine. Partition ids keep their on-disk numbering.
    pub fn load_state(&mut self, dir: &Path) -> Result<()> {
        let map_path = dir.join(PARTITION_MAP_FILE);
        let records = read_map_records(&map_path)
            .with_context(|| format!("failed to read {}", map_path.display()))?;

        // pass 1: one shared cell per distinct id
        let mut cell_by_pid: FxHashMap<PartitionId, CellIndex> = FxHashMap::default();
        for &(_, pid) in &records {
            cell_by_pid
                .entry(pid)
                .or_insert_with(|| self.restore_class(pid));
        }

        // pass 2: bind every tag to its id's cell
        for &(kmer_f, pid) in &records {
            self.bind_tag(kmer_f, cell_by_pid[&pid]);
        }

        let surrender_path = dir.join(SURRENDER_SET_FILE);
        let surrendered = read_surrender_records(&surrender_path)
            .with_context(|| format!("failed to read {}", surrender_path.display()))?;
        for pid in surrendered {
            if !self.mark_surrendered(pid) {
                warn!("surrender checkpoint names unknown partition {pid}; ignored");
            }
        }

        debug!(
            "loaded {} tags across {} partitions",
            records.len(),
            cell_by_pid.len()
        );
        debug_assert!(self.invariants_hold());
        Ok(())
    }
}

fn read_map_records(path: &Path) -> Result<Vec<(u64, PartitionId)>> {
    let mut reader = BufReader::with_capacity(CHECKPOINT_BUF, File::open(path)?);
    let mut records = Vec::new();

    loop {
        let kmer_f = match reader.read_u64::<LittleEndian>() {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        // a partial trailing record is a truncated checkpoint
        let pid = reader
            .read_u32::<LittleEndian>()
            .context("truncated partition map record")?;
        records.push((kmer_f, pid));
    }

    Ok(records)
}

fn read_surrender_records(path: &Path) -> Result<Vec<PartitionId>> {
    let mut reader = BufReader::with_capacity(CHECKPOINT_BUF, File::open(path)?);
    let mut ids = Vec::new();

    loop {
        match reader.read_u32::<LittleEndian>() {
            Ok(pid) => ids.push(pid),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(ids)
}
