//! Construction of the flat LSH hash tables of one worker.
//!
//! Per hash table the local points are grouped by bucket inside one flat
//! `buckets` array; `offsets` holds the per-bucket start indices. Three
//! data-parallel passes build the tables: count the bucket occupancies,
//! prefix-sum them into offsets, then scatter the point IDs.
use crate::constants::BLOCKING_SIZE;
use crate::error::Result;
use crate::hash::LshHash;
use crate::layout::MemoryLayout;
use crate::options::Options;
use crate::scalar::{to_index, HashWord, Index, Real};
use crate::shard::{DataAttributes, Shard};
use fnv::FnvHashSet;
use rayon::prelude::*;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::debug;

pub struct HashTables<R, I, H, L, F> {
    attr: DataAttributes,
    num_hash_tables: usize,
    hash_table_size: usize,
    /// Buckets scanned per hash table and query, the primary bucket
    /// included.
    num_multi_probes: usize,
    /// Global ID of the first local point.
    base_id: usize,
    family: F,
    /// `num_hash_tables * rank_size` point IDs grouped by bucket, plus a
    /// sentinel tail of `BLOCKING_SIZE` entries.
    buckets: Vec<I>,
    /// `num_hash_tables * (hash_table_size + 1)` bucket start indices.
    offsets: Vec<usize>,
    _marker: PhantomData<(R, H, L)>,
}

impl<R, I, H, L, F> HashTables<R, I, H, L, F>
where
    R: Real,
    I: Index,
    H: HashWord,
    L: MemoryLayout,
    F: LshHash<R, H>,
{
    pub fn build(
        opt: &Options<R, I, H>,
        shard: &Shard<R, L>,
        family: F,
        rank: usize,
        comm_size: usize,
    ) -> Result<Self> {
        let start = Instant::now();
        let attr = shard.attributes();
        let num_hash_tables = opt.num_hash_tables;
        let hash_table_size = opt.hash_table_size;
        let base_id = rank * attr.rank_size;
        let data = shard.owned();

        // pass 1: count the occupancy of every bucket
        let counts: Vec<AtomicUsize> = (0..num_hash_tables * hash_table_size)
            .map(|_| AtomicUsize::new(0))
            .collect();
        (0..attr.rank_size).into_par_iter().for_each(|point| {
            for table in 0..num_hash_tables {
                let bucket = family.hash(table, point, data, &attr).to_usize().unwrap_or(0);
                debug_assert!(bucket < hash_table_size);
                counts[table * hash_table_size + bucket].fetch_add(1, Ordering::Relaxed);
            }
        });

        // pass 2: prefix-sum the counts into offsets. The two-slot lead lets
        // `offsets[table, bucket + 1]` double as the append cursor of
        // `bucket` during the fill pass; afterwards it holds the bucket end.
        let mut offsets = vec![0usize; num_hash_tables * (hash_table_size + 1)];
        offsets
            .par_chunks_mut(hash_table_size + 1)
            .enumerate()
            .for_each(|(table, chunk)| {
                let count_offset = table * hash_table_size;
                chunk[0] = 0;
                chunk[1] = 0;
                for bucket in 2..=hash_table_size {
                    chunk[bucket] =
                        chunk[bucket - 1] + counts[count_offset + bucket - 2].load(Ordering::Relaxed);
                }
            });

        // pass 3: scatter the global point IDs into their buckets
        let correct_rank_size = attr.correct_rank_size(rank, comm_size);
        let sentinel = base_id + correct_rank_size - 1;
        let cursors: Vec<AtomicUsize> = offsets.iter().map(|&v| AtomicUsize::new(v)).collect();
        let slots: Vec<AtomicUsize> = (0..num_hash_tables * attr.rank_size + BLOCKING_SIZE)
            .map(|_| AtomicUsize::new(0))
            .collect();
        (0..attr.rank_size).into_par_iter().for_each(|point| {
            // padded points carry the last real ID so they can never become
            // a neighbor of a real point
            let gid = if point >= correct_rank_size {
                sentinel
            } else {
                base_id + point
            };
            for table in 0..num_hash_tables {
                let bucket = family.hash(table, point, data, &attr).to_usize().unwrap_or(0);
                let cursor = cursors[table * (hash_table_size + 1) + bucket + 1]
                    .fetch_add(1, Ordering::Relaxed);
                slots[table * attr.rank_size + cursor].store(gid, Ordering::Relaxed);
            }
        });
        for block in 0..BLOCKING_SIZE {
            slots[num_hash_tables * attr.rank_size + block].store(sentinel, Ordering::Relaxed);
        }

        let offsets: Vec<usize> = cursors.into_iter().map(AtomicUsize::into_inner).collect();
        let buckets: Vec<I> = slots
            .into_iter()
            .map(|slot| to_index(slot.into_inner()))
            .collect();

        let tables = HashTables {
            attr,
            num_hash_tables,
            hash_table_size,
            num_multi_probes: opt.num_multi_probes,
            base_id,
            family,
            buckets,
            offsets,
            _marker: PhantomData,
        };
        #[cfg(debug_assertions)]
        tables.assert_consistent();

        debug!(
            rank,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "filled hash tables"
        );
        Ok(tables)
    }

    pub fn attributes(&self) -> DataAttributes {
        self.attr
    }

    pub fn num_hash_tables(&self) -> usize {
        self.num_hash_tables
    }

    pub fn hash_table_size(&self) -> usize {
        self.hash_table_size
    }

    pub fn num_multi_probes(&self) -> usize {
        self.num_multi_probes
    }

    pub fn base_id(&self) -> usize {
        self.base_id
    }

    pub fn family(&self) -> &F {
        &self.family
    }

    pub fn buckets(&self) -> &[I] {
        &self.buckets
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Start and end index of `bucket` within `table`'s slice of the bucket
    /// array.
    #[inline(always)]
    pub fn bucket_bounds(&self, table: usize, bucket: usize) -> (usize, usize) {
        let offset = table * (self.hash_table_size + 1) + bucket;
        (self.offsets[offset], self.offsets[offset + 1])
    }

    /// Bucket occupancy statistics across all hash tables.
    pub fn describe(&self) -> String {
        let mut lengths = Vec::new();
        let mut used: FnvHashSet<usize> = FnvHashSet::default();
        for table in 0..self.num_hash_tables {
            for bucket in 0..self.hash_table_size {
                let (begin, end) = self.bucket_bounds(table, bucket);
                if end > begin {
                    lengths.push(end - begin);
                    used.insert(bucket);
                }
            }
        }
        if lengths.is_empty() {
            return "no occupied buckets".to_string();
        }
        let avg = lengths.iter().sum::<usize>() as f64 / lengths.len() as f64;
        let var = lengths
            .iter()
            .map(|&len| (avg - len as f64).powi(2))
            .sum::<f64>()
            / lengths.len() as f64;
        format!(
            "occupied buckets: {} ({} distinct hash values), avg: {:.2}, std-dev: {:.2}, min: {}, max: {}",
            lengths.len(),
            used.len(),
            avg,
            var.sqrt(),
            lengths.iter().min().unwrap_or(&0),
            lengths.iter().max().unwrap_or(&0),
        )
    }

    #[cfg(debug_assertions)]
    fn assert_consistent(&self) {
        for table in 0..self.num_hash_tables {
            let chunk = &self.offsets
                [table * (self.hash_table_size + 1)..(table + 1) * (self.hash_table_size + 1)];
            assert_eq!(chunk[self.hash_table_size], self.attr.rank_size);
            for bucket in 0..self.hash_table_size {
                assert!(chunk[bucket] <= chunk[bucket + 1]);
            }
            for id in &self.buckets[table * self.attr.rank_size..(table + 1) * self.attr.rank_size]
            {
                let gid = crate::scalar::from_index(*id);
                assert!(gid >= self.base_id && gid < self.base_id + self.attr.rank_size);
            }
        }
    }
}
