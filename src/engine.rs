//! One k-NN round on one worker: refine the visiting points' top-k with
//! candidates drawn from the local hash tables.
use crate::constants::BLOCKING_SIZE;
use crate::hash::{probing_sequence, LshHash};
use crate::knn::Knn;
use crate::layout::MemoryLayout;
use crate::scalar::{from_index, to_index, HashWord, Index, Real};
use crate::table::HashTables;
use rayon::prelude::*;

/// Scan one bucket in blocks of `BLOCKING_SIZE` and fold every admissible
/// candidate into the point's top-k scratch. Block entries past the bucket's
/// end are ordinary IDs of this shard (the bucket array tail is
/// sentinel-filled), so the inner loop needs no bounds branch and
/// superfluous entries are just additional true-distance candidates.
fn scan_bucket<R, I, L>(
    buckets: &[I],
    bounds: (usize, usize),
    table_offset: usize,
    owned: &[R],
    coords: &[R],
    rank_size: usize,
    local_base: usize,
    own_gid: I,
    ids: &mut [I],
    dists: &mut [R],
) where
    R: Real,
    I: Index,
    L: MemoryLayout,
{
    let dims = coords.len();
    let k = ids.len();
    let (begin, end) = bounds;

    let mut elem = begin;
    while elem < end {
        let mut cand = [I::zero(); BLOCKING_SIZE];
        let mut cand_dist = [R::zero(); BLOCKING_SIZE];
        for block in 0..BLOCKING_SIZE {
            cand[block] = buckets[table_offset + elem + block];
        }
        for block in 0..BLOCKING_SIZE {
            let local_idx = from_index(cand[block]) - local_base;
            let mut acc = R::zero();
            for (dim, coord) in coords.iter().enumerate() {
                let diff = *coord - owned[L::linear_id(local_idx, dim, rank_size, dims)];
                acc += diff * diff;
            }
            cand_dist[block] = acc;
        }
        for block in 0..BLOCKING_SIZE {
            if cand_dist[block] < dists[0]
                && cand[block] != own_gid
                && !ids.contains(&cand[block])
            {
                ids[0] = cand[block];
                dists[0] = cand_dist[block];
                // bubble the new entry down; the slots stay ordered by
                // descending distance, so slot 0 is the current maximum
                for nn in 0..k - 1 {
                    if dists[nn] < dists[nn + 1] {
                        ids.swap(nn, nn + 1);
                        dists.swap(nn, nn + 1);
                    }
                }
            }
        }
        elem += BLOCKING_SIZE;
    }
}

/// Update `knn` (the running result for the points of `visiting`) with
/// neighbors drawn from the worker's own shard.
///
/// The hash family is identical on every worker, so re-hashing a visiting
/// point against the local tables selects the buckets its neighbors would
/// occupy here. Per hash table the primary bucket is scanned, and when the
/// family supports probing and more than one probe is configured, the
/// `num_multi_probes - 1` most promising perturbed buckets as well.
pub fn knn_round<R, I, H, L, F>(
    tables: &HashTables<R, I, H, L, F>,
    owned: &[R],
    visiting: &[R],
    visit_base_id: usize,
    knn: &mut Knn<R, I, L>,
) where
    R: Real,
    I: Index,
    H: HashWord,
    L: MemoryLayout,
    F: LshHash<R, H>,
{
    let attr = tables.attributes();
    let k = knn.k();
    let dims = attr.dims;
    let local_base = tables.base_id();
    let num_hash_tables = tables.num_hash_tables();
    let extra_probes = tables.num_multi_probes() - 1;
    let buckets = tables.buckets();
    let family = tables.family();

    let mut scratch_ids = vec![I::zero(); attr.rank_size * k];
    let mut scratch_dists = vec![R::zero(); attr.rank_size * k];
    let knn_view: &Knn<R, I, L> = knn;

    scratch_ids
        .par_chunks_mut(k)
        .zip(scratch_dists.par_chunks_mut(k))
        .enumerate()
        .for_each_init(
            || vec![R::zero(); dims],
            |coords, (point, (ids, dists))| {
                for nn in 0..k {
                    let lid = knn_view.linear_id(point, nn);
                    ids[nn] = knn_view.ids()[lid];
                    dists[nn] = knn_view.dists()[lid];
                }
                for (dim, coord) in coords.iter_mut().enumerate() {
                    *coord = visiting[L::linear_id(point, dim, attr.rank_size, dims)];
                }
                let own_gid: I = to_index(visit_base_id + point);

                for table in 0..num_hash_tables {
                    let table_offset = table * attr.rank_size;
                    let bucket = family
                        .hash(table, point, visiting, &attr)
                        .to_usize()
                        .unwrap_or(0);
                    scan_bucket::<R, I, L>(
                        buckets,
                        tables.bucket_bounds(table, bucket),
                        table_offset,
                        owned,
                        coords,
                        attr.rank_size,
                        local_base,
                        own_gid,
                        ids,
                        dists,
                    );

                    if extra_probes > 0 {
                        if let Some(prober) = family.as_multi_probe() {
                            let probes = probing_sequence(
                                prober,
                                table,
                                point,
                                visiting,
                                &attr,
                                extra_probes,
                            );
                            for (function, delta) in probes {
                                let bucket = prober
                                    .probe_hash(table, point, visiting, &attr, function, delta)
                                    .to_usize()
                                    .unwrap_or(0);
                                scan_bucket::<R, I, L>(
                                    buckets,
                                    tables.bucket_bounds(table, bucket),
                                    table_offset,
                                    owned,
                                    coords,
                                    attr.rank_size,
                                    local_base,
                                    own_gid,
                                    ids,
                                    dists,
                                );
                            }
                        }
                    }
                }
            },
        );

    knn.write_back(&scratch_ids, &scratch_dists);
}
