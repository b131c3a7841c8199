//! Entropy-based hash family.
//!
//! Each hash function is a projection vector together with the global
//! equi-count quantiles ("cut-off points") of its projection over the whole
//! distributed point set; a point hashes to the rank of its projection among
//! the cut-offs. Deriving the quantiles requires the distributed sort.
use crate::comm::sort::odd_even_sort;
use crate::comm::Communicator;
use crate::error::{Error, Result};
use crate::hash::{hash_combine, LshHash};
use crate::layout::MemoryLayout;
use crate::options::Options;
use crate::scalar::{HashWord, Index, Real};
use crate::shard::{DataAttributes, Shard};
use crate::utils::create_rng;
use ndarray::{Array, Array2};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::Rng;
use rayon::prelude::*;
use std::marker::PhantomData;
use std::time::Instant;
use tracing::debug;

/// Per (table, function): `dims` projection coefficients followed by
/// `num_cut_off_points - 1` sorted cut-off scalars.
pub struct EntropyBased<R, H, L> {
    buffer: Vec<R>,
    num_hash_functions: usize,
    hash_table_size: usize,
    num_cut_offs: usize,
    dims: usize,
    _marker: PhantomData<(H, L)>,
}

impl<R: Real, H: HashWord, L: MemoryLayout> EntropyBased<R, H, L> {
    #[inline(always)]
    fn linear_id(&self, table: usize, function: usize, col: usize) -> usize {
        let stride = self.dims + self.num_cut_offs;
        table * self.num_hash_functions * stride
            + L::linear_id(function, col, self.num_hash_functions, stride)
    }

    /// All cut-off points of one (table, function) slot, in order.
    pub fn cut_offs(&self, table: usize, function: usize) -> Vec<R> {
        (0..self.num_cut_offs)
            .map(|cop| self.buffer[self.linear_id(table, function, self.dims + cop)])
            .collect()
    }

    pub fn build<I: Index>(
        opt: &Options<R, I, H>,
        shard: &Shard<R, L>,
        comm: &Communicator,
    ) -> Result<Self> {
        let start = Instant::now();
        let attr = shard.attributes();
        let dims = attr.dims;
        let num_cut_offs = opt.num_cut_off_points - 1;

        let jump = attr.total_size / opt.num_cut_off_points;
        if jump == 0 {
            return Err(Error::Config(format!(
                "num_cut_off_points ({}) must not exceed the number of points ({})",
                opt.num_cut_off_points, attr.total_size
            )));
        }

        // projection pool, drawn on the master worker
        let mut pool = vec![R::zero(); opt.hash_pool_size * dims];
        if comm.is_master() {
            let mut rng = create_rng(opt.seed);
            let drawn: Array2<f64> =
                Array::random_using((opt.hash_pool_size, dims), StandardNormal, &mut rng);
            for function in 0..opt.hash_pool_size {
                for dim in 0..dims {
                    pool[function * dims + dim] =
                        R::from(drawn[[function, dim]]).unwrap_or_else(R::zero);
                }
            }
        }
        comm.broadcast(&mut pool)?;

        // global quantiles of every pool projection
        let owned = shard.owned();
        let mut cut_off_pool = vec![R::zero(); opt.hash_pool_size * num_cut_offs];
        let mut scores = vec![R::zero(); attr.rank_size];
        for function in 0..opt.hash_pool_size {
            let coeffs = &pool[function * dims..(function + 1) * dims];
            scores.par_iter_mut().enumerate().for_each(|(point, out)| {
                let mut value = R::zero();
                for dim in 0..dims {
                    value += owned[L::linear_id(point, dim, attr.rank_size, dims)] * coeffs[dim];
                }
                *out = value;
            });

            odd_even_sort(&mut scores, comm)?;

            // each cut-off lives on exactly one worker; a sum reduction
            // materializes the full vector everywhere
            let mut cut_offs = vec![R::zero(); num_cut_offs];
            for (cop, cut_off) in cut_offs.iter_mut().enumerate() {
                let target = (cop + 1) * jump;
                if target >= attr.rank_size * comm.rank()
                    && target < attr.rank_size * (comm.rank() + 1)
                {
                    *cut_off = scores[target % attr.rank_size];
                }
            }
            comm.allreduce_sum(&mut cut_offs)?;
            cut_off_pool[function * num_cut_offs..(function + 1) * num_cut_offs]
                .copy_from_slice(&cut_offs);
        }

        // select one pool entry per (table, function) slot
        let mut family = EntropyBased {
            buffer: vec![
                R::zero();
                opt.num_hash_tables * opt.num_hash_functions * (dims + num_cut_offs)
            ],
            num_hash_functions: opt.num_hash_functions,
            hash_table_size: opt.hash_table_size,
            num_cut_offs,
            dims,
            _marker: PhantomData,
        };
        if comm.is_master() {
            let mut rng = create_rng(opt.seed);
            for table in 0..opt.num_hash_tables {
                for function in 0..opt.num_hash_functions {
                    let pick = rng.gen_range(0..opt.hash_pool_size);
                    for dim in 0..dims {
                        let slot = family.linear_id(table, function, dim);
                        family.buffer[slot] = pool[pick * dims + dim];
                    }
                    for cop in 0..num_cut_offs {
                        let slot = family.linear_id(table, function, dims + cop);
                        family.buffer[slot] = cut_off_pool[pick * num_cut_offs + cop];
                    }
                }
            }
        }
        comm.broadcast(&mut family.buffer)?;

        debug!(
            rank = comm.rank(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "created entropy-based hash functions"
        );
        Ok(family)
    }
}

impl<R: Real, H: HashWord, L: MemoryLayout> LshHash<R, H> for EntropyBased<R, H, L> {
    fn hash(&self, table: usize, point: usize, data: &[R], attr: &DataAttributes) -> H {
        let mut combined = H::wrap_usize(self.num_hash_functions);
        for function in 0..self.num_hash_functions {
            let mut score = R::zero();
            for dim in 0..self.dims {
                score += data[L::linear_id(point, dim, attr.rank_size, attr.dims)]
                    * self.buffer[self.linear_id(table, function, dim)];
            }
            // rank of the projection among the cut-offs
            let mut slot = H::zero();
            for cop in 0..self.num_cut_offs {
                if score > self.buffer[self.linear_id(table, function, self.dims + cop)] {
                    slot = slot + H::one();
                }
            }
            combined = hash_combine(combined, slot);
        }
        combined % H::wrap_usize(self.hash_table_size)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layout::Aos;
    use std::thread;

    fn small_options() -> Options<f32, u32, u32> {
        let mut opt: Options = Options::default();
        opt.hash_pool_size = 4;
        opt.num_hash_functions = 3;
        opt.num_hash_tables = 2;
        opt.hash_table_size = 8;
        opt.num_cut_off_points = 2;
        opt.seed = 3;
        opt
    }

    #[test]
    fn test_hash_stays_in_range() {
        let opt = small_options();
        let attr = DataAttributes::new(6, 2, 1);
        let point_major: Vec<f32> = (0..12).map(|v| v as f32).collect();
        let shard = Shard::<f32, Aos>::new(attr, point_major);
        let comms = Communicator::split(1);
        let family = EntropyBased::<f32, u32, Aos>::build(&opt, &shard, &comms[0]).unwrap();

        for table in 0..opt.num_hash_tables {
            for point in 0..attr.rank_size {
                assert!(family.hash(table, point, shard.owned(), &attr) < 8);
            }
        }
    }

    #[test]
    fn test_all_zero_points_collapse_to_one_bucket() {
        let mut opt = small_options();
        opt.num_cut_off_points = 4;
        let comms = Communicator::split(4);
        let results: Vec<(Vec<f32>, u32)> = thread::scope(|s| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    let opt = opt.clone();
                    s.spawn(move || {
                        let attr = DataAttributes::new(16, 2, 4);
                        let shard = Shard::<f32, Aos>::new(attr, vec![0.0; 8]);
                        let family =
                            EntropyBased::<f32, u32, Aos>::build(&opt, &shard, comm).unwrap();
                        let cut_offs = family.cut_offs(0, 0);
                        let bucket = family.hash(0, 0, shard.owned(), &attr);
                        (cut_offs, bucket)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // every projection of the zero vector is zero, so all cut-offs are
        // zero and every point lands in the same bucket on every worker
        let bucket = results[0].1;
        for (cut_offs, b) in &results {
            assert!(cut_offs.iter().all(|&c| c == 0.0));
            assert_eq!(*b, bucket);
        }
    }
}
