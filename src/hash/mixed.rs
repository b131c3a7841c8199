//! Mixed hash family: random-projection slot values linearly combined with
//! entropy weights, bucketed by globally derived cut-off points of the
//! combined score. One cut-off vector per hash table.
use crate::comm::sort::odd_even_sort;
use crate::comm::Communicator;
use crate::error::Result;
use crate::hash::LshHash;
use crate::layout::MemoryLayout;
use crate::options::Options;
use crate::scalar::{HashWord, Index, Real};
use crate::shard::{DataAttributes, Shard};
use crate::utils::create_rng;
use ndarray::{Array, Array1, Array2};
use ndarray_rand::rand_distr::{StandardNormal, Uniform};
use ndarray_rand::RandomExt;
use rand::Rng;
use rayon::prelude::*;
use std::marker::PhantomData;
use std::time::Instant;
use tracing::debug;

/// Per table: `num_hash_functions` projection rows of `dims + 1`
/// coefficients (offset in the trailing slot), followed by one entropy
/// weight per function and `num_cut_off_points - 1` cut-off scalars.
pub struct Mixed<R, H, L> {
    buffer: Vec<R>,
    num_hash_functions: usize,
    hash_table_size: usize,
    num_cut_offs: usize,
    dims: usize,
    w: R,
    _marker: PhantomData<(H, L)>,
}

impl<R: Real, H: HashWord, L: MemoryLayout> Mixed<R, H, L> {
    fn table_stride(&self) -> usize {
        self.num_hash_functions * (self.dims + 1) + self.num_hash_functions + self.num_cut_offs
    }

    #[inline(always)]
    fn projection_id(&self, table: usize, function: usize, dim: usize) -> usize {
        table * self.table_stride()
            + L::linear_id(function, dim, self.num_hash_functions, self.dims + 1)
    }

    #[inline(always)]
    fn weight_id(&self, table: usize, function: usize) -> usize {
        table * self.table_stride() + self.num_hash_functions * (self.dims + 1) + function
    }

    #[inline(always)]
    fn cut_off_id(&self, table: usize, cop: usize) -> usize {
        table * self.table_stride()
            + self.num_hash_functions * (self.dims + 1)
            + self.num_hash_functions
            + cop
    }

    /// Combined projection score of one point, shared by the cut-off
    /// derivation and the hash itself.
    fn combined_score(&self, table: usize, point: usize, data: &[R], attr: &DataAttributes) -> R {
        let mut value = R::zero();
        for function in 0..self.num_hash_functions {
            let mut proj = self.buffer[self.projection_id(table, function, self.dims)];
            for dim in 0..self.dims {
                proj += data[L::linear_id(point, dim, attr.rank_size, attr.dims)]
                    * self.buffer[self.projection_id(table, function, dim)];
            }
            let slot = (proj / self.w).floor();
            value += slot * self.buffer[self.weight_id(table, function)];
        }
        value
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

        let mut family = Mixed {
            buffer: Vec::new(),
            num_hash_functions: opt.num_hash_functions,
            hash_table_size: opt.hash_table_size,
            num_cut_offs,
            dims,
            w: opt.w,
            _marker: PhantomData,
        };
        family.buffer = vec![R::zero(); opt.num_hash_tables * family.table_stride()];

        if comm.is_master() {
            let mut rng = create_rng(opt.seed);
            let w = opt.w.to_f64().unwrap_or(1.0);

            // projections with non-negative coefficients, offsets in [0, w)
            let mut pool: Array2<f64> =
                Array::random_using((opt.hash_pool_size, dims + 1), StandardNormal, &mut rng);
            pool.mapv_inplace(f64::abs);
            let offsets: Array1<f64> =
                Array::random_using(opt.hash_pool_size, Uniform::new(0.0, w), &mut rng);
            for (function, b) in offsets.iter().enumerate() {
                pool[[function, dims]] = *b;
            }

            for table in 0..opt.num_hash_tables {
                for function in 0..opt.num_hash_functions {
                    let pick = rng.gen_range(0..opt.hash_pool_size);
                    for dim in 0..=dims {
                        let slot = family.projection_id(table, function, dim);
                        family.buffer[slot] = R::from(pool[[pick, dim]]).unwrap_or_else(R::zero);
                    }
                }
            }
            // entropy weights combining the per-function slot values
            for table in 0..opt.num_hash_tables {
                for function in 0..opt.num_hash_functions {
                    let weight: f64 = rng.sample(StandardNormal);
                    let slot = family.weight_id(table, function);
                    family.buffer[slot] = R::from(weight).unwrap_or_else(R::zero);
                }
            }
        }
        comm.broadcast(&mut family.buffer)?;

        // cut-off points of the combined score, one vector per table; the
        // sorted global sequence includes the padded tail of the last worker
        let owned = shard.owned();
        let jump = (attr.rank_size * comm.size()) / opt.num_cut_off_points;
        let mut scores = vec![R::zero(); attr.rank_size];
        for table in 0..opt.num_hash_tables {
            let family_ref = &family;
            scores.par_iter_mut().enumerate().for_each(|(point, out)| {
                *out = family_ref.combined_score(table, point, owned, &attr);
            });

            odd_even_sort(&mut scores, comm)?;

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
            for (cop, cut_off) in cut_offs.iter().enumerate() {
                let slot = family.cut_off_id(table, cop);
                family.buffer[slot] = *cut_off;
            }
        }

        debug!(
            rank = comm.rank(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "created mixed hash functions"
        );
        Ok(family)
    }
}

impl<R: Real, H: HashWord, L: MemoryLayout> LshHash<R, H> for Mixed<R, H, L> {
    fn hash(&self, table: usize, point: usize, data: &[R], attr: &DataAttributes) -> H {
        let value = self.combined_score(table, point, data, attr);
        let mut combined = H::zero();
        for cop in 0..self.num_cut_offs {
            if value > self.buffer[self.cut_off_id(table, cop)] {
                combined = combined + H::one();
            }
        }
        combined % H::wrap_usize(self.hash_table_size)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layout::Aos;

    #[test]
    fn test_hash_stays_in_range() {
        let mut opt: Options = Options::default();
        opt.hash_pool_size = 4;
        opt.num_hash_functions = 3;
        opt.num_hash_tables = 2;
        opt.hash_table_size = 4;
        opt.num_cut_off_points = 3;
        opt.seed = 5;

        let attr = DataAttributes::new(6, 2, 1);
        let point_major: Vec<f32> = (0..12).map(|v| (v as f32) - 4.0).collect();
        let shard = Shard::<f32, Aos>::new(attr, point_major);
        let comms = Communicator::split(1);
        let family = Mixed::<f32, u32, Aos>::build(&opt, &shard, &comms[0]).unwrap();

        for table in 0..opt.num_hash_tables {
            for point in 0..attr.rank_size {
                assert!(family.hash(table, point, shard.owned(), &attr) < 4);
            }
        }
    }

    #[test]
    fn test_cut_offs_are_sorted() {
        let mut opt: Options = Options::default();
        opt.hash_pool_size = 4;
        opt.num_hash_functions = 2;
        opt.num_hash_tables = 1;
        opt.hash_table_size = 8;
        opt.num_cut_off_points = 4;
        opt.seed = 11;

        let attr = DataAttributes::new(8, 2, 1);
        let point_major: Vec<f32> = (0..16).map(|v| v as f32 * 0.5).collect();
        let shard = Shard::<f32, Aos>::new(attr, point_major);
        let comms = Communicator::split(1);
        let family = Mixed::<f32, u32, Aos>::build(&opt, &shard, &comms[0]).unwrap();

        let cut_offs: Vec<f32> = (0..3).map(|cop| family.buffer[family.cut_off_id(0, cop)]).collect();
        for pair in cut_offs.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }
}
