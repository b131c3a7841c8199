//! Random projections hash family.
//!
//! See https://www.cs.princeton.edu/courses/archive/spring05/cos598E/bib/p253-datar.pdf
//! paragraph 3.2: h(x) = floor((a.x + b) / w) per hash function, folded over
//! the functions of a table.
use crate::comm::Communicator;
use crate::error::Result;
use crate::hash::{hash_combine, LshHash, MultiProbe};
use crate::layout::MemoryLayout;
use crate::options::Options;
use crate::scalar::{HashWord, Index, Real};
use crate::shard::DataAttributes;
use crate::utils::create_rng;
use ndarray::{Array, Array1, Array2};
use ndarray_rand::rand_distr::{StandardNormal, Uniform};
use ndarray_rand::RandomExt;
use rand::Rng;
use std::marker::PhantomData;
use std::time::Instant;
use tracing::debug;

/// Per (table, function): a projection vector of `dims` coefficients plus
/// the offset `b` in the trailing slot.
pub struct RandomProjections<R, H, L> {
    buffer: Vec<R>,
    num_hash_functions: usize,
    hash_table_size: usize,
    dims: usize,
    w: R,
    _marker: PhantomData<(H, L)>,
}

impl<R: Real, H: HashWord, L: MemoryLayout> RandomProjections<R, H, L> {
    #[inline(always)]
    fn linear_id(&self, table: usize, function: usize, dim: usize) -> usize {
        table * self.num_hash_functions * (self.dims + 1)
            + L::linear_id(function, dim, self.num_hash_functions, self.dims + 1)
    }

    /// a.x + b of one hash function.
    fn projection(
        &self,
        table: usize,
        function: usize,
        point: usize,
        data: &[R],
        attr: &DataAttributes,
    ) -> R {
        // the trailing slot holds the offset b
        let mut proj = self.buffer[self.linear_id(table, function, self.dims)];
        for dim in 0..self.dims {
            proj += data[L::linear_id(point, dim, attr.rank_size, attr.dims)]
                * self.buffer[self.linear_id(table, function, dim)];
        }
        proj
    }

    /// Fold the per-function slot values into the table hash, optionally
    /// with one function's slot shifted by a probing perturbation.
    fn fold_hash(
        &self,
        table: usize,
        point: usize,
        data: &[R],
        attr: &DataAttributes,
        perturbed: Option<(usize, i64)>,
    ) -> H {
        let mut combined = H::wrap_usize(self.num_hash_functions);
        for function in 0..self.num_hash_functions {
            let proj = self.projection(table, function, point, data, attr);
            let mut slot = (proj / self.w).floor().to_f64().unwrap_or(0.0);
            if let Some((perturbed_function, delta)) = perturbed {
                if function == perturbed_function {
                    slot += delta as f64;
                }
            }
            combined = hash_combine(combined, H::wrap_floor(slot));
        }
        combined % H::wrap_usize(self.hash_table_size)
    }

    /// Draw the hash pool on the master worker, select one pool entry per
    /// (table, function) slot and broadcast the selection.
    pub fn build<I: Index>(
        opt: &Options<R, I, H>,
        attr: DataAttributes,
        comm: &Communicator,
    ) -> Result<Self> {
        let start = Instant::now();
        let dims = attr.dims;

        let mut family = RandomProjections {
            buffer: vec![R::zero(); opt.num_hash_tables * opt.num_hash_functions * (dims + 1)],
            num_hash_functions: opt.num_hash_functions,
            hash_table_size: opt.hash_table_size,
            dims,
            w: opt.w,
            _marker: PhantomData,
        };

        if comm.is_master() {
            let mut rng = create_rng(opt.seed);
            let w = opt.w.to_f64().unwrap_or(1.0);

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
                        let slot = family.linear_id(table, function, dim);
                        family.buffer[slot] = R::from(pool[[pick, dim]]).unwrap_or_else(R::zero);
                    }
                }
            }
        }
        comm.broadcast(&mut family.buffer)?;

        debug!(
            rank = comm.rank(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "created random projections hash functions"
        );
        Ok(family)
    }
}

impl<R: Real, H: HashWord, L: MemoryLayout> LshHash<R, H> for RandomProjections<R, H, L> {
    fn hash(&self, table: usize, point: usize, data: &[R], attr: &DataAttributes) -> H {
        self.fold_hash(table, point, data, attr, None)
    }

    fn as_multi_probe(&self) -> Option<&dyn MultiProbe<R, H>> {
        Some(self)
    }
}

impl<R: Real, H: HashWord, L: MemoryLayout> MultiProbe<R, H> for RandomProjections<R, H, L> {
    fn functions_per_table(&self) -> usize {
        self.num_hash_functions
    }

    fn slot_boundaries(
        &self,
        table: usize,
        point: usize,
        data: &[R],
        attr: &DataAttributes,
        function: usize,
    ) -> (R, R) {
        let proj = self.projection(table, function, point, data, attr);
        let lower = proj - (proj / self.w).floor() * self.w;
        (lower, self.w - lower)
    }

    fn probe_hash(
        &self,
        table: usize,
        point: usize,
        data: &[R],
        attr: &DataAttributes,
        function: usize,
        delta: i64,
    ) -> H {
        self.fold_hash(table, point, data, attr, Some((function, delta)))
    }
}
