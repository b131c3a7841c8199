//! The local slice of the point set owned by one worker.
use crate::layout::MemoryLayout;
use crate::scalar::Real;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Sizes of the distributed point set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAttributes {
    /// Number of points over all workers.
    pub total_size: usize,
    /// Number of points per worker, including the padded tail of the last
    /// worker.
    pub rank_size: usize,
    /// Number of dimensions per point.
    pub dims: usize,
}

impl DataAttributes {
    pub fn new(total_size: usize, dims: usize, comm_size: usize) -> Self {
        DataAttributes {
            total_size,
            rank_size: (total_size + comm_size - 1) / comm_size,
            dims,
        }
    }

    /// Number of real (non-padded) points on `rank`.
    pub fn correct_rank_size(&self, rank: usize, comm_size: usize) -> usize {
        if rank == comm_size - 1 {
            self.total_size - (comm_size - 1) * self.rank_size
        } else {
            self.rank_size
        }
    }
}

/// Shard store of one worker.
///
/// `owned` is the worker's own slice, read by every distance kernel for the
/// whole run. `active` is the shard currently visiting this worker and
/// `shadow` is the receive side of the ring rotation; a rotation completes
/// with a constant-time buffer swap.
pub struct Shard<R, L> {
    attr: DataAttributes,
    owned: Vec<R>,
    active: Vec<R>,
    shadow: Vec<R>,
    _layout: PhantomData<L>,
}

impl<R: Real, L: MemoryLayout> Shard<R, L> {
    /// Build the shard from its parsed point-major slice (already padded to
    /// `rank_size` rows).
    pub fn new(attr: DataAttributes, point_major: Vec<R>) -> Self {
        debug_assert_eq!(point_major.len(), attr.rank_size * attr.dims);

        let mut owned = vec![R::zero(); point_major.len()];
        for point in 0..attr.rank_size {
            for dim in 0..attr.dims {
                owned[L::linear_id(point, dim, attr.rank_size, attr.dims)] =
                    point_major[point * attr.dims + dim];
            }
        }
        let active = owned.clone();
        let shadow = vec![R::zero(); owned.len()];

        Shard {
            attr,
            owned,
            active,
            shadow,
            _layout: PhantomData,
        }
    }

    pub fn attributes(&self) -> DataAttributes {
        self.attr
    }

    /// The worker's own points.
    pub fn owned(&self) -> &[R] {
        &self.owned
    }

    /// The shard currently visiting this worker.
    pub fn active(&self) -> &[R] {
        &self.active
    }

    pub fn coord(&self, point: usize, dim: usize) -> R {
        self.owned[L::linear_id(point, dim, self.attr.rank_size, self.attr.dims)]
    }

    /// Split borrows for one ring round: the owned points and the visiting
    /// shard are read while the shadow buffer receives the next shard.
    pub fn split_for_round(&mut self) -> (&[R], &[R], &mut [R]) {
        (&self.owned, &self.active, &mut self.shadow)
    }

    /// Make the buffer received during the last round the visiting shard.
    pub fn swap_buffers(&mut self) {
        std::mem::swap(&mut self.active, &mut self.shadow);
    }

    /// Copy the owned points into the other layout.
    pub fn copy_to_layout<M: MemoryLayout>(&self) -> Vec<R> {
        let mut out = vec![R::zero(); self.owned.len()];
        for point in 0..self.attr.rank_size {
            for dim in 0..self.attr.dims {
                out[M::linear_id(point, dim, self.attr.rank_size, self.attr.dims)] =
                    self.coord(point, dim);
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layout::{Aos, Soa};

    #[test]
    fn test_attributes() {
        let attr = DataAttributes::new(7, 2, 2);
        assert_eq!(attr.rank_size, 4);
        assert_eq!(attr.correct_rank_size(0, 2), 4);
        assert_eq!(attr.correct_rank_size(1, 2), 3);

        let attr = DataAttributes::new(8, 2, 2);
        assert_eq!(attr.rank_size, 4);
        assert_eq!(attr.correct_rank_size(1, 2), 4);
    }

    #[test]
    fn test_layout_conversion() {
        let attr = DataAttributes::new(2, 3, 1);
        let raw = vec![1.0f32, 2.0, 3.0, 10.0, 20.0, 30.0];
        let aos = Shard::<f32, Aos>::new(attr, raw.clone());
        let soa = Shard::<f32, Soa>::new(attr, raw.clone());

        assert_eq!(aos.owned(), raw.as_slice());
        assert_eq!(soa.owned(), &[1.0, 10.0, 2.0, 20.0, 3.0, 30.0]);
        for point in 0..2 {
            for dim in 0..3 {
                assert_eq!(aos.coord(point, dim), soa.coord(point, dim));
            }
        }
        assert_eq!(soa.copy_to_layout::<Aos>(), raw);
        assert_eq!(aos.copy_to_layout::<Soa>(), soa.owned());
    }

    #[test]
    fn test_swap_buffers() {
        let attr = DataAttributes::new(1, 2, 1);
        let mut shard = Shard::<f32, Aos>::new(attr, vec![1.0, 2.0]);
        {
            let (_owned, _active, shadow) = shard.split_for_round();
            shadow.copy_from_slice(&[5.0, 6.0]);
        }
        shard.swap_buffers();
        assert_eq!(shard.active(), &[5.0, 6.0]);
        // the owned points are untouched by rotation
        assert_eq!(shard.owned(), &[1.0, 2.0]);
    }
}
