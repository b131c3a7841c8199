//! The running result of the k-nearest-neighbor search.
//!
//! Two parallel arrays of `rank_size * k` entries hold, per point, the
//! global IDs of the best neighbors found so far and their squared
//! distances. Slot 0 of every point always carries the worst recorded
//! neighbor, so a single compare gates admission. The result travels the
//! worker ring together with the shard it belongs to and is back with its
//! owner after a full revolution.
use crate::comm::{Communicator, Tag};
use crate::error::Result;
use crate::layout::MemoryLayout;
use crate::scalar::{to_index, Index, Real};
use crate::shard::DataAttributes;
use std::marker::PhantomData;

pub struct Knn<R, I, L> {
    attr: DataAttributes,
    k: usize,
    ids: Vec<I>,
    dists: Vec<R>,
    _layout: PhantomData<L>,
}

impl<R: Real, I: Index, L: MemoryLayout> Knn<R, I, L> {
    /// "No neighbor yet": every slot holds the point's own global ID at
    /// infinite distance, which admission filters out naturally. Padded
    /// points on the last worker get the last real ID instead.
    pub fn new(k: usize, attr: DataAttributes, rank: usize, comm_size: usize) -> Self {
        debug_assert!(k > 0);
        let base_id = rank * attr.rank_size;
        let correct_rank_size = attr.correct_rank_size(rank, comm_size);

        let mut knn = Knn {
            attr,
            k,
            ids: vec![I::zero(); attr.rank_size * k],
            dists: vec![R::infinity(); attr.rank_size * k],
            _layout: PhantomData,
        };
        for point in 0..attr.rank_size {
            let gid = if point >= correct_rank_size {
                base_id + correct_rank_size - 1
            } else {
                base_id + point
            };
            for nn in 0..k {
                let lid = knn.linear_id(point, nn);
                knn.ids[lid] = to_index(gid);
            }
        }
        knn
    }

    #[inline(always)]
    pub fn linear_id(&self, point: usize, nn: usize) -> usize {
        L::linear_id(point, nn, self.attr.rank_size, self.k)
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn attributes(&self) -> DataAttributes {
        self.attr
    }

    pub fn ids(&self) -> &[I] {
        &self.ids
    }

    pub fn dists(&self) -> &[R] {
        &self.dists
    }

    /// Neighbor IDs of one point, in slot order.
    pub fn point_ids(&self, point: usize) -> Vec<I> {
        (0..self.k).map(|nn| self.ids[self.linear_id(point, nn)]).collect()
    }

    /// Squared neighbor distances of one point, in slot order.
    pub fn point_dists(&self, point: usize) -> Vec<R> {
        (0..self.k).map(|nn| self.dists[self.linear_id(point, nn)]).collect()
    }

    /// Overwrite both arrays from point-major scratch produced by a search
    /// round.
    pub(crate) fn write_back(&mut self, scratch_ids: &[I], scratch_dists: &[R]) {
        debug_assert_eq!(scratch_ids.len(), self.ids.len());
        for point in 0..self.attr.rank_size {
            for nn in 0..self.k {
                let lid = self.linear_id(point, nn);
                self.ids[lid] = scratch_ids[point * self.k + nn];
                self.dists[lid] = scratch_dists[point * self.k + nn];
            }
        }
    }

    /// Pass the result on to the right neighbor and adopt the left
    /// neighbor's, replacing both arrays in place.
    pub fn rotate(&mut self, comm: &Communicator) -> Result<()> {
        comm.sendrecv_replace(Tag::KnnIds, &mut self.ids)?;
        comm.sendrecv_replace(Tag::KnnDists, &mut self.dists)
    }

    /// The real points' neighbor IDs in point-major order, for serialization.
    pub fn ids_point_major(&self, correct_rank_size: usize) -> Vec<I> {
        let mut out = Vec::with_capacity(correct_rank_size * self.k);
        for point in 0..correct_rank_size {
            for nn in 0..self.k {
                out.push(self.ids[self.linear_id(point, nn)]);
            }
        }
        out
    }

    /// The real points' neighbor distances in point-major order with the
    /// square root applied, for serialization.
    pub fn dists_point_major_sqrt(&self, correct_rank_size: usize) -> Vec<R> {
        let mut out = Vec::with_capacity(correct_rank_size * self.k);
        for point in 0..correct_rank_size {
            for nn in 0..self.k {
                out.push(self.dists[self.linear_id(point, nn)].sqrt());
            }
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::layout::{Aos, Soa};
    use std::thread;

    #[test]
    fn test_initial_state() {
        let attr = DataAttributes::new(7, 2, 2);
        // last worker: 3 real points, 1 padded slot
        let knn = Knn::<f32, u32, Aos>::new(2, attr, 1, 2);
        assert_eq!(knn.point_ids(0), vec![4, 4]);
        assert_eq!(knn.point_ids(2), vec![6, 6]);
        // the padded slot is tagged with the last real ID
        assert_eq!(knn.point_ids(3), vec![6, 6]);
        assert!(knn.point_dists(0).iter().all(|d| d.is_infinite()));
    }

    #[test]
    fn test_layouts_agree() {
        let attr = DataAttributes::new(4, 2, 1);
        let aos = Knn::<f32, u32, Aos>::new(3, attr, 0, 1);
        let soa = Knn::<f32, u32, Soa>::new(3, attr, 0, 1);
        for point in 0..4 {
            assert_eq!(aos.point_ids(point), soa.point_ids(point));
        }
    }

    #[test]
    fn test_ring_closure() {
        let size = 3;
        let comms = Communicator::split(size);
        thread::scope(|s| {
            for comm in &comms {
                s.spawn(move || {
                    let attr = DataAttributes::new(6, 2, size);
                    let mut knn = Knn::<f32, u32, Aos>::new(1, attr, comm.rank(), size);
                    let tracer = knn.point_ids(0);
                    for _ in 0..size {
                        knn.rotate(comm).unwrap();
                        comm.barrier();
                    }
                    // after a full revolution the result is home again
                    assert_eq!(knn.point_ids(0), tracer);
                });
            }
        });
    }
}
