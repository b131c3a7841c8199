//! Quality of the produced neighbors against ground truth.
use crate::comm::Communicator;
use crate::error::Result;
use crate::knn::Knn;
use crate::layout::MemoryLayout;
use crate::scalar::{Index, Real};
use crate::utils::sort_reals;
use std::time::Instant;
use tracing::debug;

/// Result of the error-ratio evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ErrorRatio<R> {
    /// Mean ratio of produced to true neighbor distances, averaged over the
    /// workers. Only points with all `k` slots filled contribute.
    pub ratio: R,
    /// Number of points for which fewer than `k` neighbors were found.
    pub points_with_missing: usize,
    /// Total number of unfilled neighbor slots.
    pub missing_slots: usize,
}

/// Recall in percent: the share of produced neighbor IDs that appear in the
/// ground truth. `correct_ids` is this worker's point-major slice of the
/// ground-truth file. Padded points on the last worker are skipped.
pub fn recall<R, I, L>(
    knn: &Knn<R, I, L>,
    correct_ids: &[I],
    comm: &Communicator,
) -> Result<R>
where
    R: Real,
    I: Index,
    L: MemoryLayout,
{
    let start = Instant::now();
    let attr = knn.attributes();
    let k = knn.k();
    let correct_rank_size = attr.correct_rank_size(comm.rank(), comm.size());
    debug_assert!(correct_ids.len() >= correct_rank_size * k);

    let mut true_positives = 0u64;
    for point in 0..correct_rank_size {
        let truth = &correct_ids[point * k..(point + 1) * k];
        for nn in 0..k {
            let produced = knn.ids()[knn.linear_id(point, nn)];
            if truth.contains(&produced) {
                true_positives += 1;
            }
        }
    }

    let mut sums = vec![true_positives];
    comm.allreduce_sum(&mut sums)?;

    let relevant = R::from_usize(attr.total_size * k).unwrap_or_else(R::one);
    let result = R::from_u64(sums[0]).unwrap_or_else(R::zero) / relevant
        * R::from_f64(100.0).unwrap_or_else(R::one);
    debug!(
        rank = comm.rank(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "calculated recall"
    );
    Ok(result)
}

/// Mean error ratio sum(sqrt(produced) / true) over the filled points,
/// averaged across workers, plus the unfilled-slot counters.
/// `correct_dists` is this worker's point-major slice of the ground-truth
/// distance file (distances with the square root already applied).
pub fn error_ratio<R, I, L>(
    knn: &Knn<R, I, L>,
    correct_dists: &[R],
    comm: &Communicator,
) -> Result<ErrorRatio<R>>
where
    R: Real,
    I: Index,
    L: MemoryLayout,
{
    let start = Instant::now();
    let attr = knn.attributes();
    let k = knn.k();
    let correct_rank_size = attr.correct_rank_size(comm.rank(), comm.size());
    debug_assert!(correct_dists.len() >= correct_rank_size * k);

    let mut points_with_missing = 0u64;
    let mut missing_slots = 0u64;
    let mut ratio_sum = R::zero();
    let mut ratio_points = 0usize;

    let mut produced = vec![R::zero(); k];
    let mut truth = vec![R::zero(); k];
    for point in 0..correct_rank_size {
        for nn in 0..k {
            produced[nn] = knn.dists()[knn.linear_id(point, nn)];
        }
        let unfilled = produced.iter().filter(|d| d.is_infinite()).count();
        if unfilled != 0 {
            points_with_missing += 1;
            missing_slots += unfilled as u64;
            continue;
        }

        for out in produced.iter_mut() {
            *out = out.sqrt();
        }
        truth.copy_from_slice(&correct_dists[point * k..(point + 1) * k]);
        sort_reals(&mut produced);
        sort_reals(&mut truth);

        let mut point_ratio = R::zero();
        for nn in 0..k {
            if produced[nn] != R::zero() && truth[nn] != R::zero() {
                point_ratio += produced[nn] / truth[nn];
            } else {
                // identical zero distances count as a perfect match
                point_ratio += R::one();
            }
        }
        ratio_sum += point_ratio / R::from_usize(k).unwrap_or_else(R::one);
        ratio_points += 1;
    }

    let rank_mean = if ratio_points > 0 {
        ratio_sum / R::from_usize(ratio_points).unwrap_or_else(R::one)
    } else {
        R::zero()
    };

    let mut means = vec![rank_mean];
    comm.allreduce_sum(&mut means)?;
    let mut counters = vec![points_with_missing, missing_slots];
    comm.allreduce_sum(&mut counters)?;

    debug!(
        rank = comm.rank(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "calculated error ratio"
    );
    Ok(ErrorRatio {
        ratio: means[0] / R::from_usize(comm.size()).unwrap_or_else(R::one),
        points_with_missing: counters[0] as usize,
        missing_slots: counters[1] as usize,
    })
}
