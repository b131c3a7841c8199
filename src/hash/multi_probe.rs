//! Multi-probe LSH queries.
//!
//! Instead of relying on many hash tables alone, a query can additionally
//! probe the buckets a point *almost* hashed to: per hash function the
//! projection sits inside a slot of width `w`, and shifting that slot by one
//! in either direction yields a neighboring bucket. The perturbations whose
//! slot boundary lies closest to the projection are the most promising ones
//! and are probed first.
use crate::scalar::{HashWord, Real};
use crate::shard::DataAttributes;

/// Probing view of a hash family. Implemented by families whose hash values
/// are built from per-function slot values that can be perturbed.
pub trait MultiProbe<R: Real, H: HashWord> {
    /// Number of hash functions per hash table.
    fn functions_per_table(&self) -> usize;

    /// Distances of the point's projection under `function` to the lower
    /// and upper boundary of its slot.
    fn slot_boundaries(
        &self,
        table: usize,
        point: usize,
        data: &[R],
        attr: &DataAttributes,
        function: usize,
    ) -> (R, R);

    /// Hash of the point with the slot value of `function` shifted by
    /// `delta`. The result is always less than the configured hash table
    /// size.
    fn probe_hash(
        &self,
        table: usize,
        point: usize,
        data: &[R],
        attr: &DataAttributes,
        function: usize,
        delta: i64,
    ) -> H;
}

/// The `count` slot perturbations closest to their boundary, as
/// `(function, delta)` pairs. The selection keeps the current worst probe at
/// a tracked index so every candidate needs a single compare.
pub fn probing_sequence<R, H>(
    prober: &dyn MultiProbe<R, H>,
    table: usize,
    point: usize,
    data: &[R],
    attr: &DataAttributes,
    count: usize,
) -> Vec<(usize, i64)>
where
    R: Real,
    H: HashWord,
{
    if count == 0 {
        return Vec::new();
    }

    let mut probes = vec![(0usize, 0i64); count];
    let mut dists = vec![R::infinity(); count];
    let mut argmax = 0;

    for function in 0..prober.functions_per_table() {
        let (down, up) = prober.slot_boundaries(table, point, data, attr, function);
        for (delta, dist) in [(-1i64, down), (1i64, up)] {
            if dists[argmax] > dist {
                probes[argmax] = (function, delta);
                dists[argmax] = dist;
                argmax = 0;
                for i in 1..count {
                    if dists[i] > dists[argmax] {
                        argmax = i;
                    }
                }
            }
        }
    }
    probes
}

#[cfg(test)]
mod test {
    use super::*;

    /// Prober with fixed boundary distances per function.
    struct FixedBoundaries {
        bounds: Vec<(f32, f32)>,
    }

    impl MultiProbe<f32, u32> for FixedBoundaries {
        fn functions_per_table(&self) -> usize {
            self.bounds.len()
        }

        fn slot_boundaries(
            &self,
            _table: usize,
            _point: usize,
            _data: &[f32],
            _attr: &DataAttributes,
            function: usize,
        ) -> (f32, f32) {
            self.bounds[function]
        }

        fn probe_hash(
            &self,
            _table: usize,
            _point: usize,
            _data: &[f32],
            _attr: &DataAttributes,
            function: usize,
            delta: i64,
        ) -> u32 {
            (function as u32) * 2 + (delta > 0) as u32
        }
    }

    #[test]
    fn test_closest_perturbations_are_selected() {
        let prober = FixedBoundaries {
            bounds: vec![(0.5, 0.7), (0.1, 0.9), (0.3, 0.2)],
        };
        let attr = DataAttributes::new(1, 1, 1);

        let mut probes = probing_sequence(&prober, 0, 0, &[0.0], &attr, 2);
        probes.sort_unstable();
        // closest boundaries: 0.1 below function 1, 0.2 above function 2
        assert_eq!(probes, vec![(1, -1), (2, 1)]);
    }

    #[test]
    fn test_all_slots_are_filled() {
        let prober = FixedBoundaries {
            bounds: vec![(0.5, 0.5), (0.5, 0.5)],
        };
        let attr = DataAttributes::new(1, 1, 1);

        let probes = probing_sequence(&prober, 0, 0, &[0.0], &attr, 4);
        let mut seen = probes.clone();
        seen.sort_unstable();
        seen.dedup();
        // every candidate perturbation shows up exactly once
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_empty_sequence() {
        let prober = FixedBoundaries {
            bounds: vec![(0.5, 0.5)],
        };
        let attr = DataAttributes::new(1, 1, 1);
        assert!(probing_sequence(&prober, 0, 0, &[0.0], &attr, 0).is_empty());
    }
}
