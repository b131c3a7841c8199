use crate::scalar::Real;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::cmp::Ordering;

/// Create the RNG used by the hash family builders.
///
/// # Arguments
/// * `seed` - Seed for the RNG. If 0, the RNG is seeded from the OS.
pub fn create_rng(seed: u64) -> SmallRng {
    if seed == 0 {
        SmallRng::from_entropy()
    } else {
        SmallRng::seed_from_u64(seed)
    }
}

/// Sort a slice of reals. NaNs compare equal so the sort is total.
pub fn sort_reals<R: Real>(v: &mut [R]) {
    v.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_seeded_rng_is_deterministic() {
        let mut a = create_rng(42);
        let mut b = create_rng(42);
        let va: Vec<u64> = (0..8).map(|_| a.gen()).collect();
        let vb: Vec<u64> = (0..8).map(|_| b.gen()).collect();
        assert_eq!(va, vb);
    }

    #[test]
    fn test_sort_reals() {
        let mut v = vec![3.0f32, -1.0, 2.5, 0.0];
        sort_reals(&mut v);
        assert_eq!(v, vec![-1.0, 0.0, 2.5, 3.0]);
    }
}
