/// Number of candidate IDs a distance kernel processes per block. The bucket
/// arrays carry a tail of this many sentinel entries so blocked reads never
/// need a bounds branch.
pub const BLOCKING_SIZE: usize = 8;

/// Rank of the worker that builds hash pools, writes gathered files and
/// reports results.
pub const MASTER: usize = 0;
