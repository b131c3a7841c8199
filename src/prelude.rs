//! Re-export of the public api of lsh-knn.
pub use crate::{
    comm::{sort::odd_even_sort, Communicator, Tag},
    engine::knn_round,
    error::{Error, Result},
    evaluate::{error_ratio, recall, ErrorRatio},
    hash::{EntropyBased, LshHash, Mixed, MultiProbe, RandomProjections},
    io::ParserKind,
    knn::Knn,
    layout::{Aos, MemoryLayout, Soa},
    options::{HashFamilyKind, Options},
    ring::search,
    run::{execute, Job, QualityReport},
    scalar::{HashWord, Index, Real},
    shard::{DataAttributes, Shard},
    table::HashTables,
};
