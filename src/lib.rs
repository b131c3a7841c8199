//! Distributed approximate k-nearest-neighbor search with locality
//! sensitive hashing.
//!
//! The point set is split into equally sized shards, one per worker. Every
//! worker buckets its own shard into flat LSH hash tables (the hash family
//! is identical everywhere) and the shards then travel a ring: each round a
//! worker re-hashes the visiting points against its local tables and
//! refines their running top-k, overlapping the computation with the
//! exchange of the next shard. After a full revolution every worker holds
//! the finished neighbors of the points it owns.
//!
//! # Example
//!
//! ```no_run
//! use lsh_knn::layout::Aos;
//! use lsh_knn::run::{execute, Job};
//!
//! let mut job: Job = Job::new("points.bin", 6, 4);
//! job.options.num_hash_tables = 16;
//! job.options.seed = 42;
//! let report = execute::<f32, u32, u32, Aos>(&job).unwrap();
//! println!("{:?}", report.recall);
//! ```
pub mod comm;
pub mod constants;
pub mod engine;
pub mod error;
pub mod evaluate;
pub mod hash;
pub mod io;
pub mod knn;
pub mod layout;
pub mod options;
pub mod prelude;
pub mod ring;
pub mod run;
pub mod scalar;
pub mod shard;
pub mod table;
pub mod utils;

pub use crate::run::{execute, Job, QualityReport};
