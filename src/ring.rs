//! The P-round ring driving the distributed search.
//!
//! Every round a worker refines the top-k of the shard it currently holds
//! while the next shard is already being exchanged in the background; the
//! running result follows the shard around the ring. After P rounds every
//! shard has visited every worker exactly once and the result is back with
//! its owner.
use crate::comm::{Communicator, Tag};
use crate::engine;
use crate::error::{Error, Result};
use crate::hash::LshHash;
use crate::knn::Knn;
use crate::layout::MemoryLayout;
use crate::scalar::{HashWord, Index, Real};
use crate::shard::Shard;
use crate::table::HashTables;
use std::thread;
use std::time::Instant;
use tracing::debug;

pub fn search<R, I, H, L, F>(
    tables: &HashTables<R, I, H, L, F>,
    shard: &mut Shard<R, L>,
    k: usize,
    comm: &Communicator,
) -> Result<Knn<R, I, L>>
where
    R: Real,
    I: Index,
    H: HashWord,
    L: MemoryLayout,
    F: LshHash<R, H>,
{
    let attr = shard.attributes();
    if k < 1 || k >= attr.rank_size {
        return Err(Error::Config(format!(
            "k ({}) must be in the range [1, number of points per worker ({}))",
            k, attr.rank_size
        )));
    }

    let start = Instant::now();
    let mut knn = Knn::new(k, attr, comm.rank(), comm.size());

    for round in 0..comm.size() {
        let round_start = Instant::now();
        // owner of the shard this worker holds in this round
        let origin = (comm.rank() + comm.size() - round) % comm.size();

        let (owned, active, shadow) = shard.split_for_round();
        thread::scope(|scope| -> Result<()> {
            // the next shard travels while this round computes
            let transfer = scope.spawn(move || comm.ring_exchange(Tag::Shard, active, shadow));

            engine::knn_round(tables, owned, active, origin * attr.rank_size, &mut knn);
            knn.rotate(comm)?;

            transfer
                .join()
                .map_err(|_| Error::Disconnected("shard transfer thread panicked".to_string()))?
        })?;
        shard.swap_buffers();
        comm.barrier();

        debug!(
            rank = comm.rank(),
            round,
            elapsed_ms = round_start.elapsed().as_millis() as u64,
            "finished ring round"
        );
    }

    debug!(
        rank = comm.rank(),
        k,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "calculated k-nearest-neighbors"
    );
    Ok(knn)
}
