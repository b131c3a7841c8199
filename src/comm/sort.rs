//! Distributed odd-even transposition sort.
//!
//! Every worker holds an equally sized vector of reals; after the sort the
//! concatenation of the vectors in rank order is globally sorted. Used to
//! derive the global quantile cut-off points of the entropy-based and mixed
//! hash families.
use super::{Communicator, Tag};
use crate::error::{Error, Result};
use crate::scalar::Real;
use crate::utils::sort_reals;

/// Merge step between a worker pair. The lower rank ends up with the lower
/// half of the merged values.
fn pairwise_exchange<R: Real>(
    data: &mut [R],
    sendrank: usize,
    recvrank: usize,
    comm: &Communicator,
) -> Result<()> {
    if comm.rank() == sendrank {
        comm.send(recvrank, Tag::SortMerge, data)?;
        let sorted: Vec<R> = comm.recv(recvrank, Tag::SortSorted)?;
        if sorted.len() != data.len() {
            return Err(Error::Payload(format!(
                "merge partner returned {} values, expected {}",
                sorted.len(),
                data.len()
            )));
        }
        data.copy_from_slice(&sorted);
    } else {
        let mut all = Vec::with_capacity(2 * data.len());
        all.extend_from_slice(data);
        let theirs: Vec<R> = comm.recv(sendrank, Tag::SortMerge)?;
        if theirs.len() != data.len() {
            return Err(Error::Payload(format!(
                "merge partner sent {} values, expected {}",
                theirs.len(),
                data.len()
            )));
        }
        all.extend(theirs);
        sort_reals(&mut all);

        let (their_half, my_half) = if sendrank > comm.rank() {
            (&all[data.len()..], &all[..data.len()])
        } else {
            (&all[..data.len()], &all[data.len()..])
        };
        comm.send(sendrank, Tag::SortSorted, their_half)?;
        data.copy_from_slice(my_half);
    }
    Ok(())
}

/// Sort `data` across all workers of `comm`. With a single worker this is a
/// plain local sort.
pub fn odd_even_sort<R: Real>(data: &mut [R], comm: &Communicator) -> Result<()> {
    sort_reals(data);

    for phase in 1..=comm.size() {
        if (phase + comm.rank()) % 2 == 0 {
            if comm.rank() < comm.size() - 1 {
                pairwise_exchange(data, comm.rank(), comm.rank() + 1, comm)?;
            }
        } else if comm.rank() > 0 {
            pairwise_exchange(data, comm.rank() - 1, comm.rank(), comm)?;
        }
    }
    Ok(())
}
