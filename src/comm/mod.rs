//! Message passing between the workers of one search job.
//!
//! Workers share nothing; every exchange goes through one dedicated channel
//! per ordered worker pair, so messages between a pair stay FIFO. A small
//! tag distinguishes concurrent traffic on the same link (the background
//! shard transfer and the foreground neighbor rotation overlap within a ring
//! round). Receives for one source are serialized behind a lock: at most one
//! thread of a worker is inside a receive at a time, and mismatching tags
//! are stashed until their receiver shows up.
pub mod sort;

use crate::constants::MASTER;
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::ops::AddAssign;
use std::sync::{Arc, Barrier, Mutex};

/// Tags distinguishing message streams between the same worker pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tag {
    Shard,
    KnnIds,
    KnnDists,
    SortMerge,
    SortSorted,
    Collective,
    Gather,
}

struct Packet {
    tag: Tag,
    payload: Vec<u8>,
}

struct Inbox {
    rx: Receiver<Packet>,
    stash: VecDeque<Packet>,
}

/// One worker's endpoint of the job-wide communication fabric.
pub struct Communicator {
    rank: usize,
    size: usize,
    /// Senders indexed by destination rank.
    links: Vec<Sender<Packet>>,
    /// Receivers indexed by source rank.
    inboxes: Vec<Mutex<Inbox>>,
    barrier: Arc<Barrier>,
}

impl Communicator {
    /// Create the endpoints for a group of `size` workers.
    pub fn split(size: usize) -> Vec<Communicator> {
        assert!(size > 0, "a communicator group needs at least one worker");

        let barrier = Arc::new(Barrier::new(size));

        // channel grid: tx_grid[src][dst] sends, rx_at[dst][src] receives
        let mut tx_grid: Vec<Vec<Sender<Packet>>> = Vec::with_capacity(size);
        let mut rx_at: Vec<Vec<Receiver<Packet>>> = (0..size).map(|_| Vec::with_capacity(size)).collect();
        for _src in 0..size {
            let mut txs = Vec::with_capacity(size);
            for dst in 0..size {
                let (tx, rx) = unbounded();
                txs.push(tx);
                rx_at[dst].push(rx);
            }
            tx_grid.push(txs);
        }

        tx_grid
            .into_iter()
            .zip(rx_at)
            .enumerate()
            .map(|(rank, (links, rxs))| Communicator {
                rank,
                size,
                links,
                inboxes: rxs
                    .into_iter()
                    .map(|rx| {
                        Mutex::new(Inbox {
                            rx,
                            stash: VecDeque::new(),
                        })
                    })
                    .collect(),
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_master(&self) -> bool {
        self.rank == MASTER
    }

    /// Destination of the ring pattern.
    pub fn right(&self) -> usize {
        (self.rank + 1) % self.size
    }

    /// Source of the ring pattern.
    pub fn left(&self) -> usize {
        (self.rank + self.size - 1) % self.size
    }

    fn send_bytes(&self, dst: usize, tag: Tag, payload: Vec<u8>) -> Result<()> {
        self.links[dst]
            .send(Packet { tag, payload })
            .map_err(|_| Error::Disconnected(format!("worker {} is gone", dst)))
    }

    fn recv_bytes(&self, src: usize, tag: Tag) -> Result<Vec<u8>> {
        let mut inbox = self.inboxes[src]
            .lock()
            .map_err(|_| Error::Disconnected(format!("inbox of worker {} is poisoned", src)))?;
        if let Some(pos) = inbox.stash.iter().position(|p| p.tag == tag) {
            // remove() on an in-range position always yields a packet
            return Ok(inbox.stash.remove(pos).map(|p| p.payload).unwrap_or_default());
        }
        loop {
            let packet = inbox
                .rx
                .recv()
                .map_err(|_| Error::Disconnected(format!("worker {} is gone", src)))?;
            if packet.tag == tag {
                return Ok(packet.payload);
            }
            inbox.stash.push_back(packet);
        }
    }

    pub fn send<T: Serialize>(&self, dst: usize, tag: Tag, data: &[T]) -> Result<()> {
        self.send_bytes(dst, tag, bincode::serialize(data)?)
    }

    pub fn recv<T: DeserializeOwned>(&self, src: usize, tag: Tag) -> Result<Vec<T>> {
        Ok(bincode::deserialize(&self.recv_bytes(src, tag)?)?)
    }

    /// Send `outgoing` to the right neighbor and fill `incoming` from the
    /// left neighbor.
    pub fn ring_exchange<T>(&self, tag: Tag, outgoing: &[T], incoming: &mut [T]) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Copy,
    {
        self.send(self.right(), tag, outgoing)?;
        let received: Vec<T> = self.recv(self.left(), tag)?;
        if received.len() != incoming.len() {
            return Err(Error::Payload(format!(
                "ring exchange expected {} values, received {}",
                incoming.len(),
                received.len()
            )));
        }
        incoming.copy_from_slice(&received);
        Ok(())
    }

    /// Ring exchange replacing `buf` in place.
    pub fn sendrecv_replace<T>(&self, tag: Tag, buf: &mut [T]) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Copy,
    {
        self.send(self.right(), tag, buf)?;
        let received: Vec<T> = self.recv(self.left(), tag)?;
        if received.len() != buf.len() {
            return Err(Error::Payload(format!(
                "ring exchange expected {} values, received {}",
                buf.len(),
                received.len()
            )));
        }
        buf.copy_from_slice(&received);
        Ok(())
    }

    /// Replace every worker's `buf` with the master's.
    pub fn broadcast<T>(&self, buf: &mut Vec<T>) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        if self.rank == MASTER {
            for dst in 1..self.size {
                self.send(dst, Tag::Collective, buf)?;
            }
        } else {
            *buf = self.recv(MASTER, Tag::Collective)?;
        }
        Ok(())
    }

    /// Element-wise sum of `buf` over all workers; the result replaces `buf`
    /// everywhere.
    pub fn allreduce_sum<T>(&self, buf: &mut Vec<T>) -> Result<()>
    where
        T: Serialize + DeserializeOwned + AddAssign + Copy,
    {
        if self.rank == MASTER {
            for src in 1..self.size {
                let part: Vec<T> = self.recv(src, Tag::Collective)?;
                if part.len() != buf.len() {
                    return Err(Error::Payload(format!(
                        "reduction expected {} values from worker {}, received {}",
                        buf.len(),
                        src,
                        part.len()
                    )));
                }
                for (acc, v) in buf.iter_mut().zip(part) {
                    *acc += v;
                }
            }
            for dst in 1..self.size {
                self.send(dst, Tag::Collective, buf)?;
            }
        } else {
            self.send(MASTER, Tag::Collective, buf)?;
            *buf = self.recv(MASTER, Tag::Collective)?;
        }
        Ok(())
    }

    /// Block until every worker of the group arrives.
    pub fn barrier(&self) {
        self.barrier.wait();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_send_recv() {
        let comms = Communicator::split(2);
        thread::scope(|s| {
            let (c0, c1) = {
                let mut it = comms.iter();
                (it.next().unwrap(), it.next().unwrap())
            };
            s.spawn(move || {
                c0.send(1, Tag::Gather, &[1u32, 2, 3]).unwrap();
            });
            s.spawn(move || {
                let v: Vec<u32> = c1.recv(0, Tag::Gather).unwrap();
                assert_eq!(v, vec![1, 2, 3]);
            });
        });
    }

    #[test]
    fn test_out_of_order_tags_are_stashed() {
        let comms = Communicator::split(2);
        let c0 = &comms[0];
        let c1 = &comms[1];
        c0.send(1, Tag::Shard, &[1.0f32]).unwrap();
        c0.send(1, Tag::KnnIds, &[7u32]).unwrap();
        // receive in the opposite order
        let ids: Vec<u32> = c1.recv(0, Tag::KnnIds).unwrap();
        let shard: Vec<f32> = c1.recv(0, Tag::Shard).unwrap();
        assert_eq!(ids, vec![7]);
        assert_eq!(shard, vec![1.0]);
    }

    #[test]
    fn test_broadcast_and_allreduce() {
        let comms = Communicator::split(3);
        thread::scope(|s| {
            for comm in &comms {
                s.spawn(move || {
                    let mut buf = if comm.is_master() {
                        vec![1u64, 2, 3]
                    } else {
                        Vec::new()
                    };
                    comm.broadcast(&mut buf).unwrap();
                    assert_eq!(buf, vec![1, 2, 3]);

                    let mut sums = vec![comm.rank() as u64, 1];
                    comm.allreduce_sum(&mut sums).unwrap();
                    assert_eq!(sums, vec![3, 3]);
                });
            }
        });
    }

    #[test]
    fn test_ring_rotation_comes_home() {
        let size = 3;
        let comms = Communicator::split(size);
        thread::scope(|s| {
            for comm in &comms {
                s.spawn(move || {
                    let mut buf = vec![comm.rank() as u64];
                    for _ in 0..size {
                        comm.sendrecv_replace(Tag::KnnIds, &mut buf).unwrap();
                        comm.barrier();
                    }
                    assert_eq!(buf, vec![comm.rank() as u64]);
                });
            }
        });
    }

    #[test]
    fn test_single_worker_ring_is_identity() {
        let comms = Communicator::split(1);
        let comm = &comms[0];
        let mut buf = vec![5u32, 6];
        comm.sendrecv_replace(Tag::KnnIds, &mut buf).unwrap();
        assert_eq!(buf, vec![5, 6]);
    }
}
