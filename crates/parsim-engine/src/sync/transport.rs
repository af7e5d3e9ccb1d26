//! The inter-rank transport seam. The sync manager drives collectives
//! through this trait; the MPI binding lives outside the core. In-tree
//! implementations: a loopback for single-rank runs and a
//! crossbeam-channel mesh for in-process multi-rank runs and tests.
//!
//! Collectives are globally ordered: every rank issues the same sequence
//! of calls, and per-sender channel FIFO keeps them matched. A transport
//! failure is fatal; there is no in-band retry.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parsim_types::errors::SyncError;
use parsim_types::ids::RankId;
use std::time::Duration;

pub trait RankTransport: Send {
    fn num_ranks(&self) -> u32;
    fn my_rank(&self) -> u32;

    /// All-to-all exchange: `out` carries one byte packet per destination
    /// rank; the result carries one packet per source rank (absent
    /// entries mean the peer sent nothing).
    fn exchange(&mut self, out: Vec<(RankId, Vec<u8>)>) -> Result<Vec<(RankId, Vec<u8>)>, SyncError>;

    fn allreduce_sum(&mut self, value: u64) -> Result<u64, SyncError>;
    fn allreduce_max(&mut self, value: u64) -> Result<u64, SyncError>;
    fn barrier(&mut self) -> Result<(), SyncError>;
}

/// The single-rank transport: every collective is the identity.
#[derive(Default)]
pub struct LoopbackTransport;

impl RankTransport for LoopbackTransport {
    fn num_ranks(&self) -> u32 {
        1
    }

    fn my_rank(&self) -> u32 {
        0
    }

    fn exchange(
        &mut self,
        _out: Vec<(RankId, Vec<u8>)>,
    ) -> Result<Vec<(RankId, Vec<u8>)>, SyncError> {
        Ok(Vec::new())
    }

    fn allreduce_sum(&mut self, value: u64) -> Result<u64, SyncError> {
        Ok(value)
    }

    fn allreduce_max(&mut self, value: u64) -> Result<u64, SyncError> {
        Ok(value)
    }

    fn barrier(&mut self) -> Result<(), SyncError> {
        Ok(())
    }
}

enum Packet {
    Data(Vec<u8>),
    Value(u64),
}

/// An in-process rank mesh over crossbeam channels.
pub struct ChannelTransport {
    rank: RankId,
    num_ranks: u32,
    /// Indexed by destination rank; the self entry is unused.
    senders: Vec<Sender<(RankId, Packet)>>,
    receiver: Receiver<(RankId, Packet)>,
    timeout: Duration,
}

impl ChannelTransport {
    /// Builds a fully-connected mesh of `n` transports.
    pub fn mesh(n: u32) -> Vec<ChannelTransport> {
        let mut channels: Vec<(Sender<(RankId, Packet)>, Receiver<(RankId, Packet)>)> =
            (0..n).map(|_| unbounded()).collect();
        let senders: Vec<Sender<(RankId, Packet)>> =
            channels.iter().map(|(tx, _)| tx.clone()).collect();
        channels
            .drain(..)
            .enumerate()
            .map(|(rank, (_, rx))| ChannelTransport {
                rank: rank as RankId,
                num_ranks: n,
                senders: senders.clone(),
                receiver: rx,
                timeout: Duration::from_secs(30),
            })
            .collect()
    }

    fn peers(&self) -> impl Iterator<Item = RankId> + '_ {
        (0..self.num_ranks).filter(move |r| *r != self.rank)
    }

    fn send_to(&self, rank: RankId, packet: Packet) -> Result<(), SyncError> {
        self.senders[rank as usize]
            .send((self.rank, packet))
            .map_err(|_| SyncError::Transport(format!("peer rank {rank} is gone")))
    }

    /// Receives one packet from every peer.
    fn gather(&self) -> Result<Vec<(RankId, Packet)>, SyncError> {
        let expected = (self.num_ranks - 1) as usize;
        let mut received = Vec::with_capacity(expected);
        while received.len() < expected {
            let item = self
                .receiver
                .recv_timeout(self.timeout)
                .map_err(|_| SyncError::Transport("exchange timed out".to_string()))?;
            received.push(item);
        }
        Ok(received)
    }
}

impl RankTransport for ChannelTransport {
    fn num_ranks(&self) -> u32 {
        self.num_ranks
    }

    fn my_rank(&self) -> u32 {
        self.rank
    }

    fn exchange(&mut self, out: Vec<(RankId, Vec<u8>)>) -> Result<Vec<(RankId, Vec<u8>)>, SyncError> {
        let mut staged: Vec<Vec<u8>> = vec![Vec::new(); self.num_ranks as usize];
        for (rank, bytes) in out {
            staged[rank as usize] = bytes;
        }
        for peer in self.peers().collect::<Vec<_>>() {
            self.send_to(peer, Packet::Data(std::mem::take(&mut staged[peer as usize])))?;
        }
        let mut result = Vec::new();
        for (from, packet) in self.gather()? {
            match packet {
                Packet::Data(bytes) => {
                    if !bytes.is_empty() {
                        result.push((from, bytes));
                    }
                }
                Packet::Value(_) => {
                    return Err(SyncError::Transport(
                        "collective ordering violated (value during exchange)".to_string(),
                    ))
                }
            }
        }
        result.sort_by_key(|(from, _)| *from);
        Ok(result)
    }

    fn allreduce_sum(&mut self, value: u64) -> Result<u64, SyncError> {
        self.reduce(value, |a, b| a.wrapping_add(b))
    }

    fn allreduce_max(&mut self, value: u64) -> Result<u64, SyncError> {
        self.reduce(value, u64::max)
    }

    fn barrier(&mut self) -> Result<(), SyncError> {
        self.reduce(0, |a, _| a)?;
        Ok(())
    }
}

impl ChannelTransport {
    fn reduce(&mut self, value: u64, fold: impl Fn(u64, u64) -> u64) -> Result<u64, SyncError> {
        for peer in self.peers().collect::<Vec<_>>() {
            self.send_to(peer, Packet::Value(value))?;
        }
        let mut acc = value;
        for (_, packet) in self.gather()? {
            match packet {
                Packet::Value(v) => acc = fold(acc, v),
                Packet::Data(_) => {
                    return Err(SyncError::Transport(
                        "collective ordering violated (data during reduce)".to_string(),
                    ))
                }
            }
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_reduces_and_exchanges() {
        let transports = ChannelTransport::mesh(3);
        let handles: Vec<_> = transports
            .into_iter()
            .map(|mut t| {
                std::thread::spawn(move || {
                    let rank = t.my_rank() as u64;
                    assert_eq!(t.allreduce_sum(rank + 1).unwrap(), 6);
                    assert_eq!(t.allreduce_max(rank).unwrap(), 2);

                    // Everyone sends its rank byte to every peer.
                    let out: Vec<(RankId, Vec<u8>)> = (0..3)
                        .filter(|r| *r != t.my_rank())
                        .map(|r| (r, vec![t.my_rank() as u8]))
                        .collect();
                    let received = t.exchange(out).unwrap();
                    assert_eq!(received.len(), 2);
                    for (from, bytes) in received {
                        assert_eq!(bytes, vec![from as u8]);
                    }
                    t.barrier().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn loopback_is_identity() {
        let mut t = LoopbackTransport;
        assert_eq!(t.allreduce_sum(5).unwrap(), 5);
        assert!(t.exchange(vec![]).unwrap().is_empty());
    }
}
