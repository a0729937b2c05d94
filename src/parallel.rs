//! Data-parallel training over identically built replicas
//!
//! Each replica runs its own shard concurrently on the rayon pool and
//! accumulates its own deltas. Merging is serial: the set holds `&mut` to
//! the master and every replica, so no other access can overlap an exchange.

use log::{debug, warn};
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::network::Network;
use crate::training::{ErrorStats, Sample};

/// A master network plus worker replicas of the same structure.
pub struct ReplicaSet {
    master: Network,
    replicas: Vec<Network>,
}

impl ReplicaSet {
    /// Connect every network and copy the master's parameters into the replicas.
    pub fn new(mut master: Network, mut replicas: Vec<Network>) -> Result<Self> {
        master.connect()?;
        for replica in &mut replicas {
            replica.connect()?;
            replica.reset();
            replica.exchange(&mut master)?;
        }
        if replicas.is_empty() {
            warn!("replica set created without replicas; merges will be no-ops");
        }
        Ok(Self { master, replicas })
    }

    /// Build a master and `count` replicas from the same constructor.
    pub fn from_factory(count: usize, mut build: impl FnMut() -> Result<Network>) -> Result<Self> {
        let master = build()?;
        let replicas = (0..count).map(|_| build()).collect::<Result<Vec<_>>>()?;
        Self::new(master, replicas)
    }

    pub fn master(&self) -> &Network {
        &self.master
    }

    pub fn master_mut(&mut self) -> &mut Network {
        &mut self.master
    }

    pub fn replicas(&self) -> &[Network] {
        &self.replicas
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    pub fn into_master(self) -> Network {
        self.master
    }

    /// Run reset, then exe+fit per sample, on every replica in parallel.
    ///
    /// `shards[i]` goes to replica `i`. Returns the error spread over all
    /// shards, measured before any update.
    pub fn run_shards(&mut self, shards: &[&[Sample]]) -> Result<ErrorStats> {
        if shards.len() != self.replicas.len() {
            return Err(Error::Config(format!(
                "{} shards for {} replicas",
                shards.len(),
                self.replicas.len()
            )));
        }

        let per_replica = self
            .replicas
            .par_iter_mut()
            .zip(shards.par_iter())
            .map(|(replica, shard)| -> Result<ErrorStats> {
                replica.reset();
                let mut stats = ErrorStats::default();
                for (input, target) in shard.iter() {
                    replica.exe(input)?;
                    stats.record(replica.err(target)?);
                    replica.fit(target)?;
                }
                Ok(stats)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut total = ErrorStats::default();
        for stats in &per_replica {
            total.merge(stats);
        }
        Ok(total)
    }

    /// Fold every replica's deltas into the master, one optimizer step each,
    /// then hand the merged parameters back to all replicas.
    pub fn merge(&mut self, rate: f32) -> Result<()> {
        if self.replicas.is_empty() {
            warn!("merge called on a replica set without replicas");
            return Ok(());
        }
        for (i, replica) in self.replicas.iter_mut().enumerate() {
            replica.exchange(&mut self.master)?;
            self.master.apply(rate, i as u64);
        }
        for replica in &mut self.replicas {
            replica.exchange(&mut self.master)?;
        }
        debug!("merged {} replicas at rate {}", self.replicas.len(), rate);
        Ok(())
    }

    /// Split `batch` evenly across the replicas, run it, and merge.
    ///
    /// Returns the mean error over the batch.
    pub fn train_batch(&mut self, batch: &[Sample], rate: f32) -> Result<f32> {
        Ok(self.train_batch_stats(batch, rate)?.mean())
    }

    /// Same as [`train_batch`](Self::train_batch), keeping the full error spread.
    pub fn train_batch_stats(&mut self, batch: &[Sample], rate: f32) -> Result<ErrorStats> {
        let count = self.replicas.len();
        if count == 0 {
            warn!("train_batch called on a replica set without replicas");
            return Ok(ErrorStats::default());
        }
        let size = batch.len().div_ceil(count).max(1);
        let mut shards: Vec<&[Sample]> = batch.chunks(size).collect();
        shards.resize(count, &[]);

        let stats = self.run_shards(&shards)?;
        self.merge(rate)?;
        Ok(stats)
    }
}
