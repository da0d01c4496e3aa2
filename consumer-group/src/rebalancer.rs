//! Rebalance protocol and the `claim!` state machine.
//!
//! Runs under the caller's held group lock (see [`crate::group`]); every
//! method here takes `state: &mut GroupState` rather than locking
//! internally, so a whole rebalance pass is atomic w.r.t. checkout/close
//! on the same instance.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;

use crate::assignment::pick;
use crate::broker::{InitialOffset, PartitionFetcherFactory};
use crate::coordinator::{paths, Coordinator, CoordinatorError, WatchEventKind};
use crate::error::{Error, Result};
use crate::metadata::MetadataView;
use crate::partition_consumer::PartitionConsumer;

pub struct GroupState {
    pub metadata: MetadataView,
    pub claimed: Vec<PartitionConsumer>,
}

impl GroupState {
    pub fn new(metadata: MetadataView) -> Self {
        Self {
            metadata,
            claimed: Vec::new(),
        }
    }
}

pub struct Rebalancer {
    coordinator: Arc<dyn Coordinator>,
    fetcher_factory: Arc<dyn PartitionFetcherFactory>,
    group_name: String,
    topic: String,
    member_id: String,
    trail: bool,
    /// Forwards every raw members-directory change the installed watch
    /// observes. The rebalance-driver task (see `crate::group`) is the
    /// sole reader and owns the pending-flag coalescing; this is the
    /// dispatch boundary that keeps a watch's background task from ever
    /// taking the group lock directly.
    rebalance_tx: mpsc::UnboundedSender<()>,
}

impl Rebalancer {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        fetcher_factory: Arc<dyn PartitionFetcherFactory>,
        group_name: String,
        topic: String,
        member_id: String,
        trail: bool,
        rebalance_tx: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            coordinator,
            fetcher_factory,
            group_name,
            topic,
            member_id,
            trail,
            rebalance_tx,
        }
    }

    /// One full rebalance pass: reload metadata, recompute this member's
    /// owned range against the live member set, release what's no longer
    /// ours and claim what newly is. Installs a fresh one-shot watch on
    /// the members directory before returning — the next membership
    /// change sends on `rebalance_tx` and the watch task then exits,
    /// mirroring a ZooKeeper-style one-shot watch.
    pub async fn rebalance(&self, state: &mut GroupState) -> Result<()> {
        state.metadata.reload().await?;

        let (children, watch) = self
            .coordinator
            .children(&paths::ids_dir(&self.group_name), true)
            .await?;
        if let Some(mut handle) = watch {
            let tx = self.rebalance_tx.clone();
            tokio::spawn(async move {
                if handle.next().await.is_some() {
                    let _ = tx.send(());
                }
            });
        }

        let partitions = state.metadata.partitions().await?;
        let owned_range = pick(partitions.len() as u32, &children, &self.member_id);

        // `pick` returns a range over positions in the sorted, available
        // partition list, not over partition ids themselves — slice by
        // position before reading out the ids.
        let desired: Vec<u32> = match &owned_range {
            Some(range) => {
                let start = *range.start() as usize;
                let end = *range.end() as usize;
                partitions[start..=end].iter().map(|p| p.id).collect()
            }
            None => Vec::new(),
        };

        let held: Vec<u32> = state.claimed.iter().map(|c| c.partition()).collect();
        let to_release: Vec<u32> = held.iter().copied().filter(|p| !desired.contains(p)).collect();
        let to_claim: Vec<u32> = desired.iter().copied().filter(|p| !held.contains(p)).collect();

        for partition in to_release {
            self.release(state, partition).await?;
        }
        for partition in to_claim {
            self.claim(state, partition).await?;
        }

        Ok(())
    }

    async fn release(&self, state: &mut GroupState, partition: u32) -> Result<()> {
        let path = paths::owner_path(&self.group_name, &self.topic, partition);
        match self.coordinator.delete(&path, true).await {
            Ok(()) => {}
            Err(e) => return Err(Error::Coordinator(e)),
        }
        state.claimed.retain(|c| c.partition() != partition);
        metrics::counter!("consumer_group_partitions_released").increment(1);
        tracing::info!(partition, "released partition");
        Ok(())
    }

    /// `claim!(p)`. Idempotent, and recurses on contention
    /// until either this member wins the claim or the member no longer
    /// desires the partition (caller stops calling it once a rebalance
    /// recomputes `desired`).
    fn claim<'a>(&'a self, state: &'a mut GroupState, partition: u32) -> BoxFuture<'a, Result<()>> {
        async move {
            if state.claimed.iter().any(|c| c.partition() == partition) {
                return Ok(());
            }

            let path = paths::owner_path(&self.group_name, &self.topic, partition);
            let attempt = self
                .coordinator
                .create(&path, self.member_id.clone().into_bytes(), true)
                .await;

            match attempt {
                Ok(()) => self.finish_claim(state, partition).await,
                Err(CoordinatorError::NodeExists(_)) => {
                    let mut watch = self.coordinator.register(&path).await?;
                    if !self.coordinator.exists(&path).await? {
                        drop(watch);
                        return self.claim(state, partition).await;
                    }

                    loop {
                        match watch.next().await {
                            Some(ev) if ev.kind == WatchEventKind::Deleted => break,
                            Some(_) => continue,
                            None => break,
                        }
                    }
                    tracing::info!(partition, "contended partition freed, retrying claim");
                    self.claim(state, partition).await
                }
                Err(e) => Err(Error::Coordinator(e)),
            }
        }
        .boxed()
    }

    async fn finish_claim(&self, state: &mut GroupState, partition: u32) -> Result<()> {
        let leader = state
            .metadata
            .leader(partition)
            .await?
            .ok_or(Error::UnknownLeader(partition))?;

        let stored_offset = self.read_offset(partition).await?;
        let initial = if stored_offset > 0 {
            InitialOffset::Exact(stored_offset)
        } else if self.trail {
            InitialOffset::Latest
        } else {
            InitialOffset::Earliest
        };

        let fetcher = self
            .fetcher_factory
            .create(&self.topic, partition, &leader, initial)
            .await?;
        state.claimed.push(PartitionConsumer::new(partition, fetcher));
        metrics::counter!("consumer_group_partitions_claimed").increment(1);
        tracing::info!(partition, "claimed partition");
        Ok(())
    }

    async fn read_offset(&self, partition: u32) -> Result<i64> {
        let path = paths::offset_path(&self.group_name, &self.topic, partition);
        match self.coordinator.get(&path).await.map_err(Error::Coordinator)? {
            Some(bytes) => Ok(String::from_utf8_lossy(&bytes).trim().parse().unwrap_or(0)),
            None => Ok(0),
        }
    }
}
