//! Per-partition fetch primitive, abstracted behind
//! [`PartitionFetcher`] so the core never names `rdkafka` types directly
//! outside the `rdkafka_broker` adapter.

use async_trait::async_trait;

use crate::error::Result;
use crate::metadata::Broker;

#[derive(Debug, Clone)]
pub struct Message {
    pub partition: u32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

/// Where to start reading when no offset is stored yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialOffset {
    Exact(i64),
    Earliest,
    Latest,
}

/// One broker connection scoped to exactly one `(topic, partition)`.
///
/// `RdKafkaPartitionFetcher` assigns a `BaseConsumer` to a single
/// `TopicPartitionList` entry and seeks to `initial_offset`; ownership of
/// the partition is decided entirely by this crate's own coordinator, not
/// by any broker-side consumer-group protocol.
#[async_trait]
pub trait PartitionFetcher: Send + Sync {
    /// Fetches the next available batch, honoring `max_bytes`/`max_wait`/
    /// `min_bytes` as configured at construction. May return an empty
    /// batch if nothing is available before the wait elapses.
    async fn fetch(&mut self) -> Result<Vec<Message>>;

    /// Next offset to read, i.e. one past the last message returned by
    /// the most recent [`PartitionFetcher::fetch`] call.
    fn offset(&self) -> i64;

    fn partition(&self) -> u32;
}

/// Builds a [`PartitionFetcher`] for one partition, given its current
/// leader. Kept separate from `PartitionFetcher` itself because
/// construction needs the leader's address while fetching doesn't.
#[async_trait]
pub trait PartitionFetcherFactory: Send + Sync {
    async fn create(
        &self,
        topic: &str,
        partition: u32,
        leader: &Broker,
        initial_offset: InitialOffset,
    ) -> Result<Box<dyn PartitionFetcher>>;
}
