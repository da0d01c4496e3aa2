//! Per-partition fetch cursor. Delegates wire I/O to a
//! [`PartitionFetcher`]; tracks the next-offset cursor locally.

use crate::broker::{Message, PartitionFetcher};
use crate::error::Result;

pub struct PartitionConsumer {
    partition: u32,
    fetcher: Box<dyn PartitionFetcher>,
}

impl PartitionConsumer {
    pub fn new(partition: u32, fetcher: Box<dyn PartitionFetcher>) -> Self {
        Self { partition, fetcher }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Next offset to read, i.e. one past the last message returned by
    /// the most recent `fetch`.
    pub fn offset(&self) -> i64 {
        self.fetcher.offset()
    }

    pub async fn fetch(&mut self) -> Result<Vec<Message>> {
        self.fetcher.fetch().await
    }
}

impl std::fmt::Debug for PartitionConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionConsumer")
            .field("partition", &self.partition)
            .field("offset", &self.offset())
            .finish()
    }
}
