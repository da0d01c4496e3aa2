//! Cluster metadata view: broker records and the claimed
//! topic's partitions, cached until [`MetadataView::reload`] is called.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub id: i32,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub id: u32,
    pub leader_broker_id: Option<i32>,
}

impl PartitionMetadata {
    /// A partition is "available" when it currently has a live leader.
    pub fn is_available(&self) -> bool {
        self.leader_broker_id.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TopicMetadata {
    pub brokers: Vec<Broker>,
    pub partitions: Vec<PartitionMetadata>,
}

/// External collaborator for cluster metadata discovery.
///
/// `RdKafkaMetadataClient` is the production implementation over
/// `rdkafka::admin::AdminClient`; tests substitute an in-memory fake.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn fetch(&self, topic: &str) -> Result<TopicMetadata>;
}

/// Cached view over a [`MetadataClient`] for one topic. Empty/unknown
/// topics yield an empty partition set rather than an error.
pub struct MetadataView {
    client: std::sync::Arc<dyn MetadataClient>,
    topic: String,
    cache: Option<TopicMetadata>,
}

impl MetadataView {
    pub fn new(client: std::sync::Arc<dyn MetadataClient>, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
            cache: None,
        }
    }

    /// Invalidates and refetches the cache.
    pub async fn reload(&mut self) -> Result<()> {
        self.cache = Some(self.client.fetch(&self.topic).await?);
        Ok(())
    }

    async fn ensure_loaded(&mut self) -> Result<&TopicMetadata> {
        if self.cache.is_none() {
            self.reload().await?;
        }
        Ok(self.cache.as_ref().expect("just populated"))
    }

    /// Available partitions (live leader), ascending by id. Topic-absent
    /// maps to an empty list, never an error.
    pub async fn partitions(&mut self) -> Result<Vec<PartitionMetadata>> {
        let meta = self.ensure_loaded().await?;
        let mut available: Vec<PartitionMetadata> = meta
            .partitions
            .iter()
            .filter(|p| p.is_available())
            .cloned()
            .collect();
        available.sort_unstable_by_key(|p| p.id);
        Ok(available)
    }

    /// The leader broker for `partition`, or `None` if unknown.
    pub async fn leader(&mut self, partition: u32) -> Result<Option<Broker>> {
        let meta = self.ensure_loaded().await?;
        let brokers_by_id: HashMap<i32, &Broker> =
            meta.brokers.iter().map(|b| (b.id, b)).collect();
        Ok(meta
            .partitions
            .iter()
            .find(|p| p.id == partition)
            .and_then(|p| p.leader_broker_id)
            .and_then(|id| brokers_by_id.get(&id).cloned().cloned()))
    }
}
