//! `rdkafka`-backed [`MetadataClient`] and [`PartitionFetcher`].
//!
//! Grounded on `e2e-lag-exporter::kafka::KafkaMonitor` (admin metadata
//! fetch) and `common/kafka::kafka_consumer::SingleTopicConsumer` (client
//! config assembly). Unlike `SingleTopicConsumer`, the fetcher here is
//! assigned to exactly one partition via a manual `TopicPartitionList` +
//! `seek`, never `subscribe`, since rdkafka's own consumer-group
//! rebalancing would fight this crate's coordinator.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::AdminClient;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::message::Message as _;
use rdkafka::topic_partition_list::{Offset as RdOffset, TopicPartitionList};
use rdkafka::util::Timeout;

use crate::broker::{InitialOffset, Message, PartitionFetcher, PartitionFetcherFactory};
use crate::error::{Error, Result};
use crate::metadata::{Broker, MetadataClient, PartitionMetadata, TopicMetadata};

fn client_config(bootstrap_servers: &str, socket_timeout: Duration) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", bootstrap_servers)
        .set(
            "socket.timeout.ms",
            socket_timeout.as_millis().to_string(),
        )
        .set("enable.partition.eof", "false");
    config
}

pub struct RdKafkaMetadataClient {
    admin_client: AdminClient<rdkafka::client::DefaultClientContext>,
    fetch_timeout: Duration,
}

impl RdKafkaMetadataClient {
    pub fn new(bootstrap_servers: &str, socket_timeout: Duration) -> anyhow::Result<Self> {
        let admin_client: AdminClient<_> =
            client_config(bootstrap_servers, socket_timeout).create()?;
        Ok(Self {
            admin_client,
            fetch_timeout: socket_timeout,
        })
    }
}

#[async_trait]
impl MetadataClient for RdKafkaMetadataClient {
    async fn fetch(&self, topic: &str) -> Result<TopicMetadata> {
        let metadata = self
            .admin_client
            .inner()
            .fetch_metadata(Some(topic), Timeout::from(self.fetch_timeout))
            .map_err(anyhow::Error::from)?;

        let brokers = metadata
            .brokers()
            .iter()
            .map(|b| Broker {
                id: b.id(),
                host: b.host().to_string(),
                port: b.port() as u16,
            })
            .collect();

        let partitions = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .map(|t| {
                t.partitions()
                    .iter()
                    .map(|p| PartitionMetadata {
                        id: p.id() as u32,
                        leader_broker_id: if p.leader() >= 0 {
                            Some(p.leader())
                        } else {
                            None
                        },
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(TopicMetadata { brokers, partitions })
    }
}

pub struct RdKafkaPartitionFetcher {
    consumer: BaseConsumer,
    topic: String,
    partition: u32,
    offset: i64,
    max_wait: Duration,
}

impl RdKafkaPartitionFetcher {
    pub fn new(
        bootstrap_servers: &str,
        topic: &str,
        partition: u32,
        initial_offset: InitialOffset,
        socket_timeout: Duration,
        max_wait: Duration,
        min_bytes: i32,
        max_bytes: i32,
    ) -> anyhow::Result<Self> {
        let mut config = client_config(bootstrap_servers, socket_timeout);
        config
            .set("fetch.min.bytes", min_bytes.to_string())
            .set("fetch.message.max.bytes", max_bytes.to_string());
        let consumer: BaseConsumer = config.create()?;

        let rd_offset = match initial_offset {
            InitialOffset::Exact(o) => RdOffset::Offset(o),
            InitialOffset::Earliest => RdOffset::Beginning,
            InitialOffset::Latest => RdOffset::End,
        };

        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition as i32, rd_offset)?;
        consumer.assign(&tpl)?;

        let offset = match initial_offset {
            InitialOffset::Exact(o) => o,
            InitialOffset::Earliest | InitialOffset::Latest => {
                let (low, high) = consumer.fetch_watermarks(
                    topic,
                    partition as i32,
                    Timeout::from(socket_timeout),
                )?;
                match initial_offset {
                    InitialOffset::Earliest => low,
                    _ => high,
                }
            }
        };

        Ok(Self {
            consumer,
            topic: topic.to_string(),
            partition,
            offset,
            max_wait,
        })
    }
}

#[async_trait]
impl PartitionFetcher for RdKafkaPartitionFetcher {
    async fn fetch(&mut self) -> Result<Vec<Message>> {
        let mut batch = Vec::new();
        let deadline = tokio::time::Instant::now() + self.max_wait;

        while tokio::time::Instant::now() < deadline {
            match self.consumer.poll(Timeout::from(Duration::from_millis(0))) {
                Some(Ok(msg)) => {
                    let offset = msg.offset();
                    batch.push(Message {
                        partition: self.partition,
                        offset,
                        key: msg.key().map(|k| k.to_vec()),
                        payload: msg.payload().unwrap_or_default().to_vec(),
                    });
                    self.offset = offset + 1;
                }
                Some(Err(e)) => return Err(Error::Kafka(e)),
                None => {
                    if !batch.is_empty() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        }

        Ok(batch)
    }

    fn offset(&self) -> i64 {
        self.offset
    }

    fn partition(&self) -> u32 {
        self.partition
    }
}

/// Builds one [`RdKafkaPartitionFetcher`] per claimed partition, dialing
/// the partition's current leader directly rather than the group's
/// bootstrap list — matching `PartitionConsumer(client_id, host, port, ...)`
/// taking an explicit leader address.
pub struct RdKafkaFetcherFactory {
    pub socket_timeout: Duration,
    pub max_wait: Duration,
    pub min_bytes: i32,
    pub max_bytes: i32,
}

#[async_trait]
impl PartitionFetcherFactory for RdKafkaFetcherFactory {
    async fn create(
        &self,
        topic: &str,
        partition: u32,
        leader: &Broker,
        initial_offset: InitialOffset,
    ) -> Result<Box<dyn PartitionFetcher>> {
        let bootstrap = format!("{}:{}", leader.host, leader.port);
        let fetcher = RdKafkaPartitionFetcher::new(
            &bootstrap,
            topic,
            partition,
            initial_offset,
            self.socket_timeout,
            self.max_wait,
            self.min_bytes,
            self.max_bytes,
        )
        .map_err(Error::Broker)?;
        Ok(Box::new(fetcher))
    }
}

impl std::fmt::Debug for RdKafkaPartitionFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdKafkaPartitionFetcher")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .finish()
    }
}
