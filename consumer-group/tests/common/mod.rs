#![allow(dead_code)]

//! In-memory test doubles for the three external collaborators
//! (`Coordinator`, `MetadataClient`, `PartitionFetcherFactory`), plus a
//! `wait_for_condition` poll helper, mirroring the harness pattern used by
//! this codebase's other etcd-backed coordination test suites
//! (`kafka-assigner/tests/common/mod.rs`).

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use consumer_group::broker::{InitialOffset, Message, PartitionFetcher, PartitionFetcherFactory};
use consumer_group::coordinator::{Coordinator, CoordinatorError, WatchEvent, WatchEventKind, WatchHandle};
use consumer_group::error::Result;
use consumer_group::metadata::{Broker, MetadataClient, PartitionMetadata, TopicMetadata};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub async fn wait_for_condition<F, Fut>(timeout: Duration, interval: Duration, f: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if f().await {
            return;
        }
        tokio::time::sleep(interval).await;
    }
    panic!("condition not met within {timeout:?}");
}

// ── Fake coordinator ─────────────────────────────────────────────

#[derive(Clone)]
struct Node {
    data: Vec<u8>,
    ephemeral_owner: Option<u64>,
}

#[derive(Clone)]
enum Pattern {
    Exact(String),
    Prefix(String),
}

impl Pattern {
    fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Exact(p) => p == path,
            Pattern::Prefix(p) => path.starts_with(p.as_str()),
        }
    }
}

struct Watcher {
    pattern: Pattern,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

#[derive(Default)]
struct StoreInner {
    nodes: HashMap<String, Node>,
    watchers: Vec<Watcher>,
}

impl StoreInner {
    fn notify(&mut self, path: &str, kind: WatchEventKind) {
        self.watchers.retain(|w| {
            if w.pattern.matches(path) {
                w.tx
                    .send(WatchEvent {
                        path: path.to_string(),
                        kind,
                    })
                    .is_ok()
            } else {
                true
            }
        });
    }
}

/// A single shared in-memory "etcd", sessioned per [`FakeCoordinator`]
/// handle so that [`FakeCoordinator::kill_session`] can simulate session
/// loss: every ephemeral node that session created disappears and every
/// watcher observing it fires, exactly like a lease expiring.
#[derive(Clone)]
pub struct FakeStore {
    inner: Arc<Mutex<StoreInner>>,
    next_session: Arc<AtomicU64>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            next_session: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn coordinator(&self) -> FakeCoordinator {
        let session = self.next_session.fetch_add(1, Ordering::SeqCst);
        FakeCoordinator {
            store: self.clone(),
            session,
        }
    }

    /// Snapshot of every live owner-node path (used by ownership-exclusivity
    /// assertions across a set of fakes sharing one store).
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn value(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().nodes.get(path).map(|n| n.data.clone())
    }
}

#[derive(Clone)]
pub struct FakeCoordinator {
    store: FakeStore,
    session: u64,
}

impl FakeCoordinator {
    /// Simulates this member's coordinator session dying: every ephemeral
    /// node it owns (member id node, owner nodes) is removed, and any
    /// watcher observing one of them fires — exactly what happens when an
    /// etcd lease backing those keys expires.
    pub fn kill_session(&self) {
        let mut inner = self.store.inner.lock().unwrap();
        let dead: Vec<String> = inner
            .nodes
            .iter()
            .filter(|(_, n)| n.ephemeral_owner == Some(self.session))
            .map(|(k, _)| k.clone())
            .collect();
        for path in dead {
            inner.nodes.remove(&path);
            inner.notify(&path, WatchEventKind::Deleted);
        }
    }
}

#[async_trait]
impl Coordinator for FakeCoordinator {
    async fn mkdir_p(&self, _path: &str) -> std::result::Result<(), CoordinatorError> {
        Ok(())
    }

    async fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        ephemeral: bool,
    ) -> std::result::Result<(), CoordinatorError> {
        let mut inner = self.store.inner.lock().unwrap();
        if inner.nodes.contains_key(path) {
            return Err(CoordinatorError::NodeExists(path.to_string()));
        }
        inner.nodes.insert(
            path.to_string(),
            Node {
                data,
                ephemeral_owner: ephemeral.then_some(self.session),
            },
        );
        inner.notify(path, WatchEventKind::Changed);
        Ok(())
    }

    async fn get(&self, path: &str) -> std::result::Result<Option<Vec<u8>>, CoordinatorError> {
        Ok(self.store.inner.lock().unwrap().nodes.get(path).map(|n| n.data.clone()))
    }

    async fn set(&self, path: &str, data: Vec<u8>) -> std::result::Result<(), CoordinatorError> {
        let mut inner = self.store.inner.lock().unwrap();
        match inner.nodes.get_mut(path) {
            Some(node) => {
                node.data = data;
                inner.notify(path, WatchEventKind::Changed);
                Ok(())
            }
            None => Err(CoordinatorError::NoNode(path.to_string())),
        }
    }

    async fn delete(&self, path: &str, ignore_no_node: bool) -> std::result::Result<(), CoordinatorError> {
        let mut inner = self.store.inner.lock().unwrap();
        if inner.nodes.remove(path).is_some() {
            inner.notify(path, WatchEventKind::Deleted);
            Ok(())
        } else if ignore_no_node {
            Ok(())
        } else {
            Err(CoordinatorError::NoNode(path.to_string()))
        }
    }

    async fn children(
        &self,
        path: &str,
        watch: bool,
    ) -> std::result::Result<(Vec<String>, Option<WatchHandle>), CoordinatorError> {
        let prefix = format!("{path}/");
        let mut inner = self.store.inner.lock().unwrap();
        let children: Vec<String> = inner
            .nodes
            .keys()
            .filter_map(|k| k.strip_prefix(prefix.as_str()))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect();

        let handle = if watch {
            let (tx, rx) = mpsc::unbounded_channel();
            inner.watchers.push(Watcher {
                pattern: Pattern::Prefix(prefix),
                tx,
            });
            Some(WatchHandle::new(rx, None))
        } else {
            None
        };

        Ok((children, handle))
    }

    async fn register(&self, path: &str) -> std::result::Result<WatchHandle, CoordinatorError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.store.inner.lock().unwrap().watchers.push(Watcher {
            pattern: Pattern::Exact(path.to_string()),
            tx,
        });
        Ok(WatchHandle::new(rx, None))
    }

    async fn exists(&self, path: &str) -> std::result::Result<bool, CoordinatorError> {
        Ok(self.store.inner.lock().unwrap().nodes.contains_key(path))
    }
}

// ── Fake metadata ────────────────────────────────────────────────

pub struct FakeMetadataClient {
    topics: HashMap<String, TopicMetadata>,
}

impl FakeMetadataClient {
    pub fn single_broker_topic(topic: &str, partition_count: u32, broker_id: i32) -> Arc<Self> {
        let partitions = (0..partition_count)
            .map(|id| PartitionMetadata {
                id,
                leader_broker_id: Some(broker_id),
            })
            .collect();
        let mut topics = HashMap::new();
        topics.insert(
            topic.to_string(),
            TopicMetadata {
                brokers: vec![Broker {
                    id: broker_id,
                    host: "localhost".into(),
                    port: 9092,
                }],
                partitions,
            },
        );
        Arc::new(Self { topics })
    }
}

#[async_trait]
impl MetadataClient for FakeMetadataClient {
    async fn fetch(&self, topic: &str) -> Result<TopicMetadata> {
        Ok(self.topics.get(topic).cloned().unwrap_or_default())
    }
}

// ── Fake partition fetcher ───────────────────────────────────────

/// Prescripted fetch results, one `VecDeque` entry consumed per call;
/// once exhausted, further calls return an empty batch, just like a real
/// broker with nothing new to deliver.
pub struct FetchScript {
    batches: Arc<Mutex<HashMap<u32, VecDeque<Vec<Message>>>>>,
    recorded_initial_offsets: Arc<Mutex<HashMap<u32, InitialOffset>>>,
}

impl FetchScript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: Arc::new(Mutex::new(HashMap::new())),
            recorded_initial_offsets: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn seed(&self, partition: u32, batches: Vec<Vec<Message>>) {
        self.batches
            .lock()
            .unwrap()
            .insert(partition, VecDeque::from(batches));
    }

    pub fn initial_offset_seen(&self, partition: u32) -> Option<InitialOffset> {
        self.recorded_initial_offsets.lock().unwrap().get(&partition).copied()
    }
}

#[async_trait]
impl PartitionFetcherFactory for FetchScript {
    async fn create(
        &self,
        _topic: &str,
        partition: u32,
        _leader: &Broker,
        initial_offset: InitialOffset,
    ) -> Result<Box<dyn PartitionFetcher>> {
        self.recorded_initial_offsets
            .lock()
            .unwrap()
            .insert(partition, initial_offset);

        let offset = match initial_offset {
            InitialOffset::Exact(o) => o,
            InitialOffset::Earliest | InitialOffset::Latest => 0,
        };

        Ok(Box::new(ScriptedFetcher {
            partition,
            offset,
            batches: Arc::clone(&self.batches),
        }))
    }
}

struct ScriptedFetcher {
    partition: u32,
    offset: i64,
    batches: Arc<Mutex<HashMap<u32, VecDeque<Vec<Message>>>>>,
}

#[async_trait]
impl PartitionFetcher for ScriptedFetcher {
    async fn fetch(&mut self) -> Result<Vec<Message>> {
        let batch = self
            .batches
            .lock()
            .unwrap()
            .get_mut(&self.partition)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        self.offset += batch.len() as i64;
        Ok(batch)
    }

    fn offset(&self) -> i64 {
        self.offset
    }

    fn partition(&self) -> u32 {
        self.partition
    }
}

pub fn messages(partition: u32, start_offset: i64, count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| Message {
            partition,
            offset: start_offset + i as i64,
            key: None,
            payload: format!("msg-{i}").into_bytes(),
        })
        .collect()
}

