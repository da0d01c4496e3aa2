//! Public facade: lifecycle, checkout scheduler, fetch/
//! fetch_loop, offset commit.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::broker::PartitionFetcherFactory;
use crate::config::{Commit, FetchLoopOptions, GroupOptions};
use crate::coordinator::{paths, Coordinator};
use crate::error::{Error, Result};
use crate::guid::Guid;
use crate::metadata::{Broker, MetadataClient, MetadataView};
use crate::rebalancer::{GroupState, Rebalancer};

static MEMBER_ID_COUNTER: std::sync::OnceLock<Guid> = std::sync::OnceLock::new();

fn member_id_counter() -> &'static Guid {
    MEMBER_ID_COUNTER.get_or_init(Guid::new)
}

/// A decentralized, self-balancing consumer group over a single topic.
///
/// Every live `ConsumerGroup` with the same `group_name` and `topic`
/// cooperatively divides the topic's partitions via [`crate::assignment::pick`];
/// construct one per process per group membership.
pub struct ConsumerGroup {
    group_name: String,
    topic: String,
    member_id: String,
    coordinator: Arc<dyn Coordinator>,
    rebalancer: Arc<Rebalancer>,
    options: GroupOptions,
    state: Arc<Mutex<GroupState>>,
    pending: Arc<AtomicBool>,
    registered: AtomicBool,
    session_ok: Arc<AtomicBool>,
    rebalance_tx: mpsc::UnboundedSender<()>,
    _rebalance_driver: JoinHandle<()>,
}

impl ConsumerGroup {
    /// Opens a coordinator session under `group_name`, constructs a
    /// process-unique member id, and — unless `options.register` is
    /// false — joins the member set and runs the initial rebalance.
    pub async fn new(
        group_name: impl Into<String>,
        topic: impl Into<String>,
        coordinator: Arc<dyn Coordinator>,
        metadata_client: Arc<dyn MetadataClient>,
        fetcher_factory: Arc<dyn PartitionFetcherFactory>,
        options: GroupOptions,
    ) -> Result<Self> {
        let group_name = group_name.into();
        let topic = topic.into();
        let member_id = build_member_id(&group_name);

        let metadata = MetadataView::new(metadata_client, topic.clone());
        let state = Arc::new(Mutex::new(GroupState::new(metadata)));
        let pending = Arc::new(AtomicBool::new(false));
        let session_ok = Arc::new(AtomicBool::new(true));

        let (rebalance_tx, rebalance_rx) = mpsc::unbounded_channel();

        let rebalancer = Arc::new(Rebalancer::new(
            Arc::clone(&coordinator),
            fetcher_factory,
            group_name.clone(),
            topic.clone(),
            member_id.clone(),
            options.trail,
            rebalance_tx.clone(),
        ));

        let driver = spawn_rebalance_driver(
            Arc::clone(&rebalancer),
            Arc::clone(&state),
            Arc::clone(&pending),
            Arc::clone(&session_ok),
            rebalance_rx,
        );

        let group = Self {
            group_name,
            topic,
            member_id,
            coordinator,
            rebalancer,
            options,
            state,
            pending,
            registered: AtomicBool::new(false),
            session_ok,
            rebalance_tx,
            _rebalance_driver: driver,
        };

        if group.options.register {
            group.register().await?;
        }

        Ok(group)
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    /// Creates the registry directories (idempotent), this member's
    /// ephemeral node, installs the membership watch, and runs the
    /// initial rebalance. Idempotent: a second call is a no-op.
    pub async fn register(&self) -> Result<()> {
        if self.registered.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.coordinator
            .mkdir_p(&paths::ids_dir(&self.group_name))
            .await
            .map_err(Error::Coordinator)?;
        self.coordinator
            .mkdir_p(&paths::owners_dir(&self.group_name))
            .await
            .map_err(Error::Coordinator)?;
        self.coordinator
            .mkdir_p(&paths::offsets_dir(&self.group_name))
            .await
            .map_err(Error::Coordinator)?;

        let id_path = paths::id_path(&self.group_name, &self.member_id);
        match self.coordinator.create(&id_path, b"{}".to_vec(), true).await {
            Ok(()) => {}
            Err(crate::coordinator::CoordinatorError::NodeExists(_)) => {}
            Err(e) => return Err(Error::Coordinator(e)),
        }

        self.trigger_rebalance();
        Ok(())
    }

    fn trigger_rebalance(&self) {
        let _ = self.rebalance_tx.send(());
    }

    /// Partition ids currently held, ascending.
    pub async fn claimed(&self) -> Vec<u32> {
        let state = self.state.lock().await;
        let mut ids: Vec<u32> = state.claimed.iter().map(|c| c.partition()).collect();
        ids.sort_unstable();
        ids
    }

    /// Available partitions, id-sorted.
    pub async fn partitions(&self) -> Result<Vec<crate::metadata::PartitionMetadata>> {
        let mut state = self.state.lock().await;
        state.metadata.partitions().await
    }

    pub async fn leader(&self, partition: u32) -> Result<Option<Broker>> {
        let mut state = self.state.lock().await;
        state.metadata.leader(partition).await
    }

    /// Reads the stored offset for `partition`; an absent node reads as 0.
    pub async fn offset(&self, partition: u32) -> Result<i64> {
        let path = paths::offset_path(&self.group_name, &self.topic, partition);
        match self.coordinator.get(&path).await.map_err(Error::Coordinator)? {
            Some(bytes) => Ok(String::from_utf8_lossy(&bytes).trim().parse().unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Sets the stored offset for `partition` to `offset`, creating the
    /// offset node on first commit.
    pub async fn commit(&self, partition: u32, offset: i64) -> Result<()> {
        let path = paths::offset_path(&self.group_name, &self.topic, partition);
        let payload = offset.to_string().into_bytes();
        match self.coordinator.set(&path, payload.clone()).await {
            Ok(()) => Ok(()),
            Err(crate::coordinator::CoordinatorError::NoNode(_)) => self
                .coordinator
                .create(&path, payload, false)
                .await
                .map_err(Error::Coordinator),
            Err(e) => Err(Error::Coordinator(e)),
        }
    }

    /// Invalidates cached metadata and re-fetches it.
    pub async fn reload(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.metadata.reload().await
    }

    /// Best-effort liveness signal: whether this instance's own member
    /// lease is still believed good from the last coordinator
    /// interaction. Not a guarantee, and doesn't change fetch/checkout
    /// behavior — callers may poll it to decide whether to rebuild the
    /// group from scratch.
    pub fn healthy(&self) -> bool {
        self.session_ok.load(Ordering::SeqCst)
    }

    /// Atomically borrows the next claimed partition consumer (round-
    /// robin), invokes `block`, and commits its offset unless suppressed.
    /// Returns `false` if nothing is currently claimed (`block` is not
    /// invoked in that case).
    pub async fn checkout<F, Fut>(
        &self,
        opts: crate::config::CheckoutOptions,
        block: F,
    ) -> Result<bool>
    where
        F: FnOnce(u32, &mut crate::partition_consumer::PartitionConsumer) -> Fut,
        Fut: Future<Output = Commit>,
    {
        let mut state = self.state.lock().await;
        if state.claimed.is_empty() {
            return Ok(false);
        }
        state.claimed.rotate_left(1);

        let consumer = &mut state.claimed[0];
        let partition = consumer.partition();
        let result = block(partition, consumer).await;

        let offset_after = consumer.offset();
        drop(state);

        let should_commit = opts.commit.unwrap_or(true) && result == Commit::Yes;
        if should_commit {
            self.commit(partition, offset_after).await?;
        }

        Ok(true)
    }

    /// `checkout` that fetches a batch before invoking `block(partition,
    /// messages)`.
    pub async fn fetch<F, Fut>(
        &self,
        opts: crate::config::CheckoutOptions,
        block: F,
    ) -> Result<bool>
    where
        F: FnOnce(u32, Vec<crate::broker::Message>) -> Fut,
        Fut: Future<Output = Commit>,
    {
        self.checkout(opts, |partition, consumer| async move {
            let messages = match consumer.fetch().await {
                Ok(m) => m,
                Err(_) => {
                    metrics::counter!("consumer_group_fetch_errors").increment(1);
                    return Commit::No;
                }
            };
            metrics::counter!("consumer_group_batches_fetched").increment(1);
            metrics::counter!("consumer_group_messages_fetched").increment(messages.len() as u64);
            block(partition, messages).await
        })
        .await
    }

    /// Infinite loop of `fetch`. Yields `(-1, [])` to `block` when
    /// nothing is currently claimed. Sleeps `loop_delay` whenever a round
    /// claimed nothing or fetched no messages. Never returns normally;
    /// the caller breaks by returning out of `block` via its own control
    /// flow (e.g. by signalling through shared state it checks between
    /// iterations).
    pub async fn fetch_loop<F, Fut>(&self, opts: FetchLoopOptions, mut block: F) -> Result<()>
    where
        F: FnMut(i32, Vec<crate::broker::Message>) -> Fut,
        Fut: Future<Output = Commit>,
    {
        let loop_delay = opts.loop_delay.unwrap_or(self.options.loop_delay);
        loop {
            let mut had_messages = false;
            let checkout_opts = opts.checkout.clone();
            let claimed = self
                .fetch(checkout_opts, |partition, messages| {
                    had_messages = !messages.is_empty();
                    let partition = partition as i32;
                    let block = &mut block;
                    async move { block(partition, messages).await }
                })
                .await?;

            if !claimed {
                block(-1, Vec::new()).await;
            }

            if !claimed || !had_messages {
                tokio::time::sleep(loop_delay).await;
            }
        }
    }

    /// Releases all held partitions under the group lock, then closes
    /// this instance's coordinator session (its member node and any
    /// remaining ephemeral owner nodes disappear as a result).
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let held: Vec<u32> = state.claimed.iter().map(|c| c.partition()).collect();
        for partition in held {
            let path = paths::owner_path(&self.group_name, &self.topic, partition);
            let _ = self.coordinator.delete(&path, true).await;
        }
        state.claimed.clear();
        drop(state);

        let id_path = paths::id_path(&self.group_name, &self.member_id);
        let _ = self.coordinator.delete(&id_path, true).await;
        self.session_ok.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn build_member_id(group_name: &str) -> String {
    let counter = member_id_counter().next_counter();
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown-host".to_string());
    let pid = std::process::id();
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{group_name}-{hostname}-{pid}-{secs}-{counter}")
}

fn spawn_rebalance_driver(
    rebalancer: Arc<Rebalancer>,
    state: Arc<Mutex<GroupState>>,
    pending: Arc<AtomicBool>,
    session_ok: Arc<AtomicBool>,
    mut rebalance_rx: mpsc::UnboundedReceiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while rebalance_rx.recv().await.is_some() {
            // Coalesce: drain any triggers that piled up while we were
            // about to start, collapsing them into the single pass we're
            // about to run.
            while rebalance_rx.try_recv().is_ok() {}

            if pending.swap(true, Ordering::SeqCst) {
                continue;
            }
            let mut guard = state.lock().await;
            pending.store(false, Ordering::SeqCst);
            if let Err(e) = rebalancer.rebalance(&mut guard).await {
                tracing::warn!(error = %e, "rebalance pass failed");
                session_ok.store(false, Ordering::SeqCst);
            }
        }
    })
}
