//! `etcd`-backed [`Coordinator`].
//!
//! Ephemeral nodes are modeled as keys attached to a single per-instance
//! lease, kept alive on a background task for the lifetime of the
//! `EtcdCoordinator`. When the process dies or the connection is lost long
//! enough for the lease to expire, etcd removes every ephemeral key itself —
//! the same "ephemeral node disappears with the session" guarantee the
//! group membership and ownership claims are built on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, EventType, GetOptions, PutOptions, Txn, TxnOp, WatchOptions,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Coordinator, CoordinatorError, Result, WatchEvent, WatchEventKind, WatchHandle};

/// TTL for the session lease backing every ephemeral node this coordinator
/// creates. Kept alive roughly three times a second, matching the
/// keepalive cadence the existing lease-based leader election uses for its
/// own shorter-lived leases.
const SESSION_LEASE_TTL_SECS: i64 = 20;
const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(300);

pub struct EtcdCoordinator {
    client: Client,
    lease_id: i64,
    _keepalive: CancellationToken,
    _keepalive_task: JoinHandle<()>,
}

impl EtcdCoordinator {
    pub async fn connect(endpoints: &[String]) -> anyhow::Result<Self> {
        let mut client = Client::connect(endpoints, None).await?;
        let lease_id = client.lease_grant(SESSION_LEASE_TTL_SECS, None).await?.id();

        let cancel = CancellationToken::new();
        let task = spawn_keepalive(client.clone(), lease_id, cancel.clone());

        Ok(Self {
            client,
            lease_id,
            _keepalive: cancel,
            _keepalive_task: task,
        })
    }

    #[cfg(test)]
    pub(crate) async fn from_client(mut client: Client) -> anyhow::Result<Self> {
        let lease_id = client.lease_grant(SESSION_LEASE_TTL_SECS, None).await?.id();
        let cancel = CancellationToken::new();
        let task = spawn_keepalive(client.clone(), lease_id, cancel.clone());
        Ok(Self {
            client,
            lease_id,
            _keepalive: cancel,
            _keepalive_task: task,
        })
    }

    fn map_err(e: etcd_client::Error) -> CoordinatorError {
        CoordinatorError::Backend(e.into())
    }
}

impl Drop for EtcdCoordinator {
    fn drop(&mut self) {
        self._keepalive.cancel();
        let mut client = self.client.clone();
        let lease_id = self.lease_id;
        tokio::spawn(async move {
            drop(client.lease_revoke(lease_id).await);
        });
    }
}

fn spawn_keepalive(mut client: Client, lease_id: i64, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (mut keeper, mut stream) = match client.lease_keep_alive(lease_id).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, "failed to start session lease keepalive");
                return;
            }
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(KEEPALIVE_INTERVAL) => {
                    if keeper.keep_alive().await.is_err() {
                        tracing::error!("session lease keepalive send failed, session may expire");
                        return;
                    }
                    match stream.message().await {
                        Ok(Some(_)) => {}
                        _ => {
                            tracing::error!("session lease keepalive stream closed, session lost");
                            return;
                        }
                    }
                }
            }
        }
    })
}

#[async_trait]
impl Coordinator for EtcdCoordinator {
    async fn mkdir_p(&self, _path: &str) -> Result<()> {
        // etcd has no directory nodes; any key can have children. Nothing to
        // create ahead of time.
        Ok(())
    }

    async fn create(&self, path: &str, data: Vec<u8>, ephemeral: bool) -> Result<()> {
        let mut put_options = PutOptions::new();
        if ephemeral {
            put_options = put_options.with_lease(self.lease_id);
        }

        let txn = Txn::new()
            .when(vec![Compare::version(path, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(path, data, Some(put_options))]);

        let resp = self.client.clone().txn(txn).await.map_err(Self::map_err)?;
        if !resp.succeeded() {
            return Err(CoordinatorError::NodeExists(path.to_string()));
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let resp = self
            .client
            .clone()
            .get(path, None)
            .await
            .map_err(Self::map_err)?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn set(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let txn = Txn::new()
            .when(vec![Compare::version(path, CompareOp::Greater, 0)])
            .and_then(vec![TxnOp::put(path, data, None)]);
        let resp = self.client.clone().txn(txn).await.map_err(Self::map_err)?;
        if !resp.succeeded() {
            return Err(CoordinatorError::NoNode(path.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, path: &str, ignore_no_node: bool) -> Result<()> {
        let resp = self
            .client
            .clone()
            .delete(path, None)
            .await
            .map_err(Self::map_err)?;
        if resp.deleted() == 0 && !ignore_no_node {
            return Err(CoordinatorError::NoNode(path.to_string()));
        }
        Ok(())
    }

    async fn children(&self, path: &str, watch: bool) -> Result<(Vec<String>, Option<WatchHandle>)> {
        let prefix = format!("{path}/");
        let options = GetOptions::new().with_prefix();
        let resp = self
            .client
            .clone()
            .get(prefix.as_str(), Some(options))
            .await
            .map_err(Self::map_err)?;

        let children: Vec<String> = resp
            .kvs()
            .iter()
            .filter_map(|kv| {
                let key = std::str::from_utf8(kv.key()).ok()?;
                key.strip_prefix(prefix.as_str())
            })
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect();

        let handle = if watch {
            Some(self.install_watch(&prefix, true).await?)
        } else {
            None
        };

        Ok((children, handle))
    }

    async fn register(&self, path: &str) -> Result<WatchHandle> {
        self.install_watch(path, true).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let resp = self
            .client
            .clone()
            .get(path, None)
            .await
            .map_err(Self::map_err)?;
        Ok(resp.kvs().first().is_some())
    }
}

impl EtcdCoordinator {
    async fn install_watch(&self, key: &str, prefix: bool) -> Result<WatchHandle> {
        let mut options = WatchOptions::new();
        if prefix {
            options = options.with_prefix();
        }

        let (mut watcher, mut stream) = self
            .client
            .clone()
            .watch(key, Some(options))
            .await
            .map_err(Self::map_err)?;
        let _ = watcher.id();

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            loop {
                match stream.message().await {
                    Ok(Some(resp)) => {
                        for event in resp.events() {
                            let Some(kv) = event.kv() else { continue };
                            let path = String::from_utf8_lossy(kv.key()).into_owned();
                            let kind = match event.event_type() {
                                EventType::Put => WatchEventKind::Changed,
                                EventType::Delete => WatchEventKind::Deleted,
                            };
                            if tx.send(WatchEvent { path, kind }).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        tracing::warn!(error = %e, "watch stream ended with error");
                        return;
                    }
                }
            }
        });

        Ok(WatchHandle::new(rx, Some(Box::new(AbortOnDrop(task)))))
    }
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub type SharedEtcdCoordinator = Arc<EtcdCoordinator>;
