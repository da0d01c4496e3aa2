//! Facade over the external, hierarchical, sessioned, ephemeral-node
//! coordinator. A thin wrapper over whatever coordinator client
//! the deployment uses — the core only ever talks to the `Coordinator`
//! trait, never to `etcd_client` directly outside [`etcd::EtcdCoordinator`].

pub mod etcd;
pub mod paths;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("node already exists: {0}")]
    NodeExists(String),
    #[error("no such node: {0}")]
    NoNode(String),
    #[error("coordinator backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A child was added under a watched directory, or a watched node's
    /// value changed.
    Changed,
    /// The watched node (or a watched child) was deleted.
    Deleted,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchEventKind,
}

/// A live watch. Dropping it stops delivery; the backend is responsible for
/// tearing down whatever session-side watch it's backed by when this
/// happens. Callers pull events with [`WatchHandle::next`] rather than
/// polling a `Stream`, so the dispatch side can sit behind a plain
/// `mpsc` channel regardless of what the coordinator backend natively
/// speaks.
pub struct WatchHandle {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
    _guard: Option<Box<dyn std::any::Any + Send>>,
}

impl WatchHandle {
    pub fn new(
        rx: mpsc::UnboundedReceiver<WatchEvent>,
        guard: Option<Box<dyn std::any::Any + Send>>,
    ) -> Self {
        Self { rx, _guard: guard }
    }

    /// Waits for the next event, or `None` once the backend has stopped
    /// producing them (session lost, watch cancelled upstream).
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }
}

/// Required coordinator primitives. Implementations are
/// expected to be cheap to clone and safe to share across tasks.
#[async_trait]
pub trait Coordinator: Send + Sync {
    /// Creates `path` and any missing ancestors. Idempotent.
    async fn mkdir_p(&self, path: &str) -> Result<()>;

    /// Creates `path` with `data`. Fails with [`CoordinatorError::NodeExists`]
    /// if it's already present. `ephemeral` nodes are tied to this
    /// coordinator's session and disappear if the session is lost.
    async fn create(&self, path: &str, data: Vec<u8>, ephemeral: bool) -> Result<()>;

    /// Returns the node's value, or `None` if it doesn't exist.
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Overwrites an existing node's value. Fails with
    /// [`CoordinatorError::NoNode`] if `path` doesn't exist.
    async fn set(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// Deletes `path`. If `ignore_no_node`, a missing node is not an error.
    async fn delete(&self, path: &str, ignore_no_node: bool) -> Result<()>;

    /// Lists immediate children of `path`. When `watch` is true, also
    /// installs a one-shot watch and returns a handle that yields once,
    /// the next time the child set changes.
    async fn children(&self, path: &str, watch: bool) -> Result<(Vec<String>, Option<WatchHandle>)>;

    /// Installs a long-lived watch on `path` that yields an event each
    /// time the node (or, for a directory path, its children) changes,
    /// until the returned handle is dropped.
    async fn register(&self, path: &str) -> Result<WatchHandle>;

    /// Whether `path` currently exists.
    async fn exists(&self, path: &str) -> Result<bool>;
}
