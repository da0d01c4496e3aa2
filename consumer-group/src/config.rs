use std::time::Duration;

/// Tunables for a [`crate::group::ConsumerGroup`].
///
/// Constructed with `GroupOptions { field: ..., ..Default::default() }`,
/// the same idiom this codebase's other Kafka coordination configs use
/// (see `kafka-assigner`'s `AssignerConfig`).
#[derive(Debug, Clone)]
pub struct GroupOptions {
    /// Max fetch size passed through to the partition consumer.
    pub max_bytes: i32,
    /// Max fetch wait passed through to the partition consumer.
    pub max_wait: Duration,
    /// Min fetch size passed through to the partition consumer.
    pub min_bytes: i32,
    /// Deprecated cap on claim attempts. Accepted and stored but not
    /// enforced: claims retry indefinitely via watch, matching the
    /// original implementation's actual (not documented) behavior.
    pub claim_timeout: Duration,
    /// `fetch_loop` idle sleep, overridable per call via `FetchOptions`.
    pub loop_delay: Duration,
    /// Broker socket timeout, passed through to the broker client.
    pub socket_timeout: Duration,
    /// If false, `ConsumerGroup::new` skips member registration and the
    /// initial rebalance — the caller must call `register` explicitly.
    pub register: bool,
    /// On first consumption of a partition with no stored offset, start
    /// from the tail (`latest`) instead of the head (`earliest`).
    pub trail: bool,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
            max_wait: Duration::from_millis(100),
            min_bytes: 0,
            claim_timeout: Duration::from_secs(30),
            loop_delay: Duration::from_secs(1),
            socket_timeout: Duration::from_millis(10_000),
            register: true,
            trail: false,
        }
    }
}

/// Per-call overrides for [`crate::group::ConsumerGroup::checkout`] and
/// `fetch`.
#[derive(Debug, Clone, Default)]
pub struct CheckoutOptions {
    /// If `Some(false)`, suppresses auto-commit regardless of what the
    /// block returns. `None` defers entirely to the block's [`Commit`]
    /// return value.
    pub commit: Option<bool>,
}

/// Per-call override of [`GroupOptions::loop_delay`] for `fetch_loop`.
#[derive(Debug, Clone, Default)]
pub struct FetchLoopOptions {
    pub checkout: CheckoutOptions,
    pub loop_delay: Option<Duration>,
}

/// Signal a checkout/fetch block returns to indicate whether its partition's
/// offset should be auto-committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Yes,
    No,
}

impl Default for Commit {
    fn default() -> Self {
        Commit::Yes
    }
}
