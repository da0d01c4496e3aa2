pub mod assignment;
pub mod broker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod group;
pub mod guid;
pub mod metadata;
pub mod partition_consumer;
pub mod rdkafka_broker;
pub mod rebalancer;

pub use config::{CheckoutOptions, Commit, FetchLoopOptions, GroupOptions};
pub use error::{Error, Result};
pub use group::ConsumerGroup;
