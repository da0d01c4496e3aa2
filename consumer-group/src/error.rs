use thiserror::Error;

use crate::coordinator::CoordinatorError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("broker error: {0}")]
    Broker(#[from] anyhow::Error),

    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("no leader broker known for partition {0}")]
    UnknownLeader(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
