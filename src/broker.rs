//! The boundary between the consumer core and a concrete log broker.
//!
//! [`ConnectionManager`](crate::ConnectionManager) and the stream reader only
//! talk to these traits. [`KafkaBroker`](crate::kafka::KafkaBroker) is the
//! production implementation; tests plug in scripted brokers.

use crate::{Config, Result};
use async_trait::async_trait;

/// A raw record as delivered by the broker client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record value. `None` for tombstones.
    pub payload: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
    pub offset: i64,
    pub partition: i32,
}

impl Record {
    pub fn new(payload: impl Into<Vec<u8>>, offset: i64, partition: i32) -> Self {
        Self {
            payload: Some(payload.into()),
            key: None,
            offset,
            partition,
        }
    }
}

/// Opens connections and read subscriptions against one broker cluster.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Connection: Connection;
    type Subscription: Subscription;

    /// Performs a single connection attempt. Retrying is the caller's job.
    async fn connect(&self, config: &Config) -> Result<Self::Connection>;

    /// Opens a consumer subscription for the configured topic.
    fn subscribe(&self, config: &Config) -> Result<Self::Subscription>;
}

/// A live connection to the partition configured in [`Config`].
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Cheap, side-effect-free round-trip to check the connection is usable.
    async fn probe(&self) -> Result<()>;

    fn close(&self) -> Result<()>;
}

/// A stream of records from a subscribed topic.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next record. Dropping the future must be safe.
    async fn fetch(&mut self) -> Result<Record>;
}
