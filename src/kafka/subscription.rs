use crate::broker::{Record, Subscription};
use crate::{Config, Result};
use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::ClientConfig;
use tracing::info;

/// Consumer-group subscription to the configured topic.
///
/// Offsets are committed by librdkafka's auto-commit as records are
/// consumed; there is no rollback when a handler fails.
pub struct KafkaSubscription {
    consumer: StreamConsumer,
}

impl KafkaSubscription {
    pub fn new(config: &Config) -> Result<Self> {
        let consumer: StreamConsumer = client_config(config).create()?;
        consumer.subscribe(&[config.topic.as_str()])?;

        info!(
            topic = %config.topic,
            group_id = %config.group_id,
            "Subscribed to topic"
        );

        Ok(Self { consumer })
    }
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn fetch(&mut self) -> Result<Record> {
        let message = self.consumer.recv().await?;

        Ok(Record {
            payload: message.payload().map(<[u8]>::to_vec),
            key: message.key().map(<[u8]>::to_vec),
            offset: message.offset(),
            partition: message.partition(),
        })
    }
}

pub(crate) fn client_config(config: &Config) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.broker)
        .set("group.id", &config.group_id)
        .set("fetch.min.bytes", config.fetch_min_bytes.to_string())
        .set("fetch.max.bytes", config.fetch_max_bytes.to_string())
        .set("auto.offset.reset", "earliest")
        .set("enable.auto.commit", "true")
        .set("enable.partition.eof", "false");
    client_config
}
