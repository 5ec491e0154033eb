use crate::broker::{Broker, Connection};
use crate::kafka::KafkaSubscription;
use crate::{Config, Error, Result};
use async_trait::async_trait;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::ClientConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka implementation of [`Broker`] backed by librdkafka.
#[derive(Debug, Clone, Default)]
pub struct KafkaBroker;

impl KafkaBroker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    type Connection = KafkaConnection;
    type Subscription = KafkaSubscription;

    #[instrument(skip(self, config), fields(broker = %config.broker, topic = %config.topic))]
    async fn connect(&self, config: &Config) -> Result<KafkaConnection> {
        let client: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.broker)
            .set("socket.timeout.ms", METADATA_TIMEOUT.as_millis().to_string())
            .create()?;
        let client = Arc::new(client);

        let leader = {
            let client = Arc::clone(&client);
            let topic = config.topic.clone();
            let partition = config.partition;
            run_blocking(move || partition_leader(&client, &topic, partition, METADATA_TIMEOUT))
                .await?
        };

        debug!(
            "Partition {} of '{}' is led by broker {}",
            config.partition, config.topic, leader
        );

        Ok(KafkaConnection {
            client,
            topic: config.topic.clone(),
            partition: config.partition,
            leader,
            closed: AtomicBool::new(false),
        })
    }

    fn subscribe(&self, config: &Config) -> Result<KafkaSubscription> {
        KafkaSubscription::new(config)
    }
}

/// Metadata-level connection to one topic partition.
pub struct KafkaConnection {
    client: Arc<BaseConsumer>,
    topic: String,
    partition: i32,
    leader: i32,
    closed: AtomicBool,
}

impl KafkaConnection {
    /// Broker id that led the partition when the connection was made.
    pub fn leader(&self) -> i32 {
        self.leader
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }
}

#[async_trait]
impl Connection for KafkaConnection {
    async fn probe(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Connection("connection has been closed".to_string()));
        }

        let client = Arc::clone(&self.client);
        let topic = self.topic.clone();
        run_blocking(move || {
            let metadata = client.fetch_metadata(Some(&topic), PROBE_TIMEOUT)?;
            if metadata.brokers().is_empty() {
                return Err(Error::Connection("no brokers in metadata".to_string()));
            }
            Ok(())
        })
        .await
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(
                topic = %self.topic,
                partition = self.partition,
                "Closing Kafka connection"
            );
        }
        Ok(())
    }
}

/// Looks up the leader of `partition`, failing if the topic or partition is
/// unknown to the cluster.
fn partition_leader(
    client: &BaseConsumer,
    topic: &str,
    partition: i32,
    timeout: Duration,
) -> Result<i32> {
    let metadata = client.fetch_metadata(Some(topic), timeout)?;

    let topic_metadata = metadata
        .topics()
        .iter()
        .find(|t| t.name() == topic)
        .ok_or_else(|| Error::Connection(format!("topic '{}' not found", topic)))?;

    if let Some(err) = topic_metadata.error() {
        return Err(Error::Connection(format!(
            "topic '{}' reported error: {:?}",
            topic, err
        )));
    }

    topic_metadata
        .partitions()
        .iter()
        .find(|p| p.id() == partition)
        .map(|p| p.leader())
        .ok_or_else(|| {
            Error::Connection(format!(
                "partition {} not found for topic '{}'",
                partition, topic
            ))
        })
}

/// librdkafka metadata calls block the calling thread.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Connection(format!("metadata task failed: {}", e)))?
}
