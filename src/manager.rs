//! Broker connection lifecycle: connect, retry with backoff, liveness probing
//! and a background health-check loop.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::broker::{Broker, Connection};
use crate::kafka::KafkaBroker;
use crate::{Config, Error, Result};

/// Upper bound for a single connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for a single liveness probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Owns the connection to one broker partition and keeps it alive.
///
/// Construction blocks until a first connection is established (with
/// retries) and then starts a background task that probes the connection
/// every `health_check_interval` and reconnects when the probe fails.
/// [`close`](Self::close) stops that task; dropping the manager does too.
pub struct ConnectionManager<B: Broker = KafkaBroker> {
    inner: Arc<Inner<B>>,
    health_task: JoinHandle<()>,
}

struct Inner<B: Broker> {
    broker: B,
    config: Config,
    state: RwLock<State<B::Connection>>,
    shutdown: CancellationToken,
}

struct State<C> {
    conn: Option<Arc<C>>,
    closed: bool,
    retry_count: u64,
    last_connect: Option<DateTime<Utc>>,
}

/// Point-in-time view of a [`ConnectionManager`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStats {
    pub broker: String,
    pub topic: String,
    pub partition: i32,
    pub is_closed: bool,
    pub retry_count: u64,
    pub last_connect: Option<DateTime<Utc>>,
    pub is_connected: bool,
    /// Seconds since the last successful connect, if any.
    pub uptime_seconds: Option<f64>,
}

impl ConnectionManager<KafkaBroker> {
    /// Connects to Kafka using `config`.
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_broker(config, KafkaBroker::new()).await
    }
}

impl<B: Broker> ConnectionManager<B> {
    /// Connects through `broker`, failing if every initial attempt fails.
    pub async fn with_broker(config: Config, broker: B) -> Result<Self> {
        let config = config.normalized();

        let inner = Arc::new(Inner {
            broker,
            config,
            state: RwLock::new(State {
                conn: None,
                closed: false,
                retry_count: 0,
                last_connect: None,
            }),
            shutdown: CancellationToken::new(),
        });

        inner.connect_with_retry().await?;

        let health_task = tokio::spawn(run_health_check(Arc::clone(&inner)));

        Ok(Self { inner, health_task })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Makes exactly one connection attempt.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Connects with exponential backoff, up to `max_retries` attempts.
    pub async fn connect_with_retry(&self) -> Result<()> {
        self.inner.connect_with_retry().await
    }

    /// Returns the current connection, reconnecting first if it is missing
    /// or fails its liveness probe.
    pub async fn get_connection(&self) -> Result<Arc<B::Connection>> {
        let conn = {
            let state = self.inner.state.read().await;
            if state.closed {
                return Err(Error::ManagerClosed);
            }
            state.conn.clone()
        };

        if let Some(conn) = conn {
            if self.inner.probe(&conn).await {
                return Ok(conn);
            }
            warn!("Connection appears dead, attempting reconnection");
        }

        self.inner.connect_with_retry().await?;

        let state = self.inner.state.read().await;
        if state.closed {
            return Err(Error::ManagerClosed);
        }
        state.conn.clone().ok_or(Error::ConnectionNotAlive)
    }

    pub async fn is_alive(&self) -> bool {
        self.inner.is_alive().await
    }

    /// On-demand health check, independent of the background loop.
    pub async fn health_check(&self) -> Result<()> {
        if self.inner.state.read().await.closed {
            return Err(Error::ManagerClosed);
        }
        if !self.inner.is_alive().await {
            return Err(Error::ConnectionNotAlive);
        }
        Ok(())
    }

    /// Opens a read subscription for the configured topic.
    pub async fn subscribe(&self) -> Result<B::Subscription> {
        if self.inner.state.read().await.closed {
            return Err(Error::ManagerClosed);
        }
        self.inner.broker.subscribe(&self.inner.config)
    }

    /// Stops health checks and closes the connection. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let conn = {
            let mut state = self.inner.state.write().await;
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            self.inner.shutdown.cancel();
            state.conn.take()
        };

        match conn {
            Some(conn) => {
                info!(broker = %self.inner.config.broker, "Closing connection");
                conn.close()
            }
            None => Ok(()),
        }
    }

    pub async fn stats(&self) -> ManagerStats {
        let state = self.inner.state.read().await;
        let config = &self.inner.config;

        ManagerStats {
            broker: config.broker.clone(),
            topic: config.topic.clone(),
            partition: config.partition,
            is_closed: state.closed,
            retry_count: state.retry_count,
            last_connect: state.last_connect,
            is_connected: state.conn.is_some(),
            uptime_seconds: state.last_connect.map(|at| {
                (Utc::now() - at).num_milliseconds().max(0) as f64 / 1000.0
            }),
        }
    }
}

impl<B: Broker> Drop for ConnectionManager<B> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        self.health_task.abort();
    }
}

impl<B: Broker> Inner<B> {
    #[instrument(skip(self), fields(broker = %self.config.broker, topic = %self.config.topic))]
    async fn connect(&self) -> Result<()> {
        self.config.validate()?;

        let conn = timeout(CONNECT_TIMEOUT, self.broker.connect(&self.config))
            .await
            .map_err(|_| Error::Timeout {
                message: format!("connecting to {}", self.config.broker),
            })??;

        let mut state = self.state.write().await;
        if state.closed {
            drop(state);
            if let Err(e) = conn.close() {
                debug!("Failed to close connection opened after shutdown: {}", e);
            }
            return Err(Error::ManagerClosed);
        }
        state.conn = Some(Arc::new(conn));
        state.last_connect = Some(Utc::now());

        info!(
            "Connected to {}, topic: {}, partition: {}",
            self.config.broker, self.config.topic, self.config.partition
        );
        Ok(())
    }

    async fn connect_with_retry(&self) -> Result<()> {
        let max_retries = self.config.max_retries;
        let mut last_err = None;

        for attempt in 0..max_retries {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_config() || matches!(e, Error::ManagerClosed) => return Err(e),
                Err(e) => {
                    self.state.write().await.retry_count += 1;

                    if attempt + 1 < max_retries {
                        let backoff = backoff_delay(self.config.retry_delay(), attempt);
                        warn!(
                            "Connection attempt {}/{} failed: {}, retrying in {:?}",
                            attempt + 1,
                            max_retries,
                            e,
                            backoff
                        );

                        tokio::select! {
                            _ = self.shutdown.cancelled() => return Err(Error::ManagerClosed),
                            _ = sleep(backoff) => {}
                        }
                    } else {
                        warn!(
                            "Connection attempt {}/{} failed: {}",
                            attempt + 1,
                            max_retries,
                            e
                        );
                    }

                    last_err = Some(e);
                }
            }
        }

        Err(Error::RetriesExhausted {
            attempts: max_retries,
            source: Box::new(
                last_err.unwrap_or_else(|| Error::Connection("no attempts made".to_string())),
            ),
        })
    }

    async fn is_alive(&self) -> bool {
        let conn = {
            let state = self.state.read().await;
            if state.closed {
                return false;
            }
            match &state.conn {
                Some(conn) => Arc::clone(conn),
                None => return false,
            }
        };
        self.probe(&conn).await
    }

    async fn probe(&self, conn: &B::Connection) -> bool {
        match timeout(PROBE_TIMEOUT, conn.probe()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Liveness probe failed: {}", e);
                false
            }
            Err(_) => {
                debug!("Liveness probe timed out after {:?}", PROBE_TIMEOUT);
                false
            }
        }
    }
}

/// `base * 2^attempt`, with `attempt` counted from zero.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
}

async fn run_health_check<B: Broker>(inner: Arc<Inner<B>>) {
    let period = inner.config.health_check_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                debug!("Health check loop stopped");
                return;
            }
            _ = ticker.tick() => {
                if inner.is_alive().await {
                    continue;
                }
                warn!("Health check failed, attempting reconnection");
                match inner.connect_with_retry().await {
                    Ok(()) => info!("Health check reconnected"),
                    Err(Error::ManagerClosed) => return,
                    Err(e) => error!("Auto-reconnection failed: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_saturates() {
        let base = Duration::from_secs(1);
        assert_eq!(
            backoff_delay(base, 40),
            Duration::from_secs(1).saturating_mul(u32::MAX)
        );
    }
}
