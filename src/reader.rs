//! The consume loop: fetch, decode, dispatch.
//!
//! # Example
//!
//! ```rust,no_run
//! use user_cdc_watcher::{read_with_retry, Config, ConnectionManager, Event, Operation};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> user_cdc_watcher::Result<()> {
//! let manager = ConnectionManager::new(Config::new("localhost:9092", "dbserver1.public.users")).await?;
//! let cancel = CancellationToken::new();
//!
//! let handler = |event: Event| async move {
//!     match event.operation {
//!         Operation::Create | Operation::Update => {
//!             println!("User created/updated: {:?}", event.after.map(|u| u.email));
//!         }
//!         Operation::Delete => println!("User deleted: {:?}", event.before.map(|u| u.email)),
//!         Operation::Read => {}
//!     }
//!     Ok::<(), anyhow::Error>(())
//! };
//!
//! let result = read_with_retry(&cancel, &manager, &handler, Duration::from_secs(5)).await;
//! manager.close().await?;
//! # result
//! # }
//! ```

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Subscription};
use crate::cdc::{decode, Event};
use crate::manager::ConnectionManager;
use crate::{Error, Result};

/// Delay between stream restarts when none is given.
pub const DEFAULT_STREAM_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Caller-supplied processing for each decoded event.
///
/// Errors are logged and the stream moves on; a failed event is not
/// redelivered.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        (self)(event).await
    }
}

/// Consumes the manager's topic until `cancel` fires.
///
/// Fetch errors are retried after the configured fetch delay, undecodable
/// records are skipped and handler errors are logged. The only way out is
/// cancellation, reported as [`Error::Cancelled`], or a failure to open the
/// subscription. Records are handled one at a time in arrival order; do not
/// run two readers on the same manager concurrently.
pub async fn read<B, H>(
    cancel: &CancellationToken,
    manager: &ConnectionManager<B>,
    handler: &H,
) -> Result<()>
where
    B: Broker,
    H: EventHandler + ?Sized,
{
    let mut subscription = manager.subscribe().await?;
    let fetch_retry_delay = manager.config().fetch_retry_delay();

    info!("Starting to read from topic: {}", manager.config().topic);

    loop {
        if cancel.is_cancelled() {
            info!("Cancellation requested, stopping reader");
            return Err(Error::Cancelled);
        }

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Cancellation requested during read, stopping reader");
                return Err(Error::Cancelled);
            }
            fetched = subscription.fetch() => fetched,
        };

        let record = match fetched {
            Ok(record) => record,
            Err(e) => {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                warn!(
                    "Error reading message: {}, retrying in {:?}",
                    e, fetch_retry_delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = sleep(fetch_retry_delay) => {}
                }
                continue;
            }
        };

        debug!(
            offset = record.offset,
            partition = record.partition,
            "Received message"
        );

        let Some(payload) = record.payload.as_deref() else {
            debug!(offset = record.offset, "Skipping tombstone record");
            continue;
        };

        let event = match decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    offset = record.offset,
                    partition = record.partition,
                    "Skipping undecodable message: {}",
                    e
                );
                continue;
            }
        };

        let operation = event.operation;
        if let Err(e) = handler.handle(event).await {
            error!(
                offset = record.offset,
                op = %operation,
                "Error in event handler: {:#}",
                e
            );
        }
    }
}

/// Runs [`read`] until cancellation, restarting it after `retry_delay`
/// whenever it exits with an error. A zero delay means
/// [`DEFAULT_STREAM_RETRY_DELAY`].
pub async fn read_with_retry<B, H>(
    cancel: &CancellationToken,
    manager: &ConnectionManager<B>,
    handler: &H,
    retry_delay: Duration,
) -> Result<()>
where
    B: Broker,
    H: EventHandler + ?Sized,
{
    let retry_delay = if retry_delay.is_zero() {
        DEFAULT_STREAM_RETRY_DELAY
    } else {
        retry_delay
    };

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        match read(cancel, manager, handler).await {
            Ok(()) => return Ok(()),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(_) if cancel.is_cancelled() => return Err(Error::Cancelled),
            Err(e) => {
                warn!("Read failed: {}, retrying in {:?}", e, retry_delay);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = sleep(retry_delay) => {}
                }
            }
        }
    }
}
