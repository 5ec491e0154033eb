#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use user_cdc_watcher::{Broker, Config, Connection, Error, Record, Result, Subscription};

/// Get test configuration from environment variables
pub fn get_test_config() -> Config {
    let mut config = Config::new(
        env::var("TEST_KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string()),
        format!("test_{}.public.users", std::process::id()),
    );
    config.group_id = format!("test_group_{}", std::process::id());
    config
}

/// One scripted response to `fetch`.
pub enum FetchStep {
    Record(Record),
    Fail(String),
}

/// Shared, inspectable state behind [`ScriptedBroker`].
#[derive(Default)]
pub struct BrokerState {
    /// Connection attempts that fail before one succeeds.
    pub connect_failures: AtomicU32,
    pub connect_attempts: Mutex<Vec<Instant>>,
    /// How long each connection attempt takes.
    pub connect_delay: Mutex<Duration>,
    pub alive: AtomicBool,
    pub closes: AtomicU32,
    /// Subscriptions that fail before one succeeds.
    pub subscribe_failures: AtomicU32,
    pub subscribes: AtomicU32,
    pub fetch_script: Mutex<VecDeque<FetchStep>>,
    pub fetches: AtomicU32,
}

impl BrokerState {
    pub fn attempts(&self) -> usize {
        self.connect_attempts.lock().unwrap().len()
    }

    /// Gaps between consecutive connection attempts.
    pub fn attempt_gaps(&self) -> Vec<Duration> {
        let attempts = self.connect_attempts.lock().unwrap();
        attempts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-memory broker driven by a script; once the fetch script runs out,
/// `fetch` waits forever like an idle topic.
#[derive(Clone, Default)]
pub struct ScriptedBroker {
    pub state: Arc<BrokerState>,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_connects(failures: u32) -> Self {
        let broker = Self::new();
        broker.state.connect_failures.store(failures, Ordering::SeqCst);
        broker
    }

    pub fn with_fetches(steps: Vec<FetchStep>) -> Self {
        let broker = Self::new();
        *broker.state.fetch_script.lock().unwrap() = steps.into();
        broker
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock().unwrap() = delay;
    }

    pub fn set_alive(&self, alive: bool) {
        self.state.alive.store(alive, Ordering::SeqCst);
    }
}

#[async_trait]
impl Broker for ScriptedBroker {
    type Connection = ScriptedConnection;
    type Subscription = ScriptedSubscription;

    async fn connect(&self, _config: &Config) -> Result<ScriptedConnection> {
        self.state.connect_attempts.lock().unwrap().push(Instant::now());

        let delay = *self.state.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if take_one(&self.state.connect_failures) {
            return Err(Error::Connection("broker unreachable".to_string()));
        }

        self.state.alive.store(true, Ordering::SeqCst);
        Ok(ScriptedConnection {
            state: Arc::clone(&self.state),
        })
    }

    fn subscribe(&self, _config: &Config) -> Result<ScriptedSubscription> {
        self.state.subscribes.fetch_add(1, Ordering::SeqCst);

        if take_one(&self.state.subscribe_failures) {
            return Err(Error::Connection("subscription refused".to_string()));
        }

        Ok(ScriptedSubscription {
            state: Arc::clone(&self.state),
        })
    }
}

pub struct ScriptedConnection {
    state: Arc<BrokerState>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn probe(&self) -> Result<()> {
        if self.state.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Connection("broker went away".to_string()))
        }
    }

    fn close(&self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ScriptedSubscription {
    state: Arc<BrokerState>,
}

#[async_trait]
impl Subscription for ScriptedSubscription {
    async fn fetch(&mut self) -> Result<Record> {
        self.state.fetches.fetch_add(1, Ordering::SeqCst);

        let step = self.state.fetch_script.lock().unwrap().pop_front();
        match step {
            Some(FetchStep::Record(record)) => Ok(record),
            Some(FetchStep::Fail(message)) => Err(Error::Connection(message)),
            None => futures::future::pending().await,
        }
    }
}

/// Debezium-shaped envelope for a users row.
pub fn create_envelope(op: &str, id: &str) -> Vec<u8> {
    let row = json!({
        "id": id,
        "email": format!("{}@example.com", id),
        "password_hash": "hash",
        "phone_no": "+15550100",
        "wallet_address": "0xabc",
        "subscribed": false,
        "created_at": "2024-05-01T10:00:00Z",
        "updated_at": "2024-05-01T10:00:00Z",
        "deleted_at": null
    });

    let (before, after) = match op {
        "d" => (row, Value::Null),
        "u" => (row.clone(), row),
        _ => (Value::Null, row),
    };

    serde_json::to_vec(&json!({
        "schema": {},
        "payload": {
            "before": before,
            "after": after,
            "source": {
                "connector": "postgresql",
                "db": "watcher",
                "schema": "public",
                "table": "users",
                "snapshot": false
            },
            "op": op,
            "ts_ms": 1714644600000i64
        }
    }))
    .unwrap()
}

pub fn record(payload: Vec<u8>, offset: i64) -> FetchStep {
    FetchStep::Record(Record::new(payload, offset, 0))
}

/// Polls `condition` until it holds, panicking after `limit`.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {:?}", limit);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
