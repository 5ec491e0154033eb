use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use user_cdc_watcher::{
    read_with_retry, Config, ConnectionManager, Error, Event, EventHandler, Operation, Result,
};

#[derive(Parser, Debug)]
#[command(name = "user-cdc-watcher")]
#[command(about = "Consumes Debezium change events for the users table", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", help = "Optional TOML config; KAFKA_* env vars override it")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[arg(long, default_value_t = 5, help = "Delay before restarting a failed stream")]
    retry_delay_secs: u64,
}

/// Logs every user change.
struct UserChangeLogger;

#[async_trait]
impl EventHandler for UserChangeLogger {
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        let user = event
            .record()
            .ok_or_else(|| anyhow::anyhow!("event carries no row image"))?;

        match event.operation {
            Operation::Create => info!(user_id = %user.id, email = %user.email, "User created"),
            Operation::Update => info!(user_id = %user.id, email = %user.email, "User updated"),
            Operation::Delete => info!(user_id = %user.id, email = %user.email, "User deleted"),
            Operation::Read => info!(user_id = %user.id, email = %user.email, "User snapshot"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // .env may carry RUST_LOG, so it is loaded before logging starts
    let dotenv = dotenvy::dotenv();

    init_logging(args.json_logs, args.verbose);

    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!("Failed to load .env file: {}", e);
        }
    }

    info!("Starting user-cdc-watcher");

    let config = match Config::load(args.config.as_deref()) {
        Ok(cfg) => {
            info!("Configuration loaded successfully");
            cfg
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e);
        }
    };

    info!(
        kafka_broker = %config.broker,
        kafka_topic = %config.topic,
        kafka_partition = config.partition,
        group_id = %config.group_id,
        "Configuration summary"
    );

    let manager = match ConnectionManager::new(config).await {
        Ok(manager) => manager,
        Err(e) => {
            error!("Error creating connection manager: {}", e);
            return Err(e);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            cancel.cancel();
        }
    });

    let result = read_with_retry(
        &cancel,
        &manager,
        &UserChangeLogger,
        Duration::from_secs(args.retry_delay_secs),
    )
    .await;

    let stats = manager.stats().await;
    info!(retry_count = stats.retry_count, "Closing connection manager");
    manager.close().await?;

    match result {
        Ok(()) | Err(Error::Cancelled) => {
            info!("Stopped");
            Ok(())
        }
        Err(e) => {
            error!("Stream terminated: {}", e);
            Err(e)
        }
    }
}

/// `RUST_LOG` wins unless `--verbose` is set.
fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("user_cdc_watcher=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("user_cdc_watcher=info,warn"))
    }
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = log_filter(verbose);

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
