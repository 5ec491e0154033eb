pub mod broker;
pub mod cdc;
pub mod config;
pub mod error;
pub mod kafka;
pub mod manager;
pub mod reader;

pub use broker::{Broker, Connection, Record, Subscription};
pub use cdc::{decode, Event, Operation, SourceInfo, UserRecord};
pub use config::Config;
pub use error::{Error, Result};
pub use manager::{ConnectionManager, ManagerStats};
pub use reader::{read, read_with_retry, EventHandler};
