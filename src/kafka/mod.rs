pub mod connection;
pub mod subscription;


pub use connection::{KafkaBroker, KafkaConnection};
pub use subscription::KafkaSubscription;
