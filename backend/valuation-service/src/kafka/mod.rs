//! Kafka integration
//!
//! rdkafka-backed implementations of the broker seams:
//! - Consumer: `StreamConsumer` with manual, in-order offset commits
//! - Producer: idempotent `FutureProducer` used for listings, results and dead letters

pub mod consumer;
pub mod producer;
pub mod topics;

pub use consumer::{KafkaConsumerConfig, KafkaEventSource};
pub use producer::KafkaPublisher;
