//! Valuation Service - real-time listing valuation pipeline
//!
//! This service provides:
//! - Listing producer (synthetic or replayed listings) publishing versioned events
//! - Kafka consumer loop with bounded concurrency and in-order offset commits
//! - Predictor gateway: validation, feature preparation, result cache, timeouts
//! - Dead-letter sink for events that cannot be valued

pub mod broker;
pub mod config;
pub mod dead_letter;
pub mod gateway;
pub mod kafka;
pub mod memory;
pub mod metrics;
pub mod pipeline;
pub mod producer;

pub use broker::{BrokerError, Delivery, EventPublisher, EventSource, SourceRecord};
pub use config::{Config, ConfigError, DeadLetterMode, LogFormat, ResultMode};
pub use dead_letter::{
    DeadLetterEntry, DeadLetterError, DeadLetterSink, FailureKind, FileDeadLetterSink,
    MemoryDeadLetterSink, OriginalEvent, TopicDeadLetterSink,
};
pub use gateway::{
    GatewayConfig, HttpPredictor, Prediction, Predictor, PredictorError, PredictorFailure,
    PredictorGateway,
};
pub use kafka::{topics, KafkaConsumerConfig, KafkaEventSource, KafkaPublisher};
pub use memory::{MemoryBroker, MemorySource};
pub use pipeline::{
    ConsumerConfig, ConsumerLoop, ConsumerStats, EventProcessor, LogResultSink, Outcome,
    ResultSink, TopicResultSink,
};
pub use producer::{ListingGenerator, ListingProducer, PublishFailure, PublishStats};
