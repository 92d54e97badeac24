//! Kafka publisher
//!
//! One idempotent producer is shared by the listing producer, the result
//! hand-off and the dead-letter sink.

use async_trait::async_trait;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{error, info};

use crate::broker::{BrokerError, Delivery, EventPublisher};

pub struct KafkaPublisher {
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaPublisher {
    pub fn new(brokers: &str) -> Result<Self, KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("max.in.flight.requests.per.connection", "5")
            .set("retries", "3")
            .set("compression.type", "lz4")
            .set("linger.ms", "10")
            .set("batch.size", "16384")
            .set("message.timeout.ms", "30000")
            .create()?;

        info!("Kafka producer initialized with brokers: {}", brokers);

        Ok(Self {
            producer,
            delivery_timeout: Duration::from_secs(30),
        })
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<Delivery, BrokerError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self.producer.send(record, self.delivery_timeout).await {
            Ok((partition, offset)) => Ok(Delivery { partition, offset }),
            Err((err, _)) => {
                error!(topic = topic, key = key, error = %err, "Failed to deliver message");
                Err(classify(err))
            }
        }
    }
}

/// Errors that resending the same message cannot fix
fn classify(err: KafkaError) -> BrokerError {
    match err.rdkafka_error_code() {
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::InvalidMessage
            | RDKafkaErrorCode::TopicAuthorizationFailed,
        ) => BrokerError::Rejected(err.to_string()),
        _ => BrokerError::Unavailable(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let too_large = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        assert!(matches!(classify(too_large), BrokerError::Rejected(_)));

        let timed_out = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        assert!(matches!(classify(timed_out), BrokerError::Unavailable(_)));

        let transport = KafkaError::MessageProduction(RDKafkaErrorCode::BrokerTransportFailure);
        assert!(matches!(classify(transport), BrokerError::Unavailable(_)));
    }
}
