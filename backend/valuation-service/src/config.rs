//! Configuration for the valuation service
use resilience::RetryConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::gateway::features::ParamsError;
use crate::gateway::validation::RuleError;
use crate::gateway::{CacheConfig, FeatureParams, GatewayConfig, ValidationRules};
use crate::kafka::{topics, KafkaConsumerConfig};
use crate::pipeline::ConsumerConfig;

/// Where terminal failures are recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadLetterMode {
    Kafka,
    File,
}

/// Where successful predictions are handed off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultMode {
    Kafka,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Main configuration struct, loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Kafka broker addresses
    #[serde(default = "default_kafka_brokers")]
    pub kafka_brokers: String,

    #[serde(default = "default_group_id")]
    pub kafka_group_id: String,

    #[serde(default = "default_listings_topic")]
    pub listings_topic: String,

    #[serde(default = "default_results_topic")]
    pub results_topic: String,

    #[serde(default = "default_dead_letter_topic")]
    pub dead_letter_topic: String,

    // ============================================
    // Consumer loop
    // ============================================
    /// Records executing concurrently
    #[serde(default = "default_workers")]
    pub consumer_workers: usize,

    /// Records held by the loop at once, queued or executing
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_poll_batch_size")]
    pub poll_batch_size: usize,

    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Attempt ceiling per event, the first attempt included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_max_retry_backoff_ms")]
    pub max_retry_backoff_ms: u64,

    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: f64,

    #[serde(default = "default_true")]
    pub retry_jitter: bool,

    /// Bound on one validate + predict + hand-off attempt
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Time in-flight work gets to finish after a shutdown signal
    #[serde(default = "default_shutdown_deadline_secs")]
    pub shutdown_deadline_secs: u64,

    // ============================================
    // Predictor gateway
    // ============================================
    /// Model-serving endpoint
    #[serde(default = "default_predictor_url")]
    pub predictor_url: String,

    #[serde(default = "default_predictor_timeout_ms")]
    pub predictor_timeout_ms: u64,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_cache_shards")]
    pub cache_shards: usize,

    /// How long a cached prediction may be served
    #[serde(default = "default_cache_freshness_secs")]
    pub cache_freshness_secs: u64,

    /// JSON rule set; built-in rules when unset
    #[serde(default)]
    pub validation_rules_path: Option<PathBuf>,

    /// JSON feature parameters; built-in parameters when unset
    #[serde(default)]
    pub feature_params_path: Option<PathBuf>,

    // ============================================
    // Sinks
    // ============================================
    #[serde(default = "default_dead_letter_mode")]
    pub dead_letter_mode: DeadLetterMode,

    /// JSON-lines file used when `dead_letter_mode=file`
    #[serde(default = "default_dead_letter_path")]
    pub dead_letter_path: PathBuf,

    #[serde(default = "default_result_mode")]
    pub result_mode: ResultMode,

    // ============================================
    // Producer
    // ============================================
    #[serde(default = "default_producer_max_attempts")]
    pub producer_max_attempts: u32,

    /// Pause between synthetic or replayed sends
    #[serde(default)]
    pub producer_interval_ms: u64,

    // ============================================
    // Observability
    // ============================================
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// node_exporter textfile target, refreshed periodically when set
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,

    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_kafka_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_group_id() -> String {
    "valuation-service".to_string()
}

fn default_listings_topic() -> String {
    topics::LISTING_EVENTS.to_string()
}

fn default_results_topic() -> String {
    topics::LISTING_VALUATIONS.to_string()
}

fn default_dead_letter_topic() -> String {
    topics::VALUATION_DLQ.to_string()
}

fn default_workers() -> usize {
    8
}

fn default_max_in_flight() -> usize {
    256
}

fn default_poll_batch_size() -> usize {
    64
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_max_retry_backoff_ms() -> u64 {
    10_000
}

fn default_retry_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_attempt_timeout_ms() -> u64 {
    10_000
}

fn default_shutdown_deadline_secs() -> u64 {
    30
}

fn default_predictor_url() -> String {
    "http://localhost:8080/predict".to_string()
}

fn default_predictor_timeout_ms() -> u64 {
    2_000
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_cache_shards() -> usize {
    16
}

fn default_cache_freshness_secs() -> u64 {
    300 // 5 minutes
}

fn default_dead_letter_mode() -> DeadLetterMode {
    DeadLetterMode::Kafka
}

fn default_dead_letter_path() -> PathBuf {
    PathBuf::from("dead-letters.jsonl")
}

fn default_result_mode() -> ResultMode {
    ResultMode::Kafka
}

fn default_producer_max_attempts() -> u32 {
    5
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

fn default_metrics_interval_secs() -> u64 {
    15
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error(transparent)]
    Rules(#[from] RuleError),

    #[error(transparent)]
    FeatureParams(#[from] ParamsError),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let config: Config = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("CONSUMER_WORKERS", self.consumer_workers as u64),
            ("MAX_IN_FLIGHT", self.max_in_flight as u64),
            ("POLL_BATCH_SIZE", self.poll_batch_size as u64),
            ("MAX_ATTEMPTS", self.max_attempts as u64),
            ("PRODUCER_MAX_ATTEMPTS", self.producer_max_attempts as u64),
            ("CACHE_CAPACITY", self.cache_capacity as u64),
            ("CACHE_SHARDS", self.cache_shards as u64),
            ("PREDICTOR_TIMEOUT_MS", self.predictor_timeout_ms),
            ("ATTEMPT_TIMEOUT_MS", self.attempt_timeout_ms),
            ("POLL_TIMEOUT_MS", self.poll_timeout_ms),
        ];

        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(name));
        }

        if !self.retry_backoff_multiplier.is_finite() || self.retry_backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                name: "RETRY_BACKOFF_MULTIPLIER",
                reason: format!("{} is below 1.0", self.retry_backoff_multiplier),
            });
        }

        if self.max_retry_backoff_ms < self.retry_backoff_ms {
            return Err(ConfigError::Invalid {
                name: "MAX_RETRY_BACKOFF_MS",
                reason: format!(
                    "{} is below RETRY_BACKOFF_MS ({})",
                    self.max_retry_backoff_ms, self.retry_backoff_ms
                ),
            });
        }

        if self.predictor_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                name: "PREDICTOR_URL",
                reason: "empty".to_string(),
            });
        }

        Ok(())
    }

    /// Retry policy for event processing in the consumer loop
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(self.max_retry_backoff_ms),
            backoff_multiplier: self.retry_backoff_multiplier,
            jitter: self.retry_jitter,
        }
    }

    /// Retry policy for publishing listings; shares the backoff settings
    pub fn producer_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.producer_max_attempts,
            ..self.retry_config()
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            workers: self.consumer_workers,
            max_in_flight: self.max_in_flight,
            poll_batch: self.poll_batch_size,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            retry: self.retry_config(),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
            shutdown_deadline: Duration::from_secs(self.shutdown_deadline_secs),
        }
    }

    pub fn kafka_consumer_config(&self) -> KafkaConsumerConfig {
        KafkaConsumerConfig {
            brokers: self.kafka_brokers.clone(),
            group_id: self.kafka_group_id.clone(),
            topic: self.listings_topic.clone(),
        }
    }

    /// Gateway settings, reading the rule set and feature parameters from disk when configured
    pub fn gateway_config(&self) -> Result<GatewayConfig, ConfigError> {
        let rules = match &self.validation_rules_path {
            Some(path) => ValidationRules::from_file(path)?,
            None => ValidationRules::default(),
        };

        let features = match &self.feature_params_path {
            Some(path) => FeatureParams::from_file(path)?,
            None => FeatureParams::default(),
        };

        Ok(GatewayConfig {
            rules,
            features,
            cache: CacheConfig {
                capacity: self.cache_capacity,
                shards: self.cache_shards,
                freshness: Duration::from_secs(self.cache_freshness_secs),
            },
            predictor_timeout: Duration::from_millis(self.predictor_timeout_ms),
        })
    }

    pub fn producer_interval(&self) -> Duration {
        Duration::from_millis(self.producer_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs.max(1))
    }
}
