//! Predictor gateway
//!
//! Wraps the opaque [`Predictor`] with validation, a sharded LRU result cache
//! and a bounded call timeout. Concurrent requests for the same normalized
//! payload are coalesced behind a per-key lock so the model is called once.

pub mod cache;
pub mod features;
pub mod predictor;
pub mod validation;

use chrono::Utc;
use dashmap::DashMap;
use event_schema::{ListingEvent, PredictionResult};
use resilience::{with_timeout_result, Retryable, TimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::metrics;
pub use cache::{CacheConfig, CacheKey, CacheStats, PredictionCache};
pub use features::{FeatureParams, FeatureValue, FeatureVector};
pub use predictor::{HttpPredictor, Prediction, Predictor, PredictorFailure};
pub use validation::{ValidationError, ValidationRules};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PredictorError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transient predictor failure: {0}")]
    Transient(String),

    #[error("Permanent predictor failure: {0}")]
    Permanent(String),
}

impl Retryable for PredictorError {
    fn is_retryable(&self) -> bool {
        matches!(self, PredictorError::Transient(_))
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub rules: ValidationRules,
    pub features: FeatureParams,
    pub cache: CacheConfig,
    pub predictor_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rules: ValidationRules::default(),
            features: FeatureParams::default(),
            cache: CacheConfig::default(),
            predictor_timeout: Duration::from_secs(2),
        }
    }
}

pub struct PredictorGateway {
    predictor: Arc<dyn Predictor>,
    rules: ValidationRules,
    features: FeatureParams,
    cache: PredictionCache,
    key_locks: DashMap<CacheKey, Arc<Mutex<()>>>,
    predictor_timeout: Duration,
}

impl PredictorGateway {
    pub fn new(predictor: Arc<dyn Predictor>, config: GatewayConfig) -> Self {
        Self {
            predictor,
            cache: PredictionCache::new(&config.cache),
            rules: config.rules,
            features: config.features.normalized(),
            key_locks: DashMap::new(),
            predictor_timeout: config.predictor_timeout,
        }
    }

    pub async fn predict(&self, event: &ListingEvent) -> Result<PredictionResult, PredictorError> {
        self.validate(event)?;
        self.predict_valid(event).await
    }

    pub fn validate(&self, event: &ListingEvent) -> Result<(), ValidationError> {
        self.rules.validate(&event.payload)
    }

    /// Cache lookup, then a coalesced predictor call for payloads already validated
    pub async fn predict_valid(
        &self,
        event: &ListingEvent,
    ) -> Result<PredictionResult, PredictorError> {
        let key = CacheKey::from_payload(&event.payload);

        if let Some(cached) = self.cache.get(&key) {
            debug!(event_id = %event.event_id, cache_key = %key, "Served from cache");
            return Ok(cached.for_event(&event.event_id));
        }

        let slot = KeySlot::acquire(&self.key_locks, key);
        let _guard = slot.lock().await;

        // another worker may have filled the entry while we waited
        match self.cache.get(&key) {
            Some(cached) => {
                debug!(event_id = %event.event_id, cache_key = %key, "Coalesced onto concurrent call");
                Ok(cached.for_event(&event.event_id))
            }
            None => self.call_predictor(event, key).await,
        }
    }

    async fn call_predictor(
        &self,
        event: &ListingEvent,
        key: CacheKey,
    ) -> Result<PredictionResult, PredictorError> {
        let features = self.features.prepare(&event.payload);

        let timer = metrics::PREDICTOR_LATENCY.start_timer();
        let outcome =
            with_timeout_result(self.predictor_timeout, self.predictor.predict(&features)).await;
        timer.observe_duration();

        let prediction = match outcome {
            Ok(prediction) => prediction,
            Err(e) => {
                let error = classify_failure(e);
                let label = if error.is_retryable() { "transient" } else { "permanent" };
                metrics::PREDICTOR_CALLS.with_label_values(&[label]).inc();
                return Err(error);
            }
        };

        if !prediction.price.is_finite() {
            metrics::PREDICTOR_CALLS.with_label_values(&["permanent"]).inc();
            return Err(PredictorError::Permanent(format!(
                "Model returned non-finite price {}",
                prediction.price
            )));
        }
        metrics::PREDICTOR_CALLS.with_label_values(&["success"]).inc();

        let predicted_price = if prediction.price < 0.0 {
            warn!(
                event_id = %event.event_id,
                price = prediction.price,
                "Negative model output clamped to zero"
            );
            0.0
        } else {
            prediction.price
        };

        let result = PredictionResult {
            event_id: event.event_id.clone(),
            predicted_price,
            model_version: prediction.model_version,
            computed_at: Utc::now(),
        };

        self.cache.insert(key, result.clone());
        Ok(result)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Keys with a caller currently waiting on, or making, a predictor call
    pub fn pending_keys(&self) -> usize {
        self.key_locks.len()
    }
}

/// Per-key lock shared by concurrent callers. The map entry is removed by the
/// last holder, including callers whose future is dropped mid-call.
struct KeySlot<'a> {
    locks: &'a DashMap<CacheKey, Arc<Mutex<()>>>,
    key: CacheKey,
    lock: Option<Arc<Mutex<()>>>,
}

impl<'a> KeySlot<'a> {
    fn acquire(locks: &'a DashMap<CacheKey, Arc<Mutex<()>>>, key: CacheKey) -> Self {
        let lock = locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        Self {
            locks,
            key,
            lock: Some(lock),
        }
    }

    /// `None` only once the slot is being dropped
    async fn lock(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        }
    }
}

impl Drop for KeySlot<'_> {
    fn drop(&mut self) {
        drop(self.lock.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

fn classify_failure(error: TimeoutError<PredictorFailure>) -> PredictorError {
    match error {
        TimeoutError::Elapsed(d) => {
            PredictorError::Transient(format!("Predictor timed out after {:?}", d))
        }
        TimeoutError::DeadlineExceeded => {
            PredictorError::Transient("Predictor deadline exceeded".to_string())
        }
        TimeoutError::OperationFailed(
            failure @ (PredictorFailure::Unavailable(_) | PredictorFailure::Internal(_)),
        ) => PredictorError::Transient(failure.to_string()),
        TimeoutError::OperationFailed(failure @ PredictorFailure::InvalidFeatures(_)) => {
            PredictorError::Permanent(failure.to_string())
        }
    }
}
