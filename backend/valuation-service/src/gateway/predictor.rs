//! Predictor capability
//!
//! The model is an external collaborator. The gateway only sees the
//! [`Predictor`] trait, so tests substitute deterministic stubs and production
//! wires in [`HttpPredictor`] against a model-serving endpoint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use super::features::FeatureVector;

/// Raw model output
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Prediction {
    pub price: f64,
    pub model_version: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PredictorFailure {
    #[error("Predictor unavailable: {0}")]
    Unavailable(String),

    #[error("Predictor internal error: {0}")]
    Internal(String),

    #[error("Predictor rejected features: {0}")]
    InvalidFeatures(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Predictor: Send + Sync {
    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictorFailure>;
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    features: &'a FeatureVector,
}

/// Model-serving endpoint speaking `POST {"features": {...}}` → `{"price", "model_version"}`
pub struct HttpPredictor {
    client: Client,
    url: String,
}

impl HttpPredictor {
    /// `timeout` bounds the HTTP exchange; the gateway applies its own on top
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictorFailure> {
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(&self.url)
            .json(&PredictRequest { features })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    PredictorFailure::Unavailable(e.to_string())
                } else {
                    PredictorFailure::Internal(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(status = %status, error = %error_text, "Predictor request failed");
            return Err(classify_status(status, error_text));
        }

        let prediction: Prediction = response
            .json()
            .await
            .map_err(|e| PredictorFailure::Internal(format!("Undecodable response: {}", e)))?;

        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            model_version = %prediction.model_version,
            "Predictor response received"
        );

        Ok(prediction)
    }
}

fn classify_status(status: StatusCode, body: String) -> PredictorFailure {
    let message = format!("{}: {}", status, body);

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        PredictorFailure::Unavailable(message)
    } else if status.is_client_error() {
        PredictorFailure::InvalidFeatures(message)
    } else {
        PredictorFailure::Internal(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            PredictorFailure::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            PredictorFailure::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad vector".to_string()),
            PredictorFailure::InvalidFeatures(m) if m.contains("bad vector")
        ));
        assert!(matches!(
            classify_status(StatusCode::MULTIPLE_CHOICES, String::new()),
            PredictorFailure::Internal(_)
        ));
    }

    #[test]
    fn test_prediction_response_shape() {
        let prediction: Prediction =
            serde_json::from_str(r#"{"price": 245000.5, "model_version": "rf-2024-03"}"#).unwrap();
        assert_eq!(prediction.price, 245000.5);
        assert_eq!(prediction.model_version, "rf-2024-03");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let predictor =
            HttpPredictor::new("http://127.0.0.1:9/predict", Duration::from_millis(500)).unwrap();
        let features = super::super::features::FeatureParams::default()
            .prepare(&event_schema::ListingPayload::default());

        let err = predictor.predict(&features).await.unwrap_err();
        assert!(matches!(err, PredictorFailure::Unavailable(_)));
    }
}
