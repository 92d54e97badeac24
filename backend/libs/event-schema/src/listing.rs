use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::partition::partition_key;

// ============================================================================
// LISTING EVENTS
// ============================================================================

/// Property attributes carried by a listing event.
///
/// Every field is optional in the type: the fields a model needs are enforced
/// by validation on the consumer side, not at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub town: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_sqm: Option<f64>,
    /// Gross built area, used when `area_sqm` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gross_area_sqm: Option<f64>,
    /// Net usable area, used when `area_sqm` is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_area_sqm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rooms: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub construction_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub energy_certificate: Option<String>,
    #[serde(default)]
    pub amenities: BTreeSet<String>,
    /// Date the listing was published on the source portal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// Immutable listing event as produced onto the listings topic
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEvent {
    /// Unique event ID, assigned by the producer
    pub event_id: String,
    /// Derived from district + property type, see [`partition_key`]
    pub partition_key: String,
    pub payload: ListingPayload,
    pub produced_at: DateTime<Utc>,
}

impl ListingEvent {
    /// Create a new event with a fresh ID and a derived partition key
    pub fn new(payload: ListingPayload) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), payload, Utc::now())
    }

    pub fn with_id(
        event_id: impl Into<String>,
        payload: ListingPayload,
        produced_at: DateTime<Utc>,
    ) -> Self {
        let partition_key = partition_key(
            payload.district.as_deref(),
            payload.property_type.as_deref(),
        );

        Self {
            event_id: event_id.into(),
            partition_key,
            payload,
            produced_at,
        }
    }
}

// ============================================================================
// PREDICTION RESULTS
// ============================================================================

/// Valuation computed for one listing event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    /// Back-reference to the source event
    pub event_id: String,
    /// Never negative
    pub predicted_price: f64,
    pub model_version: String,
    pub computed_at: DateTime<Utc>,
}

impl PredictionResult {
    /// Same valuation attributed to another event (used for cache hits)
    pub fn for_event(&self, event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            ..self.clone()
        }
    }
}
