/// Wire codec for listing events and prediction results
///
/// Listing messages are JSON envelopes:
///
/// ```json
/// {
///   "eventId": "2f1c...",
///   "schemaVersion": 2,
///   "partitionKey": "9a0b61c2d4e5f607",
///   "payload": { "district": "Downtown", "areaSqm": 75.0, "amenities": ["elevator"] },
///   "producedAt": "2026-10-19T08:00:00Z"
/// }
/// ```
///
/// Version 1 payloads named the area field `area` and carried amenities as a
/// single comma-separated string; they are upgraded on decode.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::listing::{ListingEvent, ListingPayload, PredictionResult};
use crate::{OLDEST_SUPPORTED_VERSION, SCHEMA_VERSION};

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// JSON has no representation for NaN or infinity
    #[error("{field} is not a finite number ({value})")]
    NonFinite { field: &'static str, value: f64 },
}

fn ensure_finite(field: &'static str, value: Option<f64>) -> Result<(), EncodeError> {
    match value {
        Some(value) if !value.is_finite() => Err(EncodeError::NonFinite { field, value }),
        _ => Ok(()),
    }
}

/// Tagged decode failure. Decoding never panics on untrusted bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Unsupported schema version {found} (accepted: {oldest}..={current})")]
    UnsupportedVersion { found: u32, oldest: u32, current: u32 },
}

impl DecodeError {
    fn malformed(err: serde_json::Error) -> Self {
        DecodeError::Malformed(err.to_string())
    }
}

// ============================================================================
// Wire envelopes
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEventRef<'a> {
    event_id: &'a str,
    schema_version: u32,
    partition_key: &'a str,
    payload: &'a ListingPayload,
    produced_at: &'a DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionProbe {
    schema_version: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent<P> {
    event_id: Option<String>,
    partition_key: Option<String>,
    payload: Option<P>,
    produced_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadV1 {
    district: Option<String>,
    city: Option<String>,
    town: Option<String>,
    property_type: Option<String>,
    area: Option<f64>,
    rooms: Option<i32>,
    construction_year: Option<i32>,
    energy_certificate: Option<String>,
    amenities: Option<String>,
}

impl From<PayloadV1> for ListingPayload {
    fn from(v1: PayloadV1) -> Self {
        let amenities: BTreeSet<String> = v1
            .amenities
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect();

        ListingPayload {
            district: v1.district,
            city: v1.city,
            town: v1.town,
            property_type: v1.property_type,
            area_sqm: v1.area,
            rooms: v1.rooms,
            construction_year: v1.construction_year,
            energy_certificate: v1.energy_certificate,
            amenities,
            ..Default::default()
        }
    }
}

impl<P: Into<ListingPayload>> WireEvent<P> {
    fn into_event(self) -> Result<ListingEvent, DecodeError> {
        let event_id = self.event_id.ok_or(DecodeError::MissingField("eventId"))?;
        if event_id.trim().is_empty() {
            return Err(DecodeError::Malformed("eventId is empty".to_string()));
        }

        Ok(ListingEvent {
            event_id,
            partition_key: self
                .partition_key
                .ok_or(DecodeError::MissingField("partitionKey"))?,
            payload: self
                .payload
                .ok_or(DecodeError::MissingField("payload"))?
                .into(),
            produced_at: self
                .produced_at
                .ok_or(DecodeError::MissingField("producedAt"))?,
        })
    }
}

// ============================================================================
// Listing events
// ============================================================================

/// Encode an event at the current schema version
pub fn encode(event: &ListingEvent) -> Result<Vec<u8>, EncodeError> {
    let payload = &event.payload;
    ensure_finite("areaSqm", payload.area_sqm)?;
    ensure_finite("grossAreaSqm", payload.gross_area_sqm)?;
    ensure_finite("netAreaSqm", payload.net_area_sqm)?;

    let wire = WireEventRef {
        event_id: &event.event_id,
        schema_version: SCHEMA_VERSION,
        partition_key: &event.partition_key,
        payload: &event.payload,
        produced_at: &event.produced_at,
    };

    Ok(serde_json::to_vec(&wire)?)
}

/// Decode an event written at the current or the previous schema version
pub fn decode(bytes: &[u8]) -> Result<ListingEvent, DecodeError> {
    let probe: VersionProbe = serde_json::from_slice(bytes).map_err(DecodeError::malformed)?;
    let version = probe
        .schema_version
        .ok_or(DecodeError::MissingField("schemaVersion"))?;

    match version {
        SCHEMA_VERSION => serde_json::from_slice::<WireEvent<ListingPayload>>(bytes)
            .map_err(DecodeError::malformed)?
            .into_event(),
        OLDEST_SUPPORTED_VERSION => serde_json::from_slice::<WireEvent<PayloadV1>>(bytes)
            .map_err(DecodeError::malformed)?
            .into_event(),
        found => Err(DecodeError::UnsupportedVersion {
            found,
            oldest: OLDEST_SUPPORTED_VERSION,
            current: SCHEMA_VERSION,
        }),
    }
}

// ============================================================================
// Prediction results
// ============================================================================

pub fn encode_result(result: &PredictionResult) -> Result<Vec<u8>, EncodeError> {
    ensure_finite("predictedPrice", Some(result.predicted_price))?;
    Ok(serde_json::to_vec(result)?)
}

pub fn decode_result(bytes: &[u8]) -> Result<PredictionResult, DecodeError> {
    let result: PredictionResult =
        serde_json::from_slice(bytes).map_err(DecodeError::malformed)?;

    if !result.predicted_price.is_finite() || result.predicted_price < 0.0 {
        return Err(DecodeError::Malformed(format!(
            "predictedPrice must be a non-negative number, got {}",
            result.predicted_price
        )));
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_event() -> ListingEvent {
        let payload = ListingPayload {
            district: Some("Downtown".to_string()),
            city: Some("Lisboa".to_string()),
            town: Some("Arroios".to_string()),
            property_type: Some("apartment".to_string()),
            area_sqm: Some(75.5),
            gross_area_sqm: Some(82.25),
            net_area_sqm: None,
            rooms: Some(3),
            construction_year: Some(2005),
            energy_certificate: Some("B".to_string()),
            amenities: ["elevator", "balcony"].iter().map(|s| s.to_string()).collect(),
            published_at: Some(Utc.with_ymd_and_hms(2024, 3, 14, 9, 30, 0).unwrap()),
        };

        ListingEvent::with_id(
            "evt-1",
            payload,
            Utc.timestamp_nanos(1_760_000_000_123_456_789),
        )
    }

    #[test]
    fn test_round_trip() {
        let event = sample_event();
        let bytes = encode(&event).unwrap();
        assert_eq!(decode(&bytes).unwrap(), event);
    }

    #[test]
    fn test_round_trip_sparse_payload() {
        let event = ListingEvent::with_id("evt-2", ListingPayload::default(), Utc::now());
        let bytes = encode(&event).unwrap();
        assert_eq!(decode(&bytes).unwrap(), event);
    }

    #[test]
    fn test_wire_field_names() {
        let bytes = encode(&sample_event()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["eventId"], "evt-1");
        assert_eq!(value["schemaVersion"], SCHEMA_VERSION);
        assert!(value["partitionKey"].is_string());
        assert_eq!(value["payload"]["areaSqm"], 75.5);
        assert_eq!(value["payload"]["propertyType"], "apartment");
        assert!(value["producedAt"].is_string());
    }

    #[test]
    fn test_decode_previous_version() {
        let v1 = json!({
            "eventId": "evt-old",
            "schemaVersion": 1,
            "partitionKey": "abc",
            "payload": {
                "district": "Downtown",
                "propertyType": "apartment",
                "area": 75.0,
                "rooms": 3,
                "amenities": "elevator, garage,,pool"
            },
            "producedAt": "2024-01-01T00:00:00Z"
        });

        let event = decode(&serde_json::to_vec(&v1).unwrap()).unwrap();
        assert_eq!(event.event_id, "evt-old");
        assert_eq!(event.payload.area_sqm, Some(75.0));
        assert_eq!(event.payload.rooms, Some(3));
        assert_eq!(event.payload.amenities.len(), 3);
        assert!(event.payload.amenities.contains("garage"));
        assert!(event.payload.gross_area_sqm.is_none());
    }

    #[test]
    fn test_reject_unsupported_versions() {
        for version in [0, SCHEMA_VERSION + 1, 99] {
            let msg = json!({
                "eventId": "evt",
                "schemaVersion": version,
                "partitionKey": "k",
                "payload": {},
                "producedAt": "2024-01-01T00:00:00Z"
            });

            let err = decode(&serde_json::to_vec(&msg).unwrap()).unwrap_err();
            assert!(
                matches!(err, DecodeError::UnsupportedVersion { found, .. } if found == version),
                "version {version} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_missing_fields() {
        let no_version = json!({ "eventId": "evt" });
        assert_eq!(
            decode(&serde_json::to_vec(&no_version).unwrap()).unwrap_err(),
            DecodeError::MissingField("schemaVersion")
        );

        let no_payload = json!({
            "eventId": "evt",
            "schemaVersion": SCHEMA_VERSION,
            "partitionKey": "k",
            "producedAt": "2024-01-01T00:00:00Z"
        });
        assert_eq!(
            decode(&serde_json::to_vec(&no_payload).unwrap()).unwrap_err(),
            DecodeError::MissingField("payload")
        );
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(decode(b"not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(b""), Err(DecodeError::Malformed(_))));

        let wrong_type = json!({
            "eventId": "evt",
            "schemaVersion": SCHEMA_VERSION,
            "partitionKey": "k",
            "payload": { "rooms": "three" },
            "producedAt": "2024-01-01T00:00:00Z"
        });
        assert!(matches!(
            decode(&serde_json::to_vec(&wrong_type).unwrap()),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_non_finite_areas_rejected_on_encode() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut event = sample_event();
            event.payload.net_area_sqm = Some(value);

            let err = encode(&event).unwrap_err();
            assert!(
                matches!(err, EncodeError::NonFinite { field: "netAreaSqm", .. }),
                "{value} gave {err:?}"
            );
        }

        let mut event = sample_event();
        event.payload.area_sqm = Some(f64::NAN);
        assert!(matches!(
            encode(&event),
            Err(EncodeError::NonFinite { field: "areaSqm", .. })
        ));
    }

    #[test]
    fn test_result_codec() {
        let result = PredictionResult {
            event_id: "evt-1".to_string(),
            predicted_price: 312_500.75,
            model_version: "gbr-2024.03".to_string(),
            computed_at: Utc::now(),
        };

        let bytes = encode_result(&result).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["predictedPrice"], 312_500.75);
        assert_eq!(value["modelVersion"], "gbr-2024.03");
        assert_eq!(decode_result(&bytes).unwrap(), result);

        let negative = json!({
            "eventId": "evt-1",
            "predictedPrice": -1.0,
            "modelVersion": "x",
            "computedAt": "2024-01-01T00:00:00Z"
        });
        assert!(decode_result(&serde_json::to_vec(&negative).unwrap()).is_err());

        let unpriced = PredictionResult {
            predicted_price: f64::NAN,
            ..result
        };
        assert!(matches!(
            encode_result(&unpriced),
            Err(EncodeError::NonFinite { field: "predictedPrice", .. })
        ));
    }
}
