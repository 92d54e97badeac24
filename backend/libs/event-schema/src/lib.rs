/// Event schema for the listing valuation pipeline
///
/// This library defines the versioned wire representation of listing events and
/// prediction results. Every listing message carries a `schemaVersion` field;
/// consumers accept the current version and the one immediately before it.
///
/// ```rust
/// use event_schema::{decode, encode, ListingEvent, ListingPayload};
///
/// let payload = ListingPayload {
///     district: Some("Downtown".to_string()),
///     property_type: Some("apartment".to_string()),
///     area_sqm: Some(75.0),
///     rooms: Some(3),
///     construction_year: Some(2005),
///     ..Default::default()
/// };
///
/// let event = ListingEvent::new(payload);
/// let bytes = encode(&event).unwrap();
/// assert_eq!(decode(&bytes).unwrap(), event);
/// ```
pub mod codec;
pub mod listing;
pub mod partition;

pub use codec::{decode, decode_result, encode, encode_result, DecodeError, EncodeError};
pub use listing::{ListingEvent, ListingPayload, PredictionResult};
pub use partition::partition_key;

/// Current schema version written by producers
pub const SCHEMA_VERSION: u32 = 2;

/// Oldest schema version consumers still accept
pub const OLDEST_SUPPORTED_VERSION: u32 = SCHEMA_VERSION - 1;

// ============================================================================
// Version compatibility helpers
// ============================================================================

/// One-version backward compatibility: the current version and its predecessor.
pub fn is_compatible(current_version: u32, message_version: u32) -> bool {
    message_version == current_version || message_version + 1 == current_version
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        assert!(is_compatible(SCHEMA_VERSION, SCHEMA_VERSION));
        assert!(is_compatible(SCHEMA_VERSION, OLDEST_SUPPORTED_VERSION));
        assert!(!is_compatible(SCHEMA_VERSION, SCHEMA_VERSION + 1));
        assert!(!is_compatible(3, 1));
    }
}
