/// Partition key derivation
use sha2::{Digest, Sha256};

/// Derive the partition key for a district/property-type segment.
///
/// Components are trimmed and lowercased so "Downtown " and "downtown" land on
/// the same partition. A missing component counts as the empty string.
pub fn partition_key(district: Option<&str>, property_type: Option<&str>) -> String {
    let district = district.unwrap_or_default().trim().to_lowercase();
    let property_type = property_type.unwrap_or_default().trim().to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(district.as_bytes());
    hasher.update(b"|");
    hasher.update(property_type.as_bytes());
    let digest = hasher.finalize();

    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_segment_same_key() {
        assert_eq!(
            partition_key(Some("Downtown"), Some("apartment")),
            partition_key(Some("  downtown"), Some("APARTMENT "))
        );
    }

    #[test]
    fn test_different_segments_differ() {
        assert_ne!(
            partition_key(Some("Downtown"), Some("apartment")),
            partition_key(Some("Downtown"), Some("house"))
        );
        // separator keeps "ab"+"c" apart from "a"+"bc"
        assert_ne!(
            partition_key(Some("ab"), Some("c")),
            partition_key(Some("a"), Some("bc"))
        );
    }

    #[test]
    fn test_key_shape() {
        let key = partition_key(None, None);
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
