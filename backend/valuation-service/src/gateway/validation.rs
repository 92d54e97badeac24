//! Declarative payload validation
//!
//! Rules are data, loaded from a JSON file so they can change without a
//! redeploy:
//!
//! ```json
//! {
//!   "required": ["district", "property_type", "area_sqm", "rooms", "construction_year"],
//!   "ranges": [
//!     { "field": "area_sqm", "min": 0, "exclusive_min": true },
//!     { "field": "rooms", "min": 0 },
//!     { "field": "construction_year", "min": 1800, "max": "current_year" }
//!   ]
//! }
//! ```

use chrono::{Datelike, Utc};
use event_schema::ListingPayload;
use serde::Deserialize;
use std::fmt;
use std::path::Path;

/// Payload fields addressable by rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadField {
    District,
    City,
    Town,
    PropertyType,
    AreaSqm,
    GrossAreaSqm,
    NetAreaSqm,
    Rooms,
    ConstructionYear,
    EnergyCertificate,
    Amenities,
    PublishedAt,
}

impl PayloadField {
    pub fn name(self) -> &'static str {
        match self {
            PayloadField::District => "district",
            PayloadField::City => "city",
            PayloadField::Town => "town",
            PayloadField::PropertyType => "property_type",
            PayloadField::AreaSqm => "area_sqm",
            PayloadField::GrossAreaSqm => "gross_area_sqm",
            PayloadField::NetAreaSqm => "net_area_sqm",
            PayloadField::Rooms => "rooms",
            PayloadField::ConstructionYear => "construction_year",
            PayloadField::EnergyCertificate => "energy_certificate",
            PayloadField::Amenities => "amenities",
            PayloadField::PublishedAt => "published_at",
        }
    }

    fn is_numeric(self) -> bool {
        matches!(
            self,
            PayloadField::AreaSqm
                | PayloadField::GrossAreaSqm
                | PayloadField::NetAreaSqm
                | PayloadField::Rooms
                | PayloadField::ConstructionYear
        )
    }

    fn numeric_value(self, payload: &ListingPayload) -> Option<f64> {
        match self {
            PayloadField::AreaSqm => payload.area_sqm,
            PayloadField::GrossAreaSqm => payload.gross_area_sqm,
            PayloadField::NetAreaSqm => payload.net_area_sqm,
            PayloadField::Rooms => payload.rooms.map(f64::from),
            PayloadField::ConstructionYear => payload.construction_year.map(f64::from),
            _ => None,
        }
    }

    fn is_present(self, payload: &ListingPayload) -> bool {
        fn text(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|s| !s.trim().is_empty())
        }

        match self {
            PayloadField::District => text(&payload.district),
            PayloadField::City => text(&payload.city),
            PayloadField::Town => text(&payload.town),
            PayloadField::PropertyType => text(&payload.property_type),
            PayloadField::EnergyCertificate => text(&payload.energy_certificate),
            PayloadField::Amenities => !payload.amenities.is_empty(),
            PayloadField::PublishedAt => payload.published_at.is_some(),
            numeric => numeric.numeric_value(payload).is_some(),
        }
    }
}

impl fmt::Display for PayloadField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicBound {
    CurrentYear,
}

/// A literal number or a value resolved at validation time
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Value(f64),
    Dynamic(DynamicBound),
}

impl Bound {
    fn resolve(self, current_year: i32) -> f64 {
        match self {
            Bound::Value(v) => v,
            Bound::Dynamic(DynamicBound::CurrentYear) => f64::from(current_year),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RangeRule {
    pub field: PayloadField,
    #[serde(default)]
    pub min: Option<Bound>,
    #[serde(default)]
    pub max: Option<Bound>,
    #[serde(default)]
    pub exclusive_min: bool,
    #[serde(default)]
    pub exclusive_max: bool,
}

impl RangeRule {
    fn check(&self, value: f64, current_year: i32) -> Option<Violation> {
        let below = self.min.map(|b| b.resolve(current_year)).filter(|&min| {
            if self.exclusive_min {
                value <= min
            } else {
                value < min
            }
        });
        let above = self.max.map(|b| b.resolve(current_year)).filter(|&max| {
            if self.exclusive_max {
                value >= max
            } else {
                value > max
            }
        });

        if below.is_some() || above.is_some() || !value.is_finite() {
            Some(Violation::OutOfRange {
                field: self.field,
                value,
                expected: self.describe(current_year),
            })
        } else {
            None
        }
    }

    fn describe(&self, current_year: i32) -> String {
        let lower = self.min.map(|b| {
            let op = if self.exclusive_min { ">" } else { ">=" };
            format!("{} {}", op, b.resolve(current_year))
        });
        let upper = self.max.map(|b| {
            let op = if self.exclusive_max { "<" } else { "<=" };
            format!("{} {}", op, b.resolve(current_year))
        });

        match (lower, upper) {
            (Some(l), Some(u)) => format!("{} and {}", l, u),
            (Some(l), None) => l,
            (None, Some(u)) => u,
            (None, None) => "finite".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    Missing(PayloadField),
    OutOfRange {
        field: PayloadField,
        value: f64,
        expected: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Missing(field) => write!(f, "{} is required", field),
            Violation::OutOfRange {
                field,
                value,
                expected,
            } => write!(f, "{} = {} (expected {})", field, value, expected),
        }
    }
}

/// Payload rejected by the rule set; terminal, never retried
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}", .violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Failed to read rule file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid rule file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Range rule on non-numeric field {0}")]
    NonNumericRange(PayloadField),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ValidationRules {
    #[serde(default)]
    pub required: Vec<PayloadField>,
    #[serde(default)]
    pub ranges: Vec<RangeRule>,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            required: vec![
                PayloadField::District,
                PayloadField::PropertyType,
                PayloadField::AreaSqm,
                PayloadField::Rooms,
                PayloadField::ConstructionYear,
            ],
            ranges: vec![
                RangeRule {
                    field: PayloadField::AreaSqm,
                    min: Some(Bound::Value(0.0)),
                    max: None,
                    exclusive_min: true,
                    exclusive_max: false,
                },
                RangeRule {
                    field: PayloadField::Rooms,
                    min: Some(Bound::Value(0.0)),
                    max: None,
                    exclusive_min: false,
                    exclusive_max: false,
                },
                RangeRule {
                    field: PayloadField::ConstructionYear,
                    min: Some(Bound::Value(1800.0)),
                    max: Some(Bound::Dynamic(DynamicBound::CurrentYear)),
                    exclusive_min: false,
                    exclusive_max: false,
                },
            ],
        }
    }
}

impl ValidationRules {
    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        let rules: ValidationRules = serde_json::from_str(json)?;
        rules.check()?;
        Ok(rules)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    fn check(&self) -> Result<(), RuleError> {
        match self.ranges.iter().find(|r| !r.field.is_numeric()) {
            Some(rule) => Err(RuleError::NonNumericRange(rule.field)),
            None => Ok(()),
        }
    }

    pub fn validate(&self, payload: &ListingPayload) -> Result<(), ValidationError> {
        self.validate_at(payload, Utc::now().year())
    }

    /// Validate with an explicit current year; all violations are reported
    pub fn validate_at(
        &self,
        payload: &ListingPayload,
        current_year: i32,
    ) -> Result<(), ValidationError> {
        let mut violations: Vec<Violation> = self
            .required
            .iter()
            .filter(|field| !field.is_present(payload))
            .map(|field| Violation::Missing(*field))
            .collect();

        for rule in &self.ranges {
            if let Some(value) = rule.field.numeric_value(payload) {
                violations.extend(rule.check(value, current_year));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_payload() -> ListingPayload {
        ListingPayload {
            district: Some("Downtown".to_string()),
            property_type: Some("apartment".to_string()),
            area_sqm: Some(75.0),
            rooms: Some(3),
            construction_year: Some(2005),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_rules_accept_valid_listing() {
        assert!(ValidationRules::default()
            .validate_at(&valid_payload(), 2026)
            .is_ok());
    }

    #[test]
    fn test_negative_area_rejected() {
        let payload = ListingPayload {
            area_sqm: Some(-10.0),
            ..valid_payload()
        };

        let err = ValidationRules::default()
            .validate_at(&payload, 2026)
            .unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert!(matches!(
            err.violations[0],
            Violation::OutOfRange { field: PayloadField::AreaSqm, .. }
        ));
        assert!(err.to_string().contains("area_sqm"));
    }

    #[test]
    fn test_zero_area_rejected_zero_rooms_accepted() {
        let rules = ValidationRules::default();

        let zero_area = ListingPayload {
            area_sqm: Some(0.0),
            ..valid_payload()
        };
        assert!(rules.validate_at(&zero_area, 2026).is_err());

        let studio = ListingPayload {
            rooms: Some(0),
            ..valid_payload()
        };
        assert!(rules.validate_at(&studio, 2026).is_ok());
    }

    #[test]
    fn test_construction_year_bounds() {
        let rules = ValidationRules::default();

        for (year, ok) in [(1799, false), (1800, true), (2026, true), (2027, false)] {
            let payload = ListingPayload {
                construction_year: Some(year),
                ..valid_payload()
            };
            assert_eq!(rules.validate_at(&payload, 2026).is_ok(), ok, "year {}", year);
        }
    }

    #[test]
    fn test_missing_and_blank_fields_reported_together() {
        let payload = ListingPayload {
            district: Some("   ".to_string()),
            area_sqm: None,
            rooms: Some(-1),
            ..valid_payload()
        };

        let err = ValidationRules::default()
            .validate_at(&payload, 2026)
            .unwrap_err();
        assert!(err.violations.contains(&Violation::Missing(PayloadField::District)));
        assert!(err.violations.contains(&Violation::Missing(PayloadField::AreaSqm)));
        assert_eq!(err.violations.len(), 3);
    }

    #[test]
    fn test_rules_from_json() {
        let rules = ValidationRules::from_json(
            r#"{
                "required": ["city"],
                "ranges": [
                    { "field": "rooms", "min": 1, "max": 20 },
                    { "field": "construction_year", "max": "current_year", "exclusive_max": true }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(rules.required, vec![PayloadField::City]);
        assert_eq!(
            rules.ranges[1].max,
            Some(Bound::Dynamic(DynamicBound::CurrentYear))
        );

        let payload = ListingPayload {
            city: Some("Porto".to_string()),
            rooms: Some(4),
            construction_year: Some(2026),
            ..Default::default()
        };
        let err = rules.validate_at(&payload, 2026).unwrap_err();
        assert!(matches!(
            err.violations[0],
            Violation::OutOfRange { field: PayloadField::ConstructionYear, .. }
        ));
    }

    #[test]
    fn test_rule_file_errors() {
        assert!(matches!(
            ValidationRules::from_json(r#"{ "required": ["colour"] }"#),
            Err(RuleError::Parse(_))
        ));
        assert!(matches!(
            ValidationRules::from_json(r#"{ "ranges": [{ "field": "city", "min": 1 }] }"#),
            Err(RuleError::NonNumericRange(PayloadField::City))
        ));
    }
}
