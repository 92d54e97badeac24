//! Feature preparation
//!
//! Turns a validated payload into the flat vector the model was trained on.
//! Everything data-dependent (frequent categories, clip bounds, amenity
//! vocabulary) is fitted offline and supplied as [`FeatureParams`].

use chrono::Datelike;
use event_schema::ListingPayload;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// Label substituted for categories outside the frequent set
pub const OTHER_CATEGORY: &str = "Other";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaSource {
    AreaSqm,
    NetAreaSqm,
    GrossAreaSqm,
}

impl AreaSource {
    fn value(self, payload: &ListingPayload) -> Option<f64> {
        match self {
            AreaSource::AreaSqm => payload.area_sqm,
            AreaSource::NetAreaSqm => payload.net_area_sqm,
            AreaSource::GrossAreaSqm => payload.gross_area_sqm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipBounds {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("Failed to read feature parameters: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid feature parameters: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Clip bounds for {column} are inverted ({lower} > {upper})")]
    InvertedBounds {
        column: String,
        lower: f64,
        upper: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureParams {
    /// First present area measurement wins
    pub area_priority: Vec<AreaSource>,
    /// Per categorical column; columns without an entry pass through unchanged.
    /// Matched against the trimmed, lowercased value.
    pub frequent_categories: BTreeMap<String, BTreeSet<String>>,
    pub amenity_vocabulary: Vec<String>,
    pub clip_bounds: BTreeMap<String, ClipBounds>,
    pub drop_columns: Vec<String>,
}

impl Default for FeatureParams {
    fn default() -> Self {
        Self {
            area_priority: vec![
                AreaSource::AreaSqm,
                AreaSource::NetAreaSqm,
                AreaSource::GrossAreaSqm,
            ],
            frequent_categories: BTreeMap::new(),
            amenity_vocabulary: ["elevator", "garage", "balcony", "terrace", "pool", "garden"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            clip_bounds: BTreeMap::new(),
            drop_columns: Vec::new(),
        }
    }
}

impl FeatureParams {
    pub fn from_json(json: &str) -> Result<Self, ParamsError> {
        let params: FeatureParams = serde_json::from_str(json)?;

        if let Some((column, bounds)) = params.clip_bounds.iter().find(|(_, b)| b.lower > b.upper)
        {
            return Err(ParamsError::InvertedBounds {
                column: column.clone(),
                lower: bounds.lower,
                upper: bounds.upper,
            });
        }

        Ok(params.normalized())
    }

    /// Frequent-category lists in the same trimmed, lowercased form as payloads
    pub fn normalized(mut self) -> Self {
        for values in self.frequent_categories.values_mut() {
            *values = values
                .iter()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect();
        }
        self
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ParamsError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn prepare(&self, payload: &ListingPayload) -> FeatureVector {
        let payload = &normalize(payload);
        let mut features = BTreeMap::new();

        let main_area = self
            .area_priority
            .iter()
            .find_map(|source| source.value(payload));
        features.insert("main_area".to_string(), FeatureValue::number(main_area));
        features.insert(
            "rooms".to_string(),
            FeatureValue::number(payload.rooms.map(f64::from)),
        );
        features.insert(
            "construction_year".to_string(),
            FeatureValue::number(payload.construction_year.map(f64::from)),
        );

        let categories = [
            ("district", &payload.district),
            ("city", &payload.city),
            ("town", &payload.town),
            ("property_type", &payload.property_type),
            ("energy_certificate", &payload.energy_certificate),
        ];
        for (column, value) in categories {
            features.insert(column.to_string(), self.group_category(column, value));
        }

        let amenities = parse_amenities(&payload.amenities);
        for name in &self.amenity_vocabulary {
            let value = match amenities.get(name.as_str()) {
                Some(flag) => FeatureValue::number(*flag),
                None => FeatureValue::Number(0.0),
            };
            features.insert(format!("amenity_{}", name), value);
        }

        let published = payload.published_at;
        features.insert(
            "publish_year".to_string(),
            FeatureValue::number(published.map(|d| f64::from(d.year()))),
        );
        features.insert(
            "publish_month".to_string(),
            FeatureValue::number(published.map(|d| f64::from(d.month()))),
        );

        for (column, bounds) in &self.clip_bounds {
            if let Some(FeatureValue::Number(v)) = features.get_mut(column) {
                *v = v.max(bounds.lower).min(bounds.upper);
            }
        }

        for column in &self.drop_columns {
            features.remove(column);
        }

        FeatureVector(features)
    }

    fn group_category(&self, column: &str, value: &Option<String>) -> FeatureValue {
        let Some(value) = value.as_deref() else {
            return FeatureValue::Missing;
        };

        match self.frequent_categories.get(column) {
            Some(frequent) if !frequent.contains(value) => {
                FeatureValue::Category(OTHER_CATEGORY.to_string())
            }
            _ => FeatureValue::Category(value.to_string()),
        }
    }
}

/// Copy of `payload` with every text field trimmed and lowercased, blank text
/// treated as absent.
///
/// Feature vectors and cache keys are both derived from this form, so two
/// payloads share a cache key only when the model sees identical inputs.
pub fn normalize(payload: &ListingPayload) -> ListingPayload {
    fn text(value: &Option<String>) -> Option<String> {
        value
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
    }

    ListingPayload {
        district: text(&payload.district),
        city: text(&payload.city),
        town: text(&payload.town),
        property_type: text(&payload.property_type),
        area_sqm: payload.area_sqm,
        gross_area_sqm: payload.gross_area_sqm,
        net_area_sqm: payload.net_area_sqm,
        rooms: payload.rooms,
        construction_year: payload.construction_year,
        energy_certificate: text(&payload.energy_certificate),
        amenities: payload
            .amenities
            .iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect(),
        published_at: payload.published_at,
    }
}

/// Amenity tags as 0/1 indicators; `None` when a `name=value` tag is unreadable
fn parse_amenities(tags: &BTreeSet<String>) -> HashMap<String, Option<f64>> {
    tags.iter()
        .filter_map(|tag| {
            let (name, flag) = match tag.split_once('=') {
                Some((name, value)) => (name, parse_flag(value)),
                None => (tag.as_str(), Some(1.0)),
            };
            let name = name.trim().to_lowercase();
            (!name.is_empty()).then_some((name, flag))
        })
        .collect()
}

fn parse_flag(value: &str) -> Option<f64> {
    match value.trim().to_lowercase().as_str() {
        "yes" | "true" | "1" | "y" => Some(1.0),
        "no" | "false" | "0" | "n" => Some(0.0),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Category(String),
    Missing,
}

impl FeatureValue {
    fn number(value: Option<f64>) -> Self {
        value.map_or(FeatureValue::Missing, FeatureValue::Number)
    }
}

/// Named model inputs, serialized as a flat JSON object
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FeatureVector(BTreeMap<String, FeatureValue>);

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
