//! Synthetic listings for load generation and local runs

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use event_schema::ListingPayload;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;

const LOCATIONS: &[(&str, &str, &[&str])] = &[
    ("Lisboa", "Lisboa", &["Arroios", "Alvalade", "Belém", "Campo de Ourique"]),
    ("Lisboa", "Cascais", &["Estoril", "Carcavelos"]),
    ("Porto", "Porto", &["Bonfim", "Paranhos", "Cedofeita"]),
    ("Porto", "Vila Nova de Gaia", &["Mafamude", "Canidelo"]),
    ("Faro", "Lagos", &["São Gonçalo"]),
    ("Braga", "Braga", &["São Víctor", "Maximinos"]),
    ("Setúbal", "Almada", &["Costa da Caparica"]),
];

const PROPERTY_TYPES: &[&str] = &["apartment", "house", "duplex", "studio"];
const ENERGY_CERTIFICATES: &[&str] = &["A+", "A", "B", "B-", "C", "D", "E", "F"];
const AMENITIES: &[&str] = &["elevator", "garage", "balcony", "terrace", "pool", "garden"];

/// Plausible random listings; the same seed always yields the same sequence
pub struct ListingGenerator {
    rng: StdRng,
    invalid_ratio: f64,
}

impl ListingGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            invalid_ratio: 0.0,
        }
    }

    /// Share of listings deliberately broken so they fail validation
    pub fn with_invalid_ratio(mut self, ratio: f64) -> Self {
        self.invalid_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn next_payload(&mut self) -> ListingPayload {
        let (district, city, towns) = *LOCATIONS.choose(&mut self.rng).unwrap_or(&LOCATIONS[0]);
        let town = towns.choose(&mut self.rng).copied();
        let property_type = PROPERTY_TYPES.choose(&mut self.rng).copied().unwrap_or("apartment");

        let rooms: i32 = match property_type {
            "studio" => 0,
            "house" => self.rng.gen_range(2..=6),
            _ => self.rng.gen_range(1..=4),
        };
        let net_area = f64::from(25 + rooms * 20) + self.rng.gen_range(0.0..30.0);
        let gross_area = net_area * self.rng.gen_range(1.08..1.25);

        let amenities: BTreeSet<String> = AMENITIES
            .iter()
            .filter_map(|name| match self.rng.gen_range(0..4) {
                0 => Some(format!("{}=yes", name)),
                1 => Some(format!("{}=no", name)),
                2 => Some(name.to_string()),
                _ => None,
            })
            .collect();

        let published_at = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).single().map(|start| {
            start + ChronoDuration::days(self.rng.gen_range(0..730))
        });

        let mut payload = ListingPayload {
            district: Some(district.to_string()),
            city: Some(city.to_string()),
            town: town.map(str::to_string),
            property_type: Some(property_type.to_string()),
            area_sqm: Some((net_area * 10.0).round() / 10.0),
            gross_area_sqm: Some((gross_area * 10.0).round() / 10.0),
            net_area_sqm: Some((net_area * 10.0).round() / 10.0),
            rooms: Some(rooms),
            construction_year: Some(self.rng.gen_range(1900..=2024)),
            energy_certificate: ENERGY_CERTIFICATES.choose(&mut self.rng).map(|c| c.to_string()),
            amenities,
            published_at,
        };

        if self.invalid_ratio > 0.0 && self.rng.gen_bool(self.invalid_ratio) {
            match self.rng.gen_range(0..3) {
                0 => payload.area_sqm = Some(-self.rng.gen_range(1.0..100.0)),
                1 => payload.district = None,
                _ => payload.construction_year = Some(self.rng.gen_range(1500..1800)),
            }
        }

        payload
    }
}

impl Iterator for ListingGenerator {
    type Item = ListingPayload;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ValidationRules;

    #[test]
    fn test_same_seed_same_listings() {
        let a: Vec<_> = ListingGenerator::new(7).take(20).collect();
        let b: Vec<_> = ListingGenerator::new(7).take(20).collect();
        let c: Vec<_> = ListingGenerator::new(8).take(20).collect();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_generated_listings_pass_default_rules() {
        let rules = ValidationRules::default();

        for payload in ListingGenerator::new(42).take(200) {
            assert!(rules.validate_at(&payload, 2026).is_ok(), "{:?}", payload);
        }
    }

    #[test]
    fn test_invalid_ratio() {
        let rules = ValidationRules::default();
        let invalid = ListingGenerator::new(1)
            .with_invalid_ratio(1.0)
            .take(50)
            .filter(|p| rules.validate_at(p, 2026).is_err())
            .count();

        assert_eq!(invalid, 50);
    }
}
