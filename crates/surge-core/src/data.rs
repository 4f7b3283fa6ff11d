//! Synthetic payload and lookup-key generation

use chrono::{DateTime, SecondsFormat, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

const FIRST_NAMES: &[&str] = &[
    "John", "Jane", "Michael", "Sarah", "David", "Emily", "Robert", "Jennifer",
];
const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis",
];
const CITIES: &[&str] = &[
    "New York",
    "Los Angeles",
    "Chicago",
    "Houston",
    "Phoenix",
    "Philadelphia",
    "San Antonio",
    "San Diego",
];
const SEARCH_TERMS: &[&str] = &["John", "Jane", "Smith", "New York", "Chicago", "Garcia"];

/// Default upper bound for generated entity ids.
pub const DEFAULT_ENTITY_ID_MAX: u64 = 1000;

/// Body of a create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRecord {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub city: String,
    /// ISO-8601 creation timestamp
    pub created_at: String,
}

/// Source of request inputs for the operation executor.
///
/// Implementations must be free of shared mutable state: every virtual user
/// passes its own random source.
pub trait DataFactory: Send + Sync {
    /// Entity id in `[1, N]`.
    fn random_entity_id(&self, rng: &mut dyn rand::RngCore) -> u64;

    /// Search term drawn from a fixed vocabulary.
    fn random_search_term(&self, rng: &mut dyn rand::RngCore) -> String;

    /// Serialized create payload.
    fn random_record(&self, rng: &mut dyn rand::RngCore) -> serde_json::Value;
}

/// Customer-shaped data factory.
#[derive(Debug, Clone)]
pub struct CustomerDataFactory {
    entity_id_max: u64,
}

impl CustomerDataFactory {
    pub fn new(entity_id_max: u64) -> Self {
        Self {
            entity_id_max: entity_id_max.max(1),
        }
    }

    pub fn entity_id_max(&self) -> u64 {
        self.entity_id_max
    }

    /// Generate a record stamped with `now`.
    pub fn record_at<R: Rng + ?Sized>(&self, rng: &mut R, now: DateTime<Utc>) -> CustomerRecord {
        let first_name = pick(rng, FIRST_NAMES);
        let last_name = pick(rng, LAST_NAMES);
        let city = pick(rng, CITIES);

        CustomerRecord {
            email: format!(
                "{}.{}@example.com",
                first_name.to_lowercase(),
                last_name.to_lowercase()
            ),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            city: city.to_string(),
            created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl Default for CustomerDataFactory {
    fn default() -> Self {
        Self::new(DEFAULT_ENTITY_ID_MAX)
    }
}

impl DataFactory for CustomerDataFactory {
    fn random_entity_id(&self, rng: &mut dyn rand::RngCore) -> u64 {
        rng.gen_range(1..=self.entity_id_max)
    }

    fn random_search_term(&self, rng: &mut dyn rand::RngCore) -> String {
        pick(rng, SEARCH_TERMS).to_string()
    }

    fn random_record(&self, rng: &mut dyn rand::RngCore) -> serde_json::Value {
        let record = self.record_at(rng, Utc::now());
        serde_json::to_value(record).unwrap_or(serde_json::Value::Null)
    }
}

fn pick<'a, R: Rng + ?Sized>(rng: &mut R, values: &'a [&'a str]) -> &'a str {
    values.choose(rng).copied().unwrap_or_default()
}
