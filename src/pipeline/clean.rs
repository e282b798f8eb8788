//! Cleaning: configurable deduplication plus the missing-value policy.
//! Re-running the stage on already-clean data yields the same set.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::info;

use crate::pipeline::validate::SaleRecord;

/// Fields that can participate in the dedupe equality key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyField {
    ParcelId,
    Date,
    Price,
    CommuneCode,
    PropertyType,
    BuildingArea,
}

/// What to do with rows missing an optional value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Keep the row with an explicit zero.
    Zero,
    /// Remove the row from the cleaned set.
    Drop,
}

#[derive(Debug, Clone)]
pub struct CleanPolicy {
    pub key_fields: Vec<KeyField>,
    pub missing_land_area: MissingPolicy,
}

impl Default for CleanPolicy {
    fn default() -> Self {
        Self {
            key_fields: vec![KeyField::ParcelId, KeyField::Date, KeyField::Price],
            missing_land_area: MissingPolicy::Zero,
        }
    }
}

/// A cleaned record with its canonical dedupe key.
#[derive(Debug, Clone)]
pub struct CleanRecord {
    pub record: SaleRecord,
    pub dedupe_key: String,
}

#[derive(Debug, Default)]
pub struct CleanOutcome {
    pub records: Vec<CleanRecord>,
    pub duplicates_removed: usize,
    pub dropped_missing: usize,
}

/// Computes the canonical dedupe key: the configured fields joined into a
/// canonical string, hashed with SHA-256. The same key also seeds the stored
/// transaction id.
pub fn dedupe_key(record: &SaleRecord, key_fields: &[KeyField]) -> String {
    let mut canonical = String::new();
    for field in key_fields {
        match field {
            KeyField::ParcelId => canonical.push_str(&record.parcel_id),
            KeyField::Date => canonical.push_str(&record.date.to_string()),
            KeyField::Price => canonical.push_str(&format!("{:.2}", record.price)),
            KeyField::CommuneCode => canonical.push_str(&record.commune_code),
            KeyField::PropertyType => canonical.push_str(&record.property_type.code().to_string()),
            KeyField::BuildingArea => canonical.push_str(&format!("{:.2}", record.building_area)),
        }
        canonical.push('|');
    }
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deduplicates the validated set and applies the missing-value policy.
/// The first occurrence in input order is the canonical representative.
pub fn clean(records: Vec<SaleRecord>, policy: &CleanPolicy) -> CleanOutcome {
    let mut outcome = CleanOutcome::default();
    let mut seen: HashSet<String> = HashSet::new();

    for mut record in records {
        if record.land_area.is_none() {
            match policy.missing_land_area {
                MissingPolicy::Zero => record.land_area = Some(0.0),
                MissingPolicy::Drop => {
                    outcome.dropped_missing += 1;
                    continue;
                }
            }
        }

        let key = dedupe_key(&record, &policy.key_fields);
        if !seen.insert(key.clone()) {
            outcome.duplicates_removed += 1;
            continue;
        }
        outcome.records.push(CleanRecord {
            record,
            dedupe_key: key,
        });
    }

    info!(
        kept = outcome.records.len(),
        duplicates_removed = outcome.duplicates_removed,
        dropped_missing = outcome.dropped_missing,
        "cleaning finished"
    );
    outcome
}
