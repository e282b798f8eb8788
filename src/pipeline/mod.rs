//! Stage orchestration: raw ingestion → validation → cleaning → filtering →
//! load, in dependency order. Each stage logs its own counts; the run result
//! carries the totals for the operator summary.

pub mod clean;
pub mod filter;
pub mod ingest;
pub mod sample;
pub mod validate;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::constants::region_for_department;
use crate::domain::{LoadBatch, Location, Parcel, Transaction, TRANSACTION_NAMESPACE};
use crate::error::Result;
use crate::observability::metrics as obs;
use crate::pipeline::clean::{CleanPolicy, CleanRecord};
use crate::pipeline::filter::SaleFilter;
use crate::pipeline::validate::{RowValidator, ValidationReport};
use crate::storage::{LoadSummary, Storage};

/// Totals from one batch run, printed to the operator at the end.
#[derive(Debug, Default)]
pub struct PipelineRunResult {
    pub files: usize,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub rejected_rows: usize,
    pub duplicates_removed: usize,
    pub dropped_missing: usize,
    pub kept_after_filter: usize,
    pub loaded: LoadSummary,
}

/// Runs every stage over the given extracts and loads the result into the
/// store. Validation failures never abort the batch; the load is atomic.
pub async fn run_pipeline(
    inputs: &[PathBuf],
    config: &Config,
    filter: &SaleFilter,
    storage: &dyn Storage,
    rejected_out: Option<&Path>,
) -> Result<PipelineRunResult> {
    let delimiter = config.pipeline.delimiter_byte()?;
    let validator = RowValidator::new(config.pipeline.min_year, config.pipeline.max_year);

    // Ingest + validate per file, accumulating one report across the batch.
    let started = Instant::now();
    let mut report = ValidationReport::default();
    for input in inputs {
        let batch = ingest::read_delimited(input, delimiter)?;
        obs::pipeline::rows_ingested(batch.rows.len() as u64);
        report.merge(validator.validate_batch(&batch));
    }
    obs::pipeline::rows_rejected(report.rejected.len() as u64);
    obs::pipeline::stage_duration("validate", started.elapsed().as_secs_f64());

    if let Some(path) = rejected_out {
        if !report.rejected.is_empty() {
            validate::write_rejected_csv(path, &report.rejected)?;
            info!(path = %path.display(), rows = report.rejected.len(), "rejected rows exported");
        }
    }

    let mut result = PipelineRunResult {
        files: inputs.len(),
        total_rows: report.total_rows,
        valid_rows: report.records.len(),
        rejected_rows: report.rejected.len(),
        ..PipelineRunResult::default()
    };

    // Clean
    let started = Instant::now();
    let policy = CleanPolicy {
        key_fields: config.cleaning.key_fields.clone(),
        missing_land_area: config.cleaning.missing_land_area,
    };
    let outcome = clean::clean(report.records, &policy);
    obs::pipeline::duplicates_removed(outcome.duplicates_removed as u64);
    obs::pipeline::rows_dropped_missing(outcome.dropped_missing as u64);
    obs::pipeline::stage_duration("clean", started.elapsed().as_secs_f64());
    result.duplicates_removed = outcome.duplicates_removed;
    result.dropped_missing = outcome.dropped_missing;

    // Filter
    let filtered = filter.apply(&outcome.records);
    result.kept_after_filter = filtered.len();

    // Load
    let started = Instant::now();
    let batch = build_load_batch(&filtered);
    if !batch.is_empty() {
        result.loaded = storage.load_batch(&batch).await?;
        obs::pipeline::rows_loaded(result.loaded.transactions as u64);
    }
    obs::pipeline::stage_duration("load", started.elapsed().as_secs_f64());

    info!(
        files = result.files,
        rows = result.total_rows,
        loaded = result.loaded.transactions,
        "pipeline run finished"
    );
    Ok(result)
}

/// Maps the filtered set to entity batches: one location per commune, one
/// parcel per cadastral id, one transaction per cleaned record. Parents come
/// first so the loader can satisfy referential integrity.
pub fn build_load_batch(records: &[CleanRecord]) -> LoadBatch {
    let mut batch = LoadBatch::default();
    let mut seen_communes: HashSet<String> = HashSet::new();
    let mut seen_parcels: HashSet<String> = HashSet::new();

    for clean in records {
        let record = &clean.record;
        if seen_communes.insert(record.commune_code.clone()) {
            batch.locations.push(Location {
                commune_code: record.commune_code.clone(),
                postal_code: format!("{:05}", record.postal_code),
                department_code: record.department_code.clone(),
                region: region_for_department(&record.department_code).map(|r| r.to_string()),
            });
        }
        if seen_parcels.insert(record.parcel_id.clone()) {
            batch.parcels.push(Parcel {
                id: record.parcel_id.clone(),
                commune_code: record.commune_code.clone(),
                land_area: record.land_area.unwrap_or_default(),
            });
        }
        batch.transactions.push(Transaction {
            id: Uuid::new_v5(&TRANSACTION_NAMESPACE, clean.dedupe_key.as_bytes()),
            date: record.date,
            price: record.price,
            property_type: record.property_type,
            building_area: record.building_area,
            main_rooms: record.main_rooms,
            land_area: record.land_area.unwrap_or_default(),
            parcel_id: record.parcel_id.clone(),
            commune_code: record.commune_code.clone(),
            latitude: record.latitude,
            longitude: record.longitude,
        });
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PropertyType;
    use crate::pipeline::clean::{clean, CleanPolicy};
    use crate::pipeline::validate::SaleRecord;
    use chrono::NaiveDate;

    fn record(parcel: &str, commune: &str) -> SaleRecord {
        SaleRecord {
            date: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
            nature: Some("Vente".to_string()),
            price: 150000.0,
            postal_code: 75011,
            department_code: commune[..2].to_string(),
            commune_code: commune.to_string(),
            property_type: PropertyType::Apartment,
            building_area: 60.0,
            main_rooms: 3,
            land_area: Some(0.0),
            parcel_id: parcel.to_string(),
            latitude: None,
            longitude: None,
        }
    }

    #[test]
    fn entities_are_deduplicated_per_batch() {
        let records = clean(
            vec![
                record("75111000AB0042", "75111"),
                record("75111000AB0099", "75111"),
                record("92044000CD0007", "92044"),
            ],
            &CleanPolicy::default(),
        )
        .records;
        let batch = build_load_batch(&records);
        assert_eq!(batch.locations.len(), 2);
        assert_eq!(batch.parcels.len(), 3);
        assert_eq!(batch.transactions.len(), 3);
    }

    #[test]
    fn transaction_ids_are_stable_across_runs() {
        let records = clean(vec![record("75111000AB0042", "75111")], &CleanPolicy::default()).records;
        let first = build_load_batch(&records);
        let second = build_load_batch(&records);
        assert_eq!(first.transactions[0].id, second.transactions[0].id);
    }

    #[test]
    fn idf_locations_carry_the_region() {
        let records = clean(
            vec![record("75111000AB0042", "75111"), record("33063000EF0001", "33063")],
            &CleanPolicy::default(),
        )
        .records;
        let batch = build_load_batch(&records);
        let paris = batch.locations.iter().find(|l| l.commune_code == "75111").unwrap();
        let bordeaux = batch.locations.iter().find(|l| l.commune_code == "33063").unwrap();
        assert_eq!(paris.region.as_deref(), Some("Île-de-France"));
        assert_eq!(bordeaux.region, None);
    }
}
