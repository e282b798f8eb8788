pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::analysis::predict::TrainingRow;
use crate::domain::{LoadBatch, Location, Parcel, PropertyType, Transaction};
use crate::error::Result;

/// Store-side transaction predicate. Empty/None members match everything.
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    pub property_types: Option<Vec<PropertyType>>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub departments: Option<Vec<String>>,
    pub communes: Option<Vec<String>>,
}

/// Rows written by one batch load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub locations: usize,
    pub parcels: usize,
    pub transactions: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DepartmentCount {
    pub department_code: String,
    pub transactions: u64,
}

/// Storage trait for the entity tables. The pipeline writes through
/// `load_batch`; everything else is read-only and serves the query layer.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upserts one batch atomically, parents before dependents. A failure
    /// rolls the whole batch back.
    async fn load_batch(&self, batch: &LoadBatch) -> Result<LoadSummary>;

    /// Matching transactions ordered by date then id, paginated.
    async fn search_transactions(
        &self,
        query: &TransactionQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>>;

    async fn count_transactions(&self, query: &TransactionQuery) -> Result<u64>;

    /// All matching transactions, for aggregate statistics.
    async fn transactions_matching(&self, query: &TransactionQuery) -> Result<Vec<Transaction>>;

    /// Per-department transaction counts for the matching subset, busiest
    /// department first.
    async fn count_by_department(&self, query: &TransactionQuery) -> Result<Vec<DepartmentCount>>;

    /// Every stored transaction as a model training observation.
    async fn training_rows(&self) -> Result<Vec<TrainingRow>>;

    async fn get_parcel(&self, id: &str) -> Result<Option<Parcel>>;

    async fn get_location(&self, commune_code: &str) -> Result<Option<Location>>;
}
