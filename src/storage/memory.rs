//! In-memory storage implementation for development and tests. Mirrors the
//! SQLite store's behavior, including batch atomicity and the referential
//! integrity check.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::{DepartmentCount, LoadSummary, Storage, TransactionQuery};
use crate::analysis::predict::TrainingRow;
use crate::domain::{LoadBatch, Location, Parcel, Transaction};
use crate::error::{PipelineError, Result};

#[derive(Default, Clone)]
struct Inner {
    locations: HashMap<String, Location>,
    parcels: HashMap<String, Parcel>,
    transactions: HashMap<Uuid, Transaction>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(inner: &Inner, transaction: &Transaction, query: &TransactionQuery) -> bool {
    if let Some(types) = &query.property_types {
        if !types.is_empty() && !types.contains(&transaction.property_type) {
            return false;
        }
    }
    if let Some(from) = query.date_from {
        if transaction.date < from {
            return false;
        }
    }
    if let Some(to) = query.date_to {
        if transaction.date > to {
            return false;
        }
    }
    if let Some(departments) = &query.departments {
        if !departments.is_empty() {
            let department = inner
                .locations
                .get(&transaction.commune_code)
                .map(|l| l.department_code.clone())
                .unwrap_or_default();
            if !departments.iter().any(|d| d.eq_ignore_ascii_case(&department)) {
                return false;
            }
        }
    }
    if let Some(communes) = &query.communes {
        if !communes.is_empty() && !communes.contains(&transaction.commune_code) {
            return false;
        }
    }
    true
}

fn matching_sorted(inner: &Inner, query: &TransactionQuery) -> Vec<Transaction> {
    let mut result: Vec<Transaction> = inner
        .transactions
        .values()
        .filter(|t| matches(inner, t, query))
        .cloned()
        .collect();
    result.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
    result
}

#[async_trait]
impl Storage for InMemoryStore {
    async fn load_batch(&self, batch: &LoadBatch) -> Result<LoadSummary> {
        let mut inner = self.inner.lock().unwrap();

        // Apply to a scratch copy so a failing batch leaves the store as-is.
        let mut next = inner.clone();
        for location in &batch.locations {
            next.locations
                .insert(location.commune_code.clone(), location.clone());
        }
        for parcel in &batch.parcels {
            next.parcels.insert(parcel.id.clone(), parcel.clone());
        }
        for transaction in &batch.transactions {
            if !next.parcels.contains_key(&transaction.parcel_id) {
                return Err(PipelineError::Integrity(format!(
                    "transaction {} references unknown parcel '{}'",
                    transaction.id, transaction.parcel_id
                )));
            }
            if !next.locations.contains_key(&transaction.commune_code) {
                return Err(PipelineError::Integrity(format!(
                    "transaction {} references unknown commune '{}'",
                    transaction.id, transaction.commune_code
                )));
            }
            next.transactions.insert(transaction.id, transaction.clone());
        }
        *inner = next;

        debug!(
            transactions = batch.transactions.len(),
            "batch loaded into memory store"
        );
        Ok(LoadSummary {
            locations: batch.locations.len(),
            parcels: batch.parcels.len(),
            transactions: batch.transactions.len(),
        })
    }

    async fn search_transactions(
        &self,
        query: &TransactionQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let inner = self.inner.lock().unwrap();
        Ok(matching_sorted(&inner, query)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn count_transactions(&self, query: &TransactionQuery) -> Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .transactions
            .values()
            .filter(|t| matches(&inner, t, query))
            .count() as u64)
    }

    async fn transactions_matching(&self, query: &TransactionQuery) -> Result<Vec<Transaction>> {
        let inner = self.inner.lock().unwrap();
        Ok(matching_sorted(&inner, query))
    }

    async fn count_by_department(&self, query: &TransactionQuery) -> Result<Vec<DepartmentCount>> {
        let inner = self.inner.lock().unwrap();
        let mut counts: HashMap<String, u64> = HashMap::new();
        for transaction in inner.transactions.values() {
            if !matches(&inner, transaction, query) {
                continue;
            }
            let department = inner
                .locations
                .get(&transaction.commune_code)
                .map(|l| l.department_code.clone())
                .unwrap_or_default();
            *counts.entry(department).or_insert(0) += 1;
        }
        let mut result: Vec<DepartmentCount> = counts
            .into_iter()
            .map(|(department_code, transactions)| DepartmentCount {
                department_code,
                transactions,
            })
            .collect();
        result.sort_by(|a, b| {
            b.transactions
                .cmp(&a.transactions)
                .then(a.department_code.cmp(&b.department_code))
        });
        Ok(result)
    }

    async fn training_rows(&self) -> Result<Vec<TrainingRow>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .transactions
            .values()
            .map(|t| TrainingRow {
                price: t.price,
                property_type: t.property_type,
                building_area: t.building_area,
                main_rooms: t.main_rooms,
                land_area: t.land_area,
            })
            .collect())
    }

    async fn get_parcel(&self, id: &str) -> Result<Option<Parcel>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.parcels.get(id).cloned())
    }

    async fn get_location(&self, commune_code: &str) -> Result<Option<Location>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.locations.get(commune_code).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PropertyType;

    fn batch() -> LoadBatch {
        LoadBatch {
            locations: vec![Location {
                commune_code: "75111".to_string(),
                postal_code: "75011".to_string(),
                department_code: "75".to_string(),
                region: Some("Île-de-France".to_string()),
            }],
            parcels: vec![Parcel {
                id: "75111000AB0042".to_string(),
                commune_code: "75111".to_string(),
                land_area: 0.0,
            }],
            transactions: vec![Transaction {
                id: Uuid::from_u128(1),
                date: "2021-03-01".parse().unwrap(),
                price: 150000.0,
                property_type: PropertyType::Apartment,
                building_area: 60.0,
                main_rooms: 3,
                land_area: 0.0,
                parcel_id: "75111000AB0042".to_string(),
                commune_code: "75111".to_string(),
                latitude: Some(48.8698),
                longitude: Some(2.3791),
            }],
        }
    }

    #[tokio::test]
    async fn department_filter_uses_the_location_table() {
        let store = InMemoryStore::new();
        store.load_batch(&batch()).await.unwrap();
        let count = store
            .count_transactions(&TransactionQuery {
                departments: Some(vec!["75".to_string()]),
                ..TransactionQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn orphan_transactions_fail_the_whole_batch() {
        let store = InMemoryStore::new();
        let mut bad = batch();
        bad.transactions[0].parcel_id = "unknown".to_string();
        assert!(store.load_batch(&bad).await.is_err());
        assert_eq!(store.count_transactions(&TransactionQuery::default()).await.unwrap(), 0);
    }
}
