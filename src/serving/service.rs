//! Query service: thin read-only layer between the HTTP handlers and the
//! store. Handlers validate requests before calling in; everything here
//! assumes well-formed input.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{
    PredictRequest, PredictResponse, SearchRequest, SearchResponse, StatsRequest, StatsResponse,
};
use crate::analysis::predict::{PredictionInput, PriceModel};
use crate::analysis::stats;
use crate::error::{PipelineError, Result};
use crate::storage::Storage;

pub struct QueryService {
    storage: Arc<dyn Storage>,
    model: RwLock<Option<PriceModel>>,
}

impl QueryService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            model: RwLock::new(None),
        }
    }

    /// Fits the price model from the stored transactions. Called at server
    /// startup; a store without enough rows leaves prediction unavailable
    /// rather than failing the whole process.
    pub async fn initialize_model(&self) {
        match self.fit_model().await {
            Ok(()) => info!("price model ready"),
            Err(e) => warn!("price model unavailable: {e}"),
        }
    }

    async fn fit_model(&self) -> Result<()> {
        let rows = self.storage.training_rows().await?;
        let model = PriceModel::fit(&rows)?;
        *self.model.write().await = Some(model);
        Ok(())
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let query = request.filter.to_query();
        let limit = request.limit();
        let offset = request.offset();
        let total = self.storage.count_transactions(&query).await?;
        let transactions = self
            .storage
            .search_transactions(&query, limit, offset)
            .await?;
        Ok(SearchResponse {
            total,
            limit,
            offset,
            transactions,
        })
    }

    pub async fn stats(&self, request: StatsRequest) -> Result<StatsResponse> {
        let query = request.filter.to_query();
        let transactions = self.storage.transactions_matching(&query).await?;
        let by_department = self.storage.count_by_department(&query).await?;

        let prices: Vec<f64> = transactions.iter().map(|t| t.price).collect();
        let areas: Vec<f64> = transactions.iter().map(|t| t.building_area).collect();
        Ok(StatsResponse {
            count: transactions.len() as u64,
            price: stats::describe(&prices),
            building_area: stats::describe(&areas),
            price_per_m2: stats::mean_price_per_m2(&transactions),
            by_department,
        })
    }

    pub async fn predict(&self, request: PredictRequest) -> Result<PredictResponse> {
        // Lazily fit when startup found an empty store that has since been
        // loaded.
        if self.model.read().await.is_none() {
            self.fit_model().await?;
        }
        let guard = self.model.read().await;
        let model = guard
            .as_ref()
            .ok_or_else(|| PipelineError::Model("no trained model available".to_string()))?;

        let estimate = model.predict(&PredictionInput {
            property_type: request.property_type,
            building_area: request.building_area,
            main_rooms: request.main_rooms,
            land_area: request.land_area,
        });
        Ok(PredictResponse {
            estimated_price: estimate,
            currency: "EUR".to_string(),
            model: model.summary.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LoadBatch, Location, Parcel, PropertyType, Transaction};
    use crate::serving::FilterParams;
    use crate::storage::memory::InMemoryStore;
    use uuid::Uuid;

    async fn populated_service(transactions: usize) -> QueryService {
        let store = Arc::new(InMemoryStore::new());
        let mut batch = LoadBatch {
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
            transactions: Vec::new(),
        };
        for i in 0..transactions {
            batch.transactions.push(Transaction {
                id: Uuid::from_u128(i as u128 + 1),
                date: "2021-03-01".parse().unwrap(),
                price: 100_000.0 + i as f64 * 10_000.0,
                property_type: if i % 2 == 0 {
                    PropertyType::Apartment
                } else {
                    PropertyType::House
                },
                building_area: 40.0 + i as f64,
                main_rooms: 2 + (i as u32 % 3),
                land_area: 0.0,
                parcel_id: "75111000AB0042".to_string(),
                commune_code: "75111".to_string(),
                latitude: None,
                longitude: None,
            });
        }
        store.load_batch(&batch).await.unwrap();
        QueryService::new(store)
    }

    #[tokio::test]
    async fn search_paginates_and_reports_the_total() {
        let service = populated_service(7).await;
        let response = service
            .search(SearchRequest {
                limit: Some(3),
                offset: Some(0),
                ..SearchRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(response.total, 7);
        assert_eq!(response.transactions.len(), 3);
    }

    #[tokio::test]
    async fn stats_summarize_the_matching_subset() {
        let service = populated_service(4).await;
        let response = service
            .stats(StatsRequest {
                filter: FilterParams {
                    property_types: Some(vec![PropertyType::Apartment]),
                    ..FilterParams::default()
                },
            })
            .await
            .unwrap();
        assert_eq!(response.count, 2);
        assert!(response.price.is_some());
        assert!(response.price_per_m2.is_some());
        assert_eq!(response.by_department[0].department_code, "75");
    }

    #[tokio::test]
    async fn predict_fits_lazily_from_the_store() {
        let service = populated_service(30).await;
        let response = service
            .predict(PredictRequest {
                property_type: PropertyType::Apartment,
                building_area: 55.0,
                main_rooms: 3,
                land_area: 0.0,
            })
            .await
            .unwrap();
        assert!(response.estimated_price > 0.0);
        assert_eq!(response.currency, "EUR");
    }

    #[tokio::test]
    async fn predict_without_data_is_a_model_error() {
        let store = Arc::new(InMemoryStore::new());
        let service = QueryService::new(store);
        let result = service
            .predict(PredictRequest {
                property_type: PropertyType::House,
                building_area: 60.0,
                main_rooms: 3,
                land_area: 0.0,
            })
            .await;
        assert!(matches!(result, Err(PipelineError::Model(_))));
    }
}
