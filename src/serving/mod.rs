//! Serving-layer request and response structures. Every request is a typed
//! shape with enumerated fields; unknown fields are rejected so interface
//! bugs surface as validation errors instead of silently ignored filters.

pub mod server;
pub mod service;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::analysis::predict::ModelSummary;
use crate::analysis::stats::Descriptive;
use crate::constants::MAX_PAGE_SIZE;
use crate::domain::{PropertyType, Transaction};
use crate::storage::{DepartmentCount, TransactionQuery};

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Filter shared by search and stats requests.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct FilterParams {
    pub property_types: Option<Vec<PropertyType>>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub departments: Option<Vec<String>>,
    pub communes: Option<Vec<String>>,
}

impl FilterParams {
    fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                errors.push(FieldError::new(
                    "date_from",
                    "date_from must not be after date_to",
                ));
            }
        }
        errors
    }

    pub fn to_query(&self) -> TransactionQuery {
        TransactionQuery {
            property_types: self.property_types.clone(),
            date_from: self.date_from,
            date_to: self.date_to,
            departments: self.departments.clone(),
            communes: self.communes.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct SearchRequest {
    pub filter: FilterParams,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl SearchRequest {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = self.filter.validate();
        if let Some(limit) = self.limit {
            if limit == 0 || limit > MAX_PAGE_SIZE {
                errors.push(FieldError::new(
                    "limit",
                    format!("limit must be between 1 and {MAX_PAGE_SIZE}"),
                ));
            }
        }
        errors
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct StatsRequest {
    pub filter: FilterParams,
}

impl StatsRequest {
    pub fn validate(&self) -> Vec<FieldError> {
        self.filter.validate()
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub count: u64,
    pub price: Option<Descriptive>,
    pub building_area: Option<Descriptive>,
    pub price_per_m2: Option<f64>,
    pub by_department: Vec<DepartmentCount>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PredictRequest {
    pub property_type: PropertyType,
    pub building_area: f64,
    pub main_rooms: u32,
    #[serde(default)]
    pub land_area: f64,
}

impl PredictRequest {
    pub fn validate(&self) -> Vec<FieldError> {
        let mut errors = Vec::new();
        if !self.building_area.is_finite() || self.building_area < 0.0 {
            errors.push(FieldError::new(
                "building_area",
                "building area must be a non-negative number",
            ));
        }
        if !self.land_area.is_finite() || self.land_area < 0.0 {
            errors.push(FieldError::new(
                "land_area",
                "land area must be a non-negative number",
            ));
        }
        errors
    }
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub estimated_price: f64,
    pub currency: String,
    pub model: ModelSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Error body shared by validation and service failures.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}

impl ErrorResponse {
    pub fn validation(detail: impl Into<String>, fields: Vec<FieldError>) -> Self {
        Self {
            error: "validation_error".to_string(),
            detail: detail.into(),
            fields,
        }
    }

    pub fn service(detail: impl Into<String>) -> Self {
        Self {
            error: "service_error".to_string(),
            detail: detail.into(),
            fields: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<SearchRequest, _> = serde_json::from_str(
            r#"{"filter": {"price_max": 100000}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn oversized_limit_fails_validation() {
        let request = SearchRequest {
            limit: Some(10_000),
            ..SearchRequest::default()
        };
        let errors = request.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "limit");
    }

    #[test]
    fn inverted_date_range_fails_validation() {
        let request = StatsRequest {
            filter: FilterParams {
                date_from: Some("2022-01-01".parse().unwrap()),
                date_to: Some("2021-01-01".parse().unwrap()),
                ..FilterParams::default()
            },
        };
        assert_eq!(request.validate().len(), 1);
    }

    #[test]
    fn negative_surface_fails_validation() {
        let request = PredictRequest {
            property_type: PropertyType::House,
            building_area: -1.0,
            main_rooms: 3,
            land_area: 0.0,
        };
        let errors = request.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "building_area");
    }

    #[test]
    fn property_types_deserialize_from_lowercase_labels() {
        let request: SearchRequest = serde_json::from_str(
            r#"{"filter": {"property_types": ["house", "apartment"]}}"#,
        )
        .unwrap();
        assert_eq!(
            request.filter.property_types,
            Some(vec![PropertyType::House, PropertyType::Apartment])
        );
    }
}
