//! Baseline price model: ordinary least squares on log1p(price) with the
//! numeric features plus property-type indicators. Deliberately simple; the
//! serving layer only needs a defensible estimate, not a tuned regressor.

use serde::Serialize;
use tracing::info;

use crate::domain::PropertyType;
use crate::error::{PipelineError, Result};

const MIN_TRAINING_ROWS: usize = 10;
/// Every n-th row goes to the holdout set; deterministic so repeated fits on
/// the same data report the same metrics.
const HOLDOUT_EVERY: usize = 5;
/// Small ridge term keeping X'X invertible when an indicator column is
/// constant in the training data.
const RIDGE: f64 = 1e-8;

/// One training observation pulled from the store.
#[derive(Debug, Clone)]
pub struct TrainingRow {
    pub price: f64,
    pub property_type: PropertyType,
    pub building_area: f64,
    pub main_rooms: u32,
    pub land_area: f64,
}

/// Holdout metrics on the original euro scale.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub trained_rows: usize,
    pub holdout_rows: usize,
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
}

#[derive(Debug, Clone)]
pub struct PredictionInput {
    pub property_type: PropertyType,
    pub building_area: f64,
    pub main_rooms: u32,
    pub land_area: f64,
}

pub struct PriceModel {
    coefficients: Vec<f64>,
    pub summary: ModelSummary,
}

/// [intercept, building_area, main_rooms, land_area, house, apartment, land]
const FEATURES: usize = 7;

fn feature_vector(
    property_type: PropertyType,
    building_area: f64,
    main_rooms: u32,
    land_area: f64,
) -> [f64; FEATURES] {
    [
        1.0,
        building_area,
        main_rooms as f64,
        land_area,
        (property_type == PropertyType::House) as u8 as f64,
        (property_type == PropertyType::Apartment) as u8 as f64,
        (property_type == PropertyType::Land) as u8 as f64,
    ]
}

impl PriceModel {
    /// Fits the model on a deterministic train/holdout split and reports
    /// holdout MAE/RMSE/R². Errors when too few usable rows remain.
    pub fn fit(rows: &[TrainingRow]) -> Result<Self> {
        let usable: Vec<&TrainingRow> = rows.iter().filter(|r| r.price > 0.0).collect();

        let mut train = Vec::new();
        let mut holdout = Vec::new();
        for (i, row) in usable.iter().enumerate() {
            if (i + 1) % HOLDOUT_EVERY == 0 {
                holdout.push(*row);
            } else {
                train.push(*row);
            }
        }
        if train.len() < MIN_TRAINING_ROWS {
            return Err(PipelineError::Model(format!(
                "not enough rows to train a model: {} usable, {MIN_TRAINING_ROWS} required",
                train.len()
            )));
        }

        // Normal equations on the log scale.
        let mut xtx = vec![vec![0.0f64; FEATURES]; FEATURES];
        let mut xty = vec![0.0f64; FEATURES];
        for row in &train {
            let x = feature_vector(
                row.property_type,
                row.building_area,
                row.main_rooms,
                row.land_area,
            );
            let y = row.price.ln_1p();
            for i in 0..FEATURES {
                for j in 0..FEATURES {
                    xtx[i][j] += x[i] * x[j];
                }
                xty[i] += x[i] * y;
            }
        }
        let ridge = RIDGE * train.len() as f64;
        for (i, row) in xtx.iter_mut().enumerate() {
            row[i] += ridge;
        }

        let coefficients = solve(xtx, xty).ok_or_else(|| {
            PipelineError::Model("singular system: training features are degenerate".to_string())
        })?;

        let model = Self {
            coefficients,
            summary: ModelSummary {
                trained_rows: train.len(),
                holdout_rows: holdout.len(),
                mae: 0.0,
                rmse: 0.0,
                r2: 0.0,
            },
        };
        let eval_rows: &[&TrainingRow] = if holdout.is_empty() { &train } else { &holdout };
        let summary = model.evaluate(eval_rows, train.len(), holdout.len());
        info!(
            trained = summary.trained_rows,
            holdout = summary.holdout_rows,
            mae = summary.mae,
            rmse = summary.rmse,
            r2 = summary.r2,
            "price model fitted"
        );
        Ok(Self {
            coefficients: model.coefficients,
            summary,
        })
    }

    fn evaluate(&self, rows: &[&TrainingRow], trained: usize, holdout: usize) -> ModelSummary {
        let truth: Vec<f64> = rows.iter().map(|r| r.price).collect();
        let predicted: Vec<f64> = rows
            .iter()
            .map(|r| {
                self.predict(&PredictionInput {
                    property_type: r.property_type,
                    building_area: r.building_area,
                    main_rooms: r.main_rooms,
                    land_area: r.land_area,
                })
            })
            .collect();

        let n = truth.len() as f64;
        let mae = truth
            .iter()
            .zip(&predicted)
            .map(|(t, p)| (t - p).abs())
            .sum::<f64>()
            / n;
        let mse = truth
            .iter()
            .zip(&predicted)
            .map(|(t, p)| (t - p).powi(2))
            .sum::<f64>()
            / n;
        let mean_truth = truth.iter().sum::<f64>() / n;
        let ss_tot: f64 = truth.iter().map(|t| (t - mean_truth).powi(2)).sum();
        let ss_res: f64 = truth
            .iter()
            .zip(&predicted)
            .map(|(t, p)| (t - p).powi(2))
            .sum();
        let r2 = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

        ModelSummary {
            trained_rows: trained,
            holdout_rows: holdout,
            mae,
            rmse: mse.sqrt(),
            r2,
        }
    }

    /// Predicted sale price in euros, rounded to cents, never negative.
    pub fn predict(&self, input: &PredictionInput) -> f64 {
        let x = feature_vector(
            input.property_type,
            input.building_area,
            input.main_rooms,
            input.land_area,
        );
        let log_price: f64 = x
            .iter()
            .zip(&self.coefficients)
            .map(|(xi, ci)| xi * ci)
            .sum();
        let price = log_price.exp_m1().max(0.0);
        (price * 100.0).round() / 100.0
    }
}

/// Solves `a * x = b` by Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                let pivot_value = a[col][k];
                a[row][k] -= factor * pivot_value;
            }
            let pivot_rhs = b[col];
            b[row] -= factor * pivot_rhs;
        }
    }

    let mut x = vec![0.0f64; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for col in (row + 1)..n {
            sum -= a[row][col] * x[col];
        }
        x[row] = sum / a[row][row];
    }
    Some(x)
}
