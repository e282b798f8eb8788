//! Descriptive statistics for the serving layer's aggregate responses.

use serde::Serialize;

use crate::domain::Transaction;

/// Summary of one numeric variable.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Descriptive {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub median: f64,
    pub max: f64,
}

/// Computes count/mean/std/min/median/max over the values. Returns `None`
/// for an empty slice. NaN values are the caller's bug, not handled here.
pub fn describe(values: &[f64]) -> Option<Descriptive> {
    if values.is_empty() {
        return None;
    }
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let variance = values
        .iter()
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / count as f64;

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let median = if count % 2 == 1 {
        sorted[count / 2]
    } else {
        (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
    };

    Some(Descriptive {
        count,
        mean,
        std: variance.sqrt(),
        min: sorted[0],
        median,
        max: sorted[count - 1],
    })
}

/// Mean price per square meter over transactions with a positive building
/// area. Land-only sales carry no building surface and are skipped.
pub fn mean_price_per_m2(transactions: &[Transaction]) -> Option<f64> {
    let ratios: Vec<f64> = transactions
        .iter()
        .filter(|t| t.building_area > 0.0)
        .map(|t| t.price / t.building_area)
        .collect();
    if ratios.is_empty() {
        return None;
    }
    Some(ratios.iter().sum::<f64>() / ratios.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PropertyType;
    use chrono::NaiveDate;
    use uuid::Uuid;

    #[test]
    fn describe_matches_hand_computed_values() {
        let stats = describe(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert!((stats.std - 1.118).abs() < 1e-3);
    }

    #[test]
    fn odd_length_median_is_the_middle_value() {
        let stats = describe(&[5.0, 1.0, 3.0]).unwrap();
        assert_eq!(stats.median, 3.0);
    }

    #[test]
    fn empty_input_yields_none() {
        assert!(describe(&[]).is_none());
    }

    fn transaction(price: f64, building_area: f64) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(),
            price,
            property_type: PropertyType::Apartment,
            building_area,
            main_rooms: 3,
            land_area: 0.0,
            parcel_id: "75111000AB0042".to_string(),
            commune_code: "75111".to_string(),
            latitude: None,
            longitude: None,
        }
    }

    #[test]
    fn price_per_m2_skips_zero_surface() {
        let transactions = vec![transaction(100000.0, 50.0), transaction(200000.0, 0.0)];
        assert_eq!(mean_price_per_m2(&transactions), Some(2000.0));
    }

    #[test]
    fn price_per_m2_is_none_without_built_surface() {
        let transactions = vec![transaction(200000.0, 0.0)];
        assert_eq!(mean_price_per_m2(&transactions), None);
    }
}
