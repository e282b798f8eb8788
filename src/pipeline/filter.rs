//! Filtering: pure predicate narrowing of the cleaned set. The input is
//! never mutated; the output is the matching subset in input order.

use chrono::NaiveDate;
use tracing::info;

use crate::domain::PropertyType;
use crate::pipeline::clean::CleanRecord;
use crate::pipeline::validate::SaleRecord;

/// Analysis-relevant subset predicate. Empty/None members match everything.
#[derive(Debug, Clone, Default)]
pub struct SaleFilter {
    /// Natures of mutation that count as sales. Rows without the column pass
    /// (some cleaned extracts drop it after pre-filtering).
    pub natures: Option<Vec<String>>,
    pub property_types: Option<Vec<PropertyType>>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub departments: Option<Vec<String>>,
    pub communes: Option<Vec<String>>,
}

impl SaleFilter {
    pub fn matches(&self, record: &SaleRecord) -> bool {
        if let (Some(natures), Some(nature)) = (&self.natures, &record.nature) {
            if !natures.iter().any(|n| n.eq_ignore_ascii_case(nature)) {
                return false;
            }
        }
        if let Some(types) = &self.property_types {
            if !types.contains(&record.property_type) {
                return false;
            }
        }
        if let Some(from) = self.date_from {
            if record.date < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if record.date > to {
                return false;
            }
        }
        if let Some(departments) = &self.departments {
            if !departments
                .iter()
                .any(|d| d.eq_ignore_ascii_case(&record.department_code))
            {
                return false;
            }
        }
        if let Some(communes) = &self.communes {
            if !communes.iter().any(|c| c == &record.commune_code) {
                return false;
            }
        }
        true
    }

    /// Returns the subset of `records` satisfying the predicate.
    pub fn apply(&self, records: &[CleanRecord]) -> Vec<CleanRecord> {
        let filtered: Vec<CleanRecord> = records
            .iter()
            .filter(|c| self.matches(&c.record))
            .cloned()
            .collect();
        info!(
            input = records.len(),
            kept = filtered.len(),
            "filter applied"
        );
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clean::{clean, CleanPolicy};

    fn record(ptype: PropertyType, date: &str, department: &str) -> SaleRecord {
        SaleRecord {
            date: date.parse().unwrap(),
            nature: Some("Vente".to_string()),
            price: 150000.0,
            postal_code: 75011,
            department_code: department.to_string(),
            commune_code: format!("{department}111"),
            property_type: ptype,
            building_area: 60.0,
            main_rooms: 3,
            land_area: Some(0.0),
            parcel_id: format!("{department}111000AB{:04}", date.len()),
            latitude: None,
            longitude: None,
        }
    }

    fn cleaned(records: Vec<SaleRecord>) -> Vec<CleanRecord> {
        clean(records, &CleanPolicy::default()).records
    }

    #[test]
    fn property_type_filter_keeps_exact_subset() {
        let records = cleaned(vec![
            record(PropertyType::House, "2021-01-01", "75"),
            record(PropertyType::House, "2021-02-01", "75"),
            record(PropertyType::House, "2021-03-01", "75"),
            record(PropertyType::Apartment, "2021-04-01", "75"),
            record(PropertyType::Apartment, "2021-05-01", "75"),
        ]);
        let filter = SaleFilter {
            property_types: Some(vec![PropertyType::House]),
            ..SaleFilter::default()
        };
        assert_eq!(filter.apply(&records).len(), 3);
    }

    #[test]
    fn date_range_is_inclusive() {
        let records = cleaned(vec![
            record(PropertyType::House, "2021-01-01", "75"),
            record(PropertyType::House, "2021-06-15", "75"),
            record(PropertyType::House, "2022-01-01", "75"),
        ]);
        let filter = SaleFilter {
            date_from: Some("2021-01-01".parse().unwrap()),
            date_to: Some("2021-12-31".parse().unwrap()),
            ..SaleFilter::default()
        };
        assert_eq!(filter.apply(&records).len(), 2);
    }

    #[test]
    fn department_subset_matches_case_insensitively() {
        let records = cleaned(vec![
            record(PropertyType::House, "2021-01-01", "75"),
            record(PropertyType::House, "2021-02-01", "33"),
            record(PropertyType::House, "2021-03-01", "2A"),
        ]);
        let filter = SaleFilter {
            departments: Some(vec!["75".to_string(), "2a".to_string()]),
            ..SaleFilter::default()
        };
        assert_eq!(filter.apply(&records).len(), 2);
    }

    #[test]
    fn non_sale_natures_are_excluded() {
        let mut exchange = record(PropertyType::House, "2021-01-01", "75");
        exchange.nature = Some("Echange".to_string());
        let mut unknown = record(PropertyType::House, "2021-02-01", "75");
        unknown.nature = None;
        let records = cleaned(vec![
            record(PropertyType::House, "2021-03-01", "75"),
            exchange,
            unknown,
        ]);
        let filter = SaleFilter {
            natures: Some(vec!["Vente".to_string()]),
            ..SaleFilter::default()
        };
        // The explicit non-sale is excluded; the row without the column passes.
        assert_eq!(filter.apply(&records).len(), 2);
    }

    #[test]
    fn input_is_not_mutated() {
        let records = cleaned(vec![
            record(PropertyType::House, "2021-01-01", "75"),
            record(PropertyType::Apartment, "2021-02-01", "75"),
        ]);
        let filter = SaleFilter {
            property_types: Some(vec![PropertyType::House]),
            ..SaleFilter::default()
        };
        let _ = filter.apply(&records);
        assert_eq!(records.len(), 2);
    }
}
