//! Schema validation: each raw row either becomes a fully typed [`SaleRecord`]
//! or a [`RowFailure`] enumerating every violated constraint. Validation is
//! per-row and total; a failing row is excluded from the validated set and
//! retained for reporting, never raised as a fatal error.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::constants::{
    COL_BUILDING_AREA, COL_COMMUNE, COL_DATE, COL_DEPARTMENT, COL_LAND_AREA, COL_LATITUDE,
    COL_LONGITUDE, COL_MAIN_ROOMS, COL_NATURE, COL_PARCEL_ID, COL_PLAN_NUMBER, COL_POSTAL_CODE,
    COL_PRICE, COL_SECTION, COL_SECTION_PREFIX, COL_TYPE_CODE, COL_TYPE_LABEL,
};
use crate::domain::PropertyType;
use crate::error::Result;
use crate::pipeline::ingest::{RawBatch, RawRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A required column is absent or empty.
    MissingField,
    /// The value could not be parsed into the declared type.
    InvalidValue,
    /// The value parsed but falls outside the allowed range.
    OutOfRange,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ViolationKind::MissingField => "missing_field",
            ViolationKind::InvalidValue => "invalid_value",
            ViolationKind::OutOfRange => "out_of_range",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub kind: ViolationKind,
    pub value: Option<String>,
    pub detail: String,
}

impl FieldViolation {
    fn new(field: &str, kind: ViolationKind, value: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            kind,
            value: value.map(|v| v.to_string()),
            detail: detail.into(),
        }
    }
}

/// One rejected row with every constraint it violated.
#[derive(Debug, Clone, Serialize)]
pub struct RowFailure {
    pub source: String,
    pub row_index: usize,
    pub violations: Vec<FieldViolation>,
}

/// A validated sale row: typed, with all declared fields populated.
/// `land_area` stays optional here; the missing-value policy is applied by
/// the cleaning stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleRecord {
    pub date: NaiveDate,
    pub nature: Option<String>,
    pub price: f64,
    pub postal_code: u32,
    pub department_code: String,
    /// Full INSEE commune code (department + 3-digit commune number).
    pub commune_code: String,
    pub property_type: PropertyType,
    pub building_area: f64,
    pub main_rooms: u32,
    pub land_area: Option<f64>,
    pub parcel_id: String,
    /// Only the geo-DVF export carries coordinates.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// The validated/rejected partition of a batch.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub records: Vec<SaleRecord>,
    pub rejected: Vec<RowFailure>,
    pub total_rows: usize,
}

impl ValidationReport {
    pub fn merge(&mut self, other: ValidationReport) {
        self.records.extend(other.records);
        self.rejected.extend(other.rejected);
        self.total_rows += other.total_rows;
    }
}

/// Row validator carrying the covered date range.
pub struct RowValidator {
    min_year: i32,
    max_year: i32,
}

impl RowValidator {
    pub fn new(min_year: i32, max_year: i32) -> Self {
        Self { min_year, max_year }
    }

    /// Validate a whole batch, partitioning rows into records and failures.
    pub fn validate_batch(&self, batch: &RawBatch) -> ValidationReport {
        let mut report = ValidationReport {
            total_rows: batch.rows.len(),
            ..ValidationReport::default()
        };
        for row in &batch.rows {
            match self.validate_row(row) {
                Ok(record) => report.records.push(record),
                Err(violations) => report.rejected.push(RowFailure {
                    source: batch.source.clone(),
                    row_index: row.index,
                    violations,
                }),
            }
        }
        info!(
            source = %batch.source,
            valid = report.records.len(),
            rejected = report.rejected.len(),
            "validation finished"
        );
        report
    }

    /// Validate one row, collecting every violation rather than stopping at
    /// the first.
    pub fn validate_row(&self, row: &RawRow) -> std::result::Result<SaleRecord, Vec<FieldViolation>> {
        let mut violations = Vec::new();

        let date = self.check_date(row, &mut violations);
        let nature = row.get(COL_NATURE).map(|v| v.to_string());
        let price = check_price(row, &mut violations);
        let postal_code = check_postal_code(row, &mut violations);
        let department_code = check_department(row, &mut violations);
        let commune_number = check_commune(row, &mut violations);
        let property_type = check_property_type(row, &mut violations);
        let building_area = check_area(row, COL_BUILDING_AREA, true, &mut violations);
        let main_rooms = check_main_rooms(row, &mut violations);
        let land_area = check_area(row, COL_LAND_AREA, false, &mut violations).flatten();

        let latitude = check_coordinate(row, COL_LATITUDE, 90.0, &mut violations);
        let longitude = check_coordinate(row, COL_LONGITUDE, 180.0, &mut violations);

        let commune_code = match (&department_code, commune_number) {
            (Some(dept), Some(num)) => Some(compose_commune_code(dept, num)),
            _ => None,
        };
        let parcel_id = check_parcel_id(row, commune_code.as_deref(), &mut violations);

        if !violations.is_empty() {
            return Err(violations);
        }

        // All checks recorded no violation, so every required value is present.
        Ok(SaleRecord {
            date: date.unwrap_or_default(),
            nature,
            price: price.unwrap_or_default(),
            postal_code: postal_code.unwrap_or_default(),
            department_code: department_code.unwrap_or_default(),
            commune_code: commune_code.unwrap_or_default(),
            property_type: property_type.unwrap_or(PropertyType::Other),
            building_area: building_area.flatten().unwrap_or_default(),
            main_rooms: main_rooms.unwrap_or_default(),
            land_area,
            parcel_id: parcel_id.unwrap_or_default(),
            latitude: latitude.flatten(),
            longitude: longitude.flatten(),
        })
    }

    fn check_date(&self, row: &RawRow, violations: &mut Vec<FieldViolation>) -> Option<NaiveDate> {
        let raw = match row.get(COL_DATE) {
            Some(v) => v,
            None => {
                violations.push(FieldViolation::new(
                    COL_DATE,
                    ViolationKind::MissingField,
                    None,
                    "mutation date is required",
                ));
                return None;
            }
        };
        let date = match parse_date(raw) {
            Some(d) => d,
            None => {
                violations.push(FieldViolation::new(
                    COL_DATE,
                    ViolationKind::InvalidValue,
                    Some(raw),
                    "expected YYYY-MM-DD or DD/MM/YYYY",
                ));
                return None;
            }
        };
        if date.year() < self.min_year || date.year() > self.max_year {
            violations.push(FieldViolation::new(
                COL_DATE,
                ViolationKind::OutOfRange,
                Some(raw),
                format!("outside covered range {}-{}", self.min_year, self.max_year),
            ));
            return None;
        }
        Some(date)
    }
}

fn check_price(row: &RawRow, violations: &mut Vec<FieldViolation>) -> Option<f64> {
    let raw = match row.get(COL_PRICE) {
        Some(v) => v,
        None => {
            violations.push(FieldViolation::new(
                COL_PRICE,
                ViolationKind::MissingField,
                None,
                "sale price is required",
            ));
            return None;
        }
    };
    let price = match parse_decimal(raw) {
        Some(p) => p,
        None => {
            violations.push(FieldViolation::new(
                COL_PRICE,
                ViolationKind::InvalidValue,
                Some(raw),
                "expected a number (European decimal commas accepted)",
            ));
            return None;
        }
    };
    if price <= 0.0 {
        violations.push(FieldViolation::new(
            COL_PRICE,
            ViolationKind::OutOfRange,
            Some(raw),
            "sale price must be positive",
        ));
        return None;
    }
    Some(price)
}

fn check_postal_code(row: &RawRow, violations: &mut Vec<FieldViolation>) -> Option<u32> {
    let raw = match row.get(COL_POSTAL_CODE) {
        Some(v) => v,
        None => {
            violations.push(FieldViolation::new(
                COL_POSTAL_CODE,
                ViolationKind::MissingField,
                None,
                "postal code is required",
            ));
            return None;
        }
    };
    let code = match parse_count(raw) {
        Some(c) => c,
        None => {
            violations.push(FieldViolation::new(
                COL_POSTAL_CODE,
                ViolationKind::InvalidValue,
                Some(raw),
                "expected an integer postal code",
            ));
            return None;
        }
    };
    if !(1000..=99999).contains(&code) {
        violations.push(FieldViolation::new(
            COL_POSTAL_CODE,
            ViolationKind::OutOfRange,
            Some(raw),
            "postal code must be a 5-digit French code",
        ));
        return None;
    }
    Some(code)
}

fn check_department(row: &RawRow, violations: &mut Vec<FieldViolation>) -> Option<String> {
    let raw = match row.get(COL_DEPARTMENT) {
        Some(v) => v,
        None => {
            violations.push(FieldViolation::new(
                COL_DEPARTMENT,
                ViolationKind::MissingField,
                None,
                "department code is required",
            ));
            return None;
        }
    };
    let upper = raw.to_uppercase();
    // Corsican departments are the only alphanumeric codes.
    if upper == "2A" || upper == "2B" {
        return Some(upper);
    }
    match raw.parse::<u32>() {
        Ok(n) if (1..=976).contains(&n) => Some(raw.to_string()),
        Ok(_) => {
            violations.push(FieldViolation::new(
                COL_DEPARTMENT,
                ViolationKind::OutOfRange,
                Some(raw),
                "department code must be 1-976, 2A or 2B",
            ));
            None
        }
        Err(_) => {
            violations.push(FieldViolation::new(
                COL_DEPARTMENT,
                ViolationKind::InvalidValue,
                Some(raw),
                "expected a numeric department code, 2A or 2B",
            ));
            None
        }
    }
}

fn check_commune(row: &RawRow, violations: &mut Vec<FieldViolation>) -> Option<u32> {
    let raw = match row.get(COL_COMMUNE) {
        Some(v) => v,
        None => {
            violations.push(FieldViolation::new(
                COL_COMMUNE,
                ViolationKind::MissingField,
                None,
                "commune code is required",
            ));
            return None;
        }
    };
    match parse_count(raw) {
        Some(n) if n > 0 => Some(n),
        Some(_) => {
            violations.push(FieldViolation::new(
                COL_COMMUNE,
                ViolationKind::OutOfRange,
                Some(raw),
                "commune code must be positive",
            ));
            None
        }
        None => {
            violations.push(FieldViolation::new(
                COL_COMMUNE,
                ViolationKind::InvalidValue,
                Some(raw),
                "expected an integer commune code",
            ));
            None
        }
    }
}

fn check_property_type(row: &RawRow, violations: &mut Vec<FieldViolation>) -> Option<PropertyType> {
    if let Some(raw) = row.get(COL_TYPE_CODE) {
        return match parse_count(raw) {
            Some(code) if code <= u8::MAX as u32 => match PropertyType::from_code(code as u8) {
                Some(ptype) => Some(ptype),
                None => {
                    violations.push(FieldViolation::new(
                        COL_TYPE_CODE,
                        ViolationKind::OutOfRange,
                        Some(raw),
                        "property type code must be 1-4",
                    ));
                    None
                }
            },
            _ => {
                violations.push(FieldViolation::new(
                    COL_TYPE_CODE,
                    ViolationKind::InvalidValue,
                    Some(raw),
                    "expected an integer property type code",
                ));
                None
            }
        };
    }
    if let Some(raw) = row.get(COL_TYPE_LABEL) {
        return match PropertyType::from_label(raw) {
            Some(ptype) => Some(ptype),
            None => {
                violations.push(FieldViolation::new(
                    COL_TYPE_LABEL,
                    ViolationKind::InvalidValue,
                    Some(raw),
                    "unknown property type label",
                ));
                None
            }
        };
    }
    violations.push(FieldViolation::new(
        COL_TYPE_CODE,
        ViolationKind::MissingField,
        None,
        "property type code or label is required",
    ));
    None
}

/// Validates a surface-area column. Required columns record a violation when
/// absent; optional ones return `Some(None)`.
fn check_area(
    row: &RawRow,
    column: &str,
    required: bool,
    violations: &mut Vec<FieldViolation>,
) -> Option<Option<f64>> {
    let raw = match row.get(column) {
        Some(v) => v,
        None => {
            if required {
                violations.push(FieldViolation::new(
                    column,
                    ViolationKind::MissingField,
                    None,
                    "surface area is required",
                ));
                return None;
            }
            return Some(None);
        }
    };
    match parse_decimal(raw) {
        Some(area) if area >= 0.0 => Some(Some(area)),
        Some(_) => {
            violations.push(FieldViolation::new(
                column,
                ViolationKind::OutOfRange,
                Some(raw),
                "surface area must be non-negative",
            ));
            None
        }
        None => {
            violations.push(FieldViolation::new(
                column,
                ViolationKind::InvalidValue,
                Some(raw),
                "expected a number",
            ));
            None
        }
    }
}

/// Optional coordinate column; `bound` is the absolute degree limit.
fn check_coordinate(
    row: &RawRow,
    column: &str,
    bound: f64,
    violations: &mut Vec<FieldViolation>,
) -> Option<Option<f64>> {
    let raw = match row.get(column) {
        Some(v) => v,
        None => return Some(None),
    };
    match parse_decimal(raw) {
        Some(value) if value.abs() <= bound => Some(Some(value)),
        Some(_) => {
            violations.push(FieldViolation::new(
                column,
                ViolationKind::OutOfRange,
                Some(raw),
                format!("coordinate must be within ±{bound} degrees"),
            ));
            None
        }
        None => {
            violations.push(FieldViolation::new(
                column,
                ViolationKind::InvalidValue,
                Some(raw),
                "expected a decimal coordinate",
            ));
            None
        }
    }
}

fn check_main_rooms(row: &RawRow, violations: &mut Vec<FieldViolation>) -> Option<u32> {
    let raw = match row.get(COL_MAIN_ROOMS) {
        Some(v) => v,
        None => {
            violations.push(FieldViolation::new(
                COL_MAIN_ROOMS,
                ViolationKind::MissingField,
                None,
                "number of main rooms is required",
            ));
            return None;
        }
    };
    match parse_count(raw) {
        Some(rooms) => Some(rooms),
        None => {
            violations.push(FieldViolation::new(
                COL_MAIN_ROOMS,
                ViolationKind::InvalidValue,
                Some(raw),
                "expected a non-negative integer",
            ));
            None
        }
    }
}

fn check_parcel_id(
    row: &RawRow,
    commune_code: Option<&str>,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    if let Some(id) = row.get(COL_PARCEL_ID) {
        return Some(id.to_uppercase());
    }
    // Fichiers-fonciers layout: compose commune + section prefix + section +
    // plan number into the 14-character cadastral id.
    if let (Some(commune), Some(section), Some(plan)) =
        (commune_code, row.get(COL_SECTION), row.get(COL_PLAN_NUMBER))
    {
        if let Some(plan_number) = parse_count(plan) {
            let prefix = row
                .get(COL_SECTION_PREFIX)
                .and_then(parse_count)
                .unwrap_or(0);
            return Some(format!(
                "{commune}{prefix:03}{:0>2}{plan_number:04}",
                section.to_uppercase()
            ));
        }
    }
    violations.push(FieldViolation::new(
        COL_PARCEL_ID,
        ViolationKind::MissingField,
        None,
        "parcel id (or section + plan number) is required",
    ));
    None
}

fn compose_commune_code(department: &str, commune_number: u32) -> String {
    // Overseas departments already carry three digits; their commune numbers
    // use two. Metropolitan codes are two + three.
    if department.len() >= 3 {
        format!("{department}{commune_number:02}")
    } else {
        format!("{department}{commune_number:03}")
    }
}

/// Converts strings like `"200000,00"` to a float using European decimal
/// commas.
fn parse_decimal(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse().ok()
}

/// Parses counts that some extracts serialize as floats (`"3.0"`).
fn parse_count(raw: &str) -> Option<u32> {
    if let Ok(n) = raw.parse::<u32>() {
        return Some(n);
    }
    let as_float: f64 = raw.replace(',', ".").parse().ok()?;
    if as_float >= 0.0 && as_float.fract() == 0.0 {
        Some(as_float as u32)
    } else {
        None
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
}

/// Exports rejected rows to a delimited file for inspection, one line per
/// violation.
pub fn write_rejected_csv(path: &Path, rejected: &[RowFailure]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["source", "row_index", "field", "kind", "value", "detail"])?;
    for failure in rejected {
        let row_index = failure.row_index.to_string();
        for violation in &failure.violations {
            let kind = violation.kind.to_string();
            writer.write_record([
                failure.source.as_str(),
                row_index.as_str(),
                violation.field.as_str(),
                kind.as_str(),
                violation.value.as_deref().unwrap_or(""),
                violation.detail.as_str(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn raw_row(pairs: &[(&str, &str)]) -> RawRow {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RawRow { index: 1, values }
    }

    fn complete_row() -> RawRow {
        raw_row(&[
            (COL_DATE, "2021-03-01"),
            (COL_NATURE, "Vente"),
            (COL_PRICE, "150000"),
            (COL_POSTAL_CODE, "75011"),
            (COL_DEPARTMENT, "75"),
            (COL_COMMUNE, "111"),
            (COL_TYPE_LABEL, "appartement"),
            (COL_BUILDING_AREA, "60"),
            (COL_MAIN_ROOMS, "3"),
            (COL_LAND_AREA, "0"),
            (COL_PARCEL_ID, "75111000AB0042"),
        ])
    }

    fn validator() -> RowValidator {
        RowValidator::new(2020, 2024)
    }

    #[test]
    fn complete_row_validates() {
        let record = validator().validate_row(&complete_row()).unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());
        assert_eq!(record.price, 150000.0);
        assert_eq!(record.building_area, 60.0);
        assert_eq!(record.property_type, PropertyType::Apartment);
        assert_eq!(record.commune_code, "75111");
    }

    #[test]
    fn negative_price_is_rejected() {
        let mut row = complete_row();
        row.values.insert(COL_PRICE.to_string(), "-5".to_string());
        let violations = validator().validate_row(&row).unwrap_err();
        assert!(violations
            .iter()
            .any(|v| v.field == COL_PRICE && v.kind == ViolationKind::OutOfRange));
    }

    #[test]
    fn negative_surface_is_rejected() {
        let mut row = complete_row();
        row.values
            .insert(COL_BUILDING_AREA.to_string(), "-12".to_string());
        let violations = validator().validate_row(&row).unwrap_err();
        assert!(violations
            .iter()
            .any(|v| v.field == COL_BUILDING_AREA && v.kind == ViolationKind::OutOfRange));
    }

    #[test]
    fn european_decimal_prices_parse() {
        let mut row = complete_row();
        row.values
            .insert(COL_PRICE.to_string(), "150000,50".to_string());
        let record = validator().validate_row(&row).unwrap();
        assert_eq!(record.price, 150000.5);
    }

    #[test]
    fn french_date_format_parses() {
        let mut row = complete_row();
        row.values
            .insert(COL_DATE.to_string(), "01/03/2021".to_string());
        let record = validator().validate_row(&row).unwrap();
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());
    }

    #[test]
    fn date_outside_covered_range_is_rejected() {
        let mut row = complete_row();
        row.values
            .insert(COL_DATE.to_string(), "2019-06-15".to_string());
        let violations = validator().validate_row(&row).unwrap_err();
        assert!(violations
            .iter()
            .any(|v| v.field == COL_DATE && v.kind == ViolationKind::OutOfRange));
    }

    #[test]
    fn every_violation_is_enumerated() {
        let mut row = complete_row();
        row.values.insert(COL_PRICE.to_string(), "abc".to_string());
        row.values.remove(COL_DATE);
        row.values
            .insert(COL_MAIN_ROOMS.to_string(), "-1".to_string());
        let violations = validator().validate_row(&row).unwrap_err();
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn corsican_departments_are_accepted() {
        let mut row = complete_row();
        row.values.insert(COL_DEPARTMENT.to_string(), "2a".to_string());
        let record = validator().validate_row(&row).unwrap();
        assert_eq!(record.department_code, "2A");
        assert_eq!(record.commune_code, "2A111");
    }

    #[test]
    fn out_of_range_department_is_rejected() {
        let mut row = complete_row();
        row.values
            .insert(COL_DEPARTMENT.to_string(), "999".to_string());
        let violations = validator().validate_row(&row).unwrap_err();
        assert!(violations
            .iter()
            .any(|v| v.field == COL_DEPARTMENT && v.kind == ViolationKind::OutOfRange));
    }

    #[test]
    fn parcel_id_composes_from_section_and_plan() {
        let mut row = complete_row();
        row.values.remove(COL_PARCEL_ID);
        row.values.insert(COL_SECTION.to_string(), "AB".to_string());
        row.values.insert(COL_PLAN_NUMBER.to_string(), "42".to_string());
        let record = validator().validate_row(&row).unwrap();
        assert_eq!(record.parcel_id, "75111000AB0042");
    }

    #[test]
    fn missing_property_type_is_reported() {
        let mut row = complete_row();
        row.values.remove(COL_TYPE_LABEL);
        let violations = validator().validate_row(&row).unwrap_err();
        assert!(violations
            .iter()
            .any(|v| v.field == COL_TYPE_CODE && v.kind == ViolationKind::MissingField));
    }

    #[test]
    fn missing_land_area_is_not_a_violation() {
        let mut row = complete_row();
        row.values.remove(COL_LAND_AREA);
        let record = validator().validate_row(&row).unwrap();
        assert_eq!(record.land_area, None);
    }

    #[test]
    fn coordinates_are_optional_but_range_checked() {
        let mut row = complete_row();
        let record = validator().validate_row(&row).unwrap();
        assert_eq!(record.latitude, None);

        row.values.insert(COL_LATITUDE.to_string(), "48,8698".to_string());
        row.values.insert(COL_LONGITUDE.to_string(), "2.3791".to_string());
        let record = validator().validate_row(&row).unwrap();
        assert_eq!(record.latitude, Some(48.8698));
        assert_eq!(record.longitude, Some(2.3791));

        row.values.insert(COL_LATITUDE.to_string(), "123.0".to_string());
        let violations = validator().validate_row(&row).unwrap_err();
        assert!(violations
            .iter()
            .any(|v| v.field == COL_LATITUDE && v.kind == ViolationKind::OutOfRange));
    }

    #[test]
    fn count_columns_accept_float_serialization() {
        let mut row = complete_row();
        row.values
            .insert(COL_MAIN_ROOMS.to_string(), "3.0".to_string());
        let record = validator().validate_row(&row).unwrap();
        assert_eq!(record.main_rooms, 3);
    }
}
