//! Raw ingestion: government DVF extracts are delimited text files, one per
//! year/department, with French column headers that vary between the national
//! and geo-DVF layouts. Headers are normalized here so downstream stages can
//! address columns by a single canonical name.

use csv::ReaderBuilder;
use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

/// One raw row: normalized column name to raw string value.
#[derive(Debug, Clone)]
pub struct RawRow {
    /// 1-based position of the row in the source file, excluding the header.
    pub index: usize,
    pub values: HashMap<String, String>,
}

impl RawRow {
    /// Returns the trimmed value for a column; empty cells count as absent.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// The in-memory tabular result of reading one raw extract.
#[derive(Debug)]
pub struct RawBatch {
    pub source: String,
    /// Covered year recovered from the file name, when present.
    pub year: Option<i32>,
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

/// Normalizes a raw header the way the original extracts need: trimmed,
/// lowercased, spaces and apostrophes replaced by underscores.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace([' ', '\u{2019}', '\''], "_")
}

/// Recovers the dataset year from an extract file name such as
/// `raw_75_2024.csv` or `sample2023.txt`.
pub fn year_from_filename(path: &Path) -> Option<i32> {
    let stem = path.file_stem()?.to_str()?;
    let re = Regex::new(r"(20\d{2})").ok()?;
    re.find_iter(stem)
        .last()
        .and_then(|m| m.as_str().parse().ok())
}

/// Reads a delimited extract into memory. Short rows are tolerated (the
/// trailing columns are simply absent); rows that are entirely empty are
/// skipped.
pub fn read_delimited(path: &Path, delimiter: u8) -> Result<RawBatch> {
    let file = File::open(path).map_err(|e| {
        PipelineError::Ingest(format!("failed to open '{}': {e}", path.display()))
    })?;

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(file);

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(normalize_header)
        .collect();
    if headers.is_empty() {
        return Err(PipelineError::Ingest(format!(
            "'{}' has no header row",
            path.display()
        )));
    }

    let mut rows = Vec::new();
    let mut short_rows = 0usize;
    for (i, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.len() < headers.len() {
            short_rows += 1;
        }
        let values: HashMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        rows.push(RawRow {
            index: i + 1,
            values,
        });
    }

    if short_rows > 0 {
        warn!(source = %path.display(), short_rows, "rows shorter than the header");
    }

    let year = year_from_filename(path);
    info!(
        source = %path.display(),
        rows = rows.len(),
        columns = headers.len(),
        year = ?year,
        "raw extract ingested"
    );

    Ok(RawBatch {
        source: path.display().to_string(),
        year,
        headers,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(name: &str, content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (dir, path)
    }

    #[test]
    fn headers_are_normalized() {
        assert_eq!(normalize_header("Date mutation"), "date_mutation");
        assert_eq!(normalize_header(" Valeur fonciere "), "valeur_fonciere");
        assert_eq!(normalize_header("L'adresse"), "l_adresse");
    }

    #[test]
    fn year_is_recovered_from_file_names() {
        assert_eq!(year_from_filename(Path::new("raw_75_2024.csv")), Some(2024));
        assert_eq!(year_from_filename(Path::new("sample2023.txt")), Some(2023));
        assert_eq!(year_from_filename(Path::new("extract.csv")), None);
    }

    #[test]
    fn reads_pipe_delimited_rows() {
        let (_dir, path) = write_fixture(
            "raw2024.txt",
            "Date mutation|Valeur fonciere|Code departement\n\
             03/01/2021|150000,00|75\n\
             |||\n\
             04/01/2021|98000,00|92\n",
        );
        let batch = read_delimited(&path, b'|').unwrap();
        assert_eq!(batch.year, Some(2024));
        assert_eq!(batch.headers, vec!["date_mutation", "valeur_fonciere", "code_departement"]);
        // The all-empty row is skipped
        assert_eq!(batch.rows.len(), 2);
        assert_eq!(batch.rows[0].get("valeur_fonciere"), Some("150000,00"));
        assert_eq!(batch.rows[1].get("code_departement"), Some("92"));
    }

    #[test]
    fn short_rows_keep_leading_columns() {
        let (_dir, path) = write_fixture(
            "raw_33_2022.csv",
            "date_mutation,valeur_fonciere,code_departement\n2022-05-01,120000\n",
        );
        let batch = read_delimited(&path, b',').unwrap();
        assert_eq!(batch.rows.len(), 1);
        assert_eq!(batch.rows[0].get("valeur_fonciere"), Some("120000"));
        assert_eq!(batch.rows[0].get("code_departement"), None);
    }
}
