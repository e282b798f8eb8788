use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::constants::{DEFAULT_MAX_YEAR, DEFAULT_MIN_YEAR};
use crate::domain::PropertyType;
use crate::error::{PipelineError, Result};
use crate::pipeline::clean::{KeyField, MissingPolicy};

/// Top-level configuration, loaded from `config.toml`. Every section is
/// optional; omitted sections take the documented defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub cleaning: CleaningSection,
    #[serde(default)]
    pub filter: FilterSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub server: ServerSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Inclusive bounds of the covered dataset range; mutation dates outside
    /// this window fail validation.
    pub min_year: i32,
    pub max_year: i32,
    /// Column separator of the raw extracts.
    pub delimiter: String,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            min_year: DEFAULT_MIN_YEAR,
            max_year: DEFAULT_MAX_YEAR,
            delimiter: "|".to_string(),
        }
    }
}

impl PipelineSection {
    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_bytes() {
            [b] => Ok(*b),
            _ => Err(PipelineError::Config(format!(
                "delimiter must be a single ASCII character, got '{}'",
                self.delimiter
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CleaningSection {
    /// Fields hashed into the dedupe key.
    pub key_fields: Vec<KeyField>,
    /// Policy for rows missing `surface_terrain`.
    pub missing_land_area: MissingPolicy,
}

impl Default for CleaningSection {
    fn default() -> Self {
        Self {
            key_fields: vec![KeyField::ParcelId, KeyField::Date, KeyField::Price],
            missing_land_area: MissingPolicy::Zero,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterSection {
    /// Natures of mutation that count as sales. Rows without the column pass.
    pub sale_natures: Vec<String>,
    /// Department subset; empty means all departments.
    pub departments: Vec<String>,
    /// Property type subset; empty means all types.
    pub property_types: Vec<PropertyType>,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            sale_natures: vec!["Vente".to_string()],
            departments: Vec::new(),
            property_types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: "data/fpi.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl Config {
    /// Load configuration from an explicit path, failing if it is unreadable.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read config file '{}': {e}", path.display()))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `config.toml` from the working directory, falling back to the
    /// built-in defaults when the file does not exist.
    pub fn load() -> Result<Self> {
        let path = Path::new("config.toml");
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }
}
