use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deriving stable transaction ids from dedupe keys.
pub const TRANSACTION_NAMESPACE: Uuid = Uuid::from_u128(0x8f2b1c0a_5d34_4e9b_9f17_6a0c2d8e4b51);

/// Property type, from the DVF `code_type_local` enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    House,
    Apartment,
    Land,
    Other,
}

impl PropertyType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::House),
            2 => Some(Self::Apartment),
            3 => Some(Self::Land),
            4 => Some(Self::Other),
            _ => None,
        }
    }

    /// Maps the free-text `type_local` labels found in extracts that predate
    /// the numeric code column.
    pub fn from_label(label: &str) -> Option<Self> {
        let lowered = label.trim().to_lowercase();
        match lowered.as_str() {
            "maison" => Some(Self::House),
            "appartement" => Some(Self::Apartment),
            "terrain" | "dependance" | "dépendance" => Some(Self::Land),
            s if s.starts_with("local") => Some(Self::Other),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::House => 1,
            Self::Apartment => 2,
            Self::Land => 3,
            Self::Other => 4,
        }
    }
}

/// One real-estate sale event, immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub date: NaiveDate,
    pub price: f64,
    pub property_type: PropertyType,
    pub building_area: f64,
    pub main_rooms: u32,
    pub land_area: f64,
    pub parcel_id: String,
    pub commune_code: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A cadastral unit referenced by one or more transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parcel {
    pub id: String,
    pub commune_code: String,
    pub land_area: f64,
}

/// Geographic reference used to group and filter transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub commune_code: String,
    pub postal_code: String,
    pub department_code: String,
    pub region: Option<String>,
}

/// One atomic unit of work for the loader: parents first.
#[derive(Debug, Clone, Default)]
pub struct LoadBatch {
    pub locations: Vec<Location>,
    pub parcels: Vec<Parcel>,
    pub transactions: Vec<Transaction>,
}

impl LoadBatch {
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
