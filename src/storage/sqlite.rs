//! SQLite-backed store: a single portable `.db` file with one table per
//! logical entity. Batch loads run inside one transaction so a failure rolls
//! the whole batch back.

use async_trait::async_trait;
use rusqlite::types::{ToSql, Type};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::{DepartmentCount, LoadSummary, Storage, TransactionQuery};
use crate::analysis::predict::TrainingRow;
use crate::domain::{LoadBatch, Location, Parcel, PropertyType, Transaction};
use crate::error::Result;

const MIGRATIONS: &str = include_str!("../../migrations/001_create_tables.sql");

const TRANSACTION_COLUMNS: &str = "t.id, t.date, t.price, t.property_type, t.building_area, \
     t.main_rooms, t.land_area, t.parcel_id, t.commune_code, t.latitude, t.longitude";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and applies migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;
        Self::initialize(conn)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;
            "#,
        )?;
        conn.execute_batch(MIGRATIONS)?;
        info!("store ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

/// Builds the WHERE clause and parameter list for a query. The FROM clause
/// always joins locations so department filters can resolve.
fn where_clause(query: &TransactionQuery) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(types) = &query.property_types {
        if !types.is_empty() {
            let placeholders = vec!["?"; types.len()].join(", ");
            clauses.push(format!("t.property_type IN ({placeholders})"));
            for ptype in types {
                values.push(Box::new(ptype.code() as i64));
            }
        }
    }
    if let Some(from) = query.date_from {
        clauses.push("t.date >= ?".to_string());
        values.push(Box::new(from));
    }
    if let Some(to) = query.date_to {
        clauses.push("t.date <= ?".to_string());
        values.push(Box::new(to));
    }
    if let Some(departments) = &query.departments {
        if !departments.is_empty() {
            let placeholders = vec!["?"; departments.len()].join(", ");
            clauses.push(format!("l.department_code IN ({placeholders})"));
            for department in departments {
                values.push(Box::new(department.to_uppercase()));
            }
        }
    }
    if let Some(communes) = &query.communes {
        if !communes.is_empty() {
            let placeholders = vec!["?"; communes.len()].join(", ");
            clauses.push(format!("t.commune_code IN ({placeholders})"));
            for commune in communes {
                values.push(Box::new(commune.clone()));
            }
        }
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };
    (sql, values)
}

fn row_to_transaction(row: &Row<'_>) -> rusqlite::Result<Transaction> {
    let id: String = row.get(0)?;
    let id = Uuid::parse_str(&id)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;
    let type_code: i64 = row.get(3)?;
    let property_type = PropertyType::from_code(type_code as u8).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Integer,
            format!("invalid property type code {type_code}").into(),
        )
    })?;
    Ok(Transaction {
        id,
        date: row.get(1)?,
        price: row.get(2)?,
        property_type,
        building_area: row.get(4)?,
        main_rooms: row.get::<_, i64>(5)? as u32,
        land_area: row.get(6)?,
        parcel_id: row.get(7)?,
        commune_code: row.get(8)?,
        latitude: row.get(9)?,
        longitude: row.get(10)?,
    })
}

#[async_trait]
impl Storage for SqliteStore {
    async fn load_batch(&self, batch: &LoadBatch) -> Result<LoadSummary> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        for location in &batch.locations {
            tx.execute(
                "INSERT INTO locations (commune_code, postal_code, department_code, region)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(commune_code) DO UPDATE SET
                     postal_code = excluded.postal_code,
                     department_code = excluded.department_code,
                     region = excluded.region",
                params![
                    location.commune_code,
                    location.postal_code,
                    location.department_code,
                    location.region
                ],
            )?;
        }
        for parcel in &batch.parcels {
            tx.execute(
                "INSERT INTO parcels (id, commune_code, land_area)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     commune_code = excluded.commune_code,
                     land_area = excluded.land_area",
                params![parcel.id, parcel.commune_code, parcel.land_area],
            )?;
        }
        for transaction in &batch.transactions {
            tx.execute(
                "INSERT INTO transactions
                     (id, date, price, property_type, building_area, main_rooms,
                      land_area, parcel_id, commune_code, latitude, longitude)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(id) DO UPDATE SET
                     date = excluded.date,
                     price = excluded.price,
                     property_type = excluded.property_type,
                     building_area = excluded.building_area,
                     main_rooms = excluded.main_rooms,
                     land_area = excluded.land_area,
                     parcel_id = excluded.parcel_id,
                     commune_code = excluded.commune_code,
                     latitude = excluded.latitude,
                     longitude = excluded.longitude",
                params![
                    transaction.id.to_string(),
                    transaction.date,
                    transaction.price,
                    transaction.property_type.code() as i64,
                    transaction.building_area,
                    transaction.main_rooms as i64,
                    transaction.land_area,
                    transaction.parcel_id,
                    transaction.commune_code,
                    transaction.latitude,
                    transaction.longitude
                ],
            )?;
        }

        tx.commit()?;
        let summary = LoadSummary {
            locations: batch.locations.len(),
            parcels: batch.parcels.len(),
            transactions: batch.transactions.len(),
        };
        info!(
            locations = summary.locations,
            parcels = summary.parcels,
            transactions = summary.transactions,
            "batch loaded"
        );
        Ok(summary)
    }

    async fn search_transactions(
        &self,
        query: &TransactionQuery,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock().unwrap();
        let (where_sql, mut values) = where_clause(query);
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS}
             FROM transactions t JOIN locations l ON t.commune_code = l.commune_code
             {where_sql}
             ORDER BY t.date, t.id
             LIMIT ? OFFSET ?"
        );
        values.push(Box::new(limit as i64));
        values.push(Box::new(offset as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(values.iter().map(|v| v.as_ref())),
            row_to_transaction,
        )?;
        let mut transactions = Vec::new();
        for row in rows {
            transactions.push(row?);
        }
        Ok(transactions)
    }

    async fn count_transactions(&self, query: &TransactionQuery) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let (where_sql, values) = where_clause(query);
        let sql = format!(
            "SELECT COUNT(*)
             FROM transactions t JOIN locations l ON t.commune_code = l.commune_code
             {where_sql}"
        );
        let count: i64 = conn.query_row(
            &sql,
            params_from_iter(values.iter().map(|v| v.as_ref())),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn transactions_matching(&self, query: &TransactionQuery) -> Result<Vec<Transaction>> {
        let conn = self.conn.lock().unwrap();
        let (where_sql, values) = where_clause(query);
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS}
             FROM transactions t JOIN locations l ON t.commune_code = l.commune_code
             {where_sql}
             ORDER BY t.date, t.id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(values.iter().map(|v| v.as_ref())),
            row_to_transaction,
        )?;
        let mut transactions = Vec::new();
        for row in rows {
            transactions.push(row?);
        }
        Ok(transactions)
    }

    async fn count_by_department(&self, query: &TransactionQuery) -> Result<Vec<DepartmentCount>> {
        let conn = self.conn.lock().unwrap();
        let (where_sql, values) = where_clause(query);
        let sql = format!(
            "SELECT l.department_code, COUNT(*) AS transactions
             FROM transactions t JOIN locations l ON t.commune_code = l.commune_code
             {where_sql}
             GROUP BY l.department_code
             ORDER BY transactions DESC, l.department_code"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params_from_iter(values.iter().map(|v| v.as_ref())),
            |row| {
                Ok(DepartmentCount {
                    department_code: row.get(0)?,
                    transactions: row.get::<_, i64>(1)? as u64,
                })
            },
        )?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    async fn training_rows(&self) -> Result<Vec<TrainingRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT price, property_type, building_area, main_rooms, land_area
             FROM transactions",
        )?;
        let rows = stmt.query_map([], |row| {
            let type_code: i64 = row.get(1)?;
            let property_type = PropertyType::from_code(type_code as u8).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    Type::Integer,
                    format!("invalid property type code {type_code}").into(),
                )
            })?;
            Ok(TrainingRow {
                price: row.get(0)?,
                property_type,
                building_area: row.get(2)?,
                main_rooms: row.get::<_, i64>(3)? as u32,
                land_area: row.get(4)?,
            })
        })?;
        let mut training = Vec::new();
        for row in rows {
            training.push(row?);
        }
        Ok(training)
    }

    async fn get_parcel(&self, id: &str) -> Result<Option<Parcel>> {
        let conn = self.conn.lock().unwrap();
        let parcel = conn
            .query_row(
                "SELECT id, commune_code, land_area FROM parcels WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Parcel {
                        id: row.get(0)?,
                        commune_code: row.get(1)?,
                        land_area: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(parcel)
    }

    async fn get_location(&self, commune_code: &str) -> Result<Option<Location>> {
        let conn = self.conn.lock().unwrap();
        let location = conn
            .query_row(
                "SELECT commune_code, postal_code, department_code, region
                 FROM locations WHERE commune_code = ?1",
                params![commune_code],
                |row| {
                    Ok(Location {
                        commune_code: row.get(0)?,
                        postal_code: row.get(1)?,
                        department_code: row.get(2)?,
                        region: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(location)
    }
}

impl SqliteStore {
    /// Convenience used by tests and the count command.
    pub async fn total_transactions(&self) -> Result<u64> {
        self.count_transactions(&TransactionQuery::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn location(commune: &str, department: &str) -> Location {
        Location {
            commune_code: commune.to_string(),
            postal_code: "75011".to_string(),
            department_code: department.to_string(),
            region: None,
        }
    }

    fn parcel(id: &str, commune: &str) -> Parcel {
        Parcel {
            id: id.to_string(),
            commune_code: commune.to_string(),
            land_area: 0.0,
        }
    }

    fn transaction(
        seed: u128,
        date: &str,
        ptype: PropertyType,
        parcel_id: &str,
        commune: &str,
    ) -> Transaction {
        Transaction {
            id: Uuid::from_u128(seed),
            date: date.parse().unwrap(),
            price: 150000.0,
            property_type: ptype,
            building_area: 60.0,
            main_rooms: 3,
            land_area: 0.0,
            parcel_id: parcel_id.to_string(),
            commune_code: commune.to_string(),
            latitude: None,
            longitude: None,
        }
    }

    fn sample_batch() -> LoadBatch {
        LoadBatch {
            locations: vec![location("75111", "75"), location("33063", "33")],
            parcels: vec![
                parcel("75111000AB0042", "75111"),
                parcel("33063000CD0007", "33063"),
            ],
            transactions: vec![
                transaction(1, "2021-03-01", PropertyType::Apartment, "75111000AB0042", "75111"),
                transaction(2, "2021-05-01", PropertyType::House, "33063000CD0007", "33063"),
                transaction(3, "2022-01-15", PropertyType::House, "75111000AB0042", "75111"),
            ],
        }
    }

    #[tokio::test]
    async fn load_and_search_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let summary = store.load_batch(&sample_batch()).await.unwrap();
        assert_eq!(summary.transactions, 3);

        let all = store
            .search_transactions(&TransactionQuery::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        // Ordered by date
        assert_eq!(all[0].date, NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());
        assert_eq!(all[0].property_type, PropertyType::Apartment);
    }

    #[tokio::test]
    async fn reload_is_an_upsert() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.load_batch(&sample_batch()).await.unwrap();
        store.load_batch(&sample_batch()).await.unwrap();
        assert_eq!(store.total_transactions().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn loaded_transactions_reference_existing_parents() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.load_batch(&sample_batch()).await.unwrap();
        let all = store
            .search_transactions(&TransactionQuery::default(), 10, 0)
            .await
            .unwrap();
        for t in &all {
            assert!(store.get_parcel(&t.parcel_id).await.unwrap().is_some());
            assert!(store.get_location(&t.commune_code).await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn failed_batch_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut batch = sample_batch();
        // Orphan transaction: no such parcel
        batch.transactions.push(transaction(
            4,
            "2021-06-01",
            PropertyType::House,
            "99999000ZZ9999",
            "75111",
        ));
        assert!(store.load_batch(&batch).await.is_err());
        assert_eq!(store.total_transactions().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn filters_narrow_the_result() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.load_batch(&sample_batch()).await.unwrap();

        let houses = store
            .search_transactions(
                &TransactionQuery {
                    property_types: Some(vec![PropertyType::House]),
                    ..TransactionQuery::default()
                },
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(houses.len(), 2);

        let paris_2021 = store
            .count_transactions(&TransactionQuery {
                departments: Some(vec!["75".to_string()]),
                date_to: Some("2021-12-31".parse().unwrap()),
                ..TransactionQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(paris_2021, 1);
    }

    #[tokio::test]
    async fn department_counts_are_ordered() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.load_batch(&sample_batch()).await.unwrap();
        let counts = store
            .count_by_department(&TransactionQuery::default())
            .await
            .unwrap();
        assert_eq!(counts[0].department_code, "75");
        assert_eq!(counts[0].transactions, 2);
        assert_eq!(counts[1].transactions, 1);
    }

    #[tokio::test]
    async fn training_rows_cover_every_transaction() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.load_batch(&sample_batch()).await.unwrap();
        let rows = store.training_rows().await.unwrap();
        assert_eq!(rows.len(), 3);
    }
}
