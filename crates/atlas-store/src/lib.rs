//! Country record persistence: shared contract, in-memory store, Postgres store.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, QueryBuilder, Row};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use atlas_core::{
    name_key, CountryFilter, CountryRecord, CountrySort, CountryUpsert, StoreStatus,
};

pub const CRATE_NAME: &str = "atlas-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Persistence contract for country records.
///
/// Name matching is case-insensitive everywhere: implementations key rows on
/// the normalized [`name_key`] rather than folding case at query time.
#[async_trait]
pub trait CountryStore: Send + Sync {
    /// Insert-or-update by case-insensitive name. Updates overwrite the data
    /// fields in place and preserve the row's identity and stored name.
    async fn upsert(&self, record: CountryUpsert) -> Result<(), StoreError>;

    async fn list(
        &self,
        filter: &CountryFilter,
        sort: CountrySort,
    ) -> Result<Vec<CountryRecord>, StoreError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<CountryRecord>, StoreError>;

    /// Returns whether a record existed and was removed.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;

    async fn status(&self) -> Result<StoreStatus, StoreError>;

    /// The `limit` records with highest `estimated_gdp`, descending. Records
    /// with null `estimated_gdp` never appear; ties keep insertion order.
    async fn top_by_gdp(&self, limit: usize) -> Result<Vec<CountryRecord>, StoreError>;
}

fn cmp_gdp(a: Option<f64>, b: Option<f64>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => {
            let ordering = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        }
        // Nulls sort last regardless of direction.
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// In-memory store keyed on normalized names; rows keep insertion order.
#[derive(Debug, Default)]
pub struct MemoryCountryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: i64,
    rows: Vec<CountryRecord>,
}

impl MemoryCountryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CountryStore for MemoryCountryStore {
    async fn upsert(&self, record: CountryUpsert) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = name_key(&record.name);
        let now = Utc::now();

        if let Some(row) = inner.rows.iter_mut().find(|r| name_key(&r.name) == key) {
            row.capital = record.capital;
            row.region = record.region;
            row.population = record.population;
            row.currency_code = record.currency_code;
            row.exchange_rate = record.exchange_rate;
            row.estimated_gdp = record.estimated_gdp;
            row.flag_url = record.flag_url;
            row.last_refreshed_at = record.last_refreshed_at;
            row.updated_at = now;
        } else {
            inner.next_id += 1;
            let id = inner.next_id;
            inner.rows.push(CountryRecord {
                id,
                name: record.name,
                capital: record.capital,
                region: record.region,
                population: record.population,
                currency_code: record.currency_code,
                exchange_rate: record.exchange_rate,
                estimated_gdp: record.estimated_gdp,
                flag_url: record.flag_url,
                last_refreshed_at: record.last_refreshed_at,
                created_at: now,
                updated_at: now,
            });
        }

        Ok(())
    }

    async fn list(
        &self,
        filter: &CountryFilter,
        sort: CountrySort,
    ) -> Result<Vec<CountryRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<CountryRecord> = inner
            .rows
            .iter()
            .filter(|row| {
                filter
                    .region
                    .as_ref()
                    .map_or(true, |region| row.region.as_deref() == Some(region.as_str()))
            })
            .filter(|row| {
                filter.currency_code.as_ref().map_or(true, |code| {
                    row.currency_code.as_deref() == Some(code.as_str())
                })
            })
            .cloned()
            .collect();

        match sort {
            CountrySort::GdpDesc => {
                rows.sort_by(|a, b| cmp_gdp(a.estimated_gdp, b.estimated_gdp, true))
            }
            CountrySort::GdpAsc => {
                rows.sort_by(|a, b| cmp_gdp(a.estimated_gdp, b.estimated_gdp, false))
            }
            CountrySort::NameAsc => rows.sort_by(|a, b| name_key(&a.name).cmp(&name_key(&b.name))),
            CountrySort::NameDesc => {
                rows.sort_by(|a, b| name_key(&b.name).cmp(&name_key(&a.name)))
            }
            CountrySort::PopulationDesc => rows.sort_by(|a, b| b.population.cmp(&a.population)),
            CountrySort::PopulationAsc => rows.sort_by(|a, b| a.population.cmp(&b.population)),
            // Rows are already held in insertion (id) order.
            CountrySort::InsertionOrder => {}
        }

        Ok(rows)
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<CountryRecord>, StoreError> {
        let inner = self.inner.read().await;
        let key = name_key(name);
        Ok(inner
            .rows
            .iter()
            .find(|row| name_key(&row.name) == key)
            .cloned())
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let key = name_key(name);
        match inner.rows.iter().position(|row| name_key(&row.name) == key) {
            Some(index) => {
                inner.rows.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn status(&self) -> Result<StoreStatus, StoreError> {
        let inner = self.inner.read().await;
        Ok(StoreStatus {
            total_countries: inner.rows.len() as i64,
            last_refreshed_at: inner.rows.iter().filter_map(|r| r.last_refreshed_at).max(),
        })
    }

    async fn top_by_gdp(&self, limit: usize) -> Result<Vec<CountryRecord>, StoreError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<CountryRecord> = inner
            .rows
            .iter()
            .filter(|row| row.estimated_gdp.is_some())
            .cloned()
            .collect();
        rows.sort_by(|a, b| cmp_gdp(a.estimated_gdp, b.estimated_gdp, true));
        rows.truncate(limit);
        Ok(rows)
    }
}

const COUNTRY_COLUMNS: &str = "id, name, capital, region, population, currency_code, \
     exchange_rate, estimated_gdp, flag_url, last_refreshed_at, created_at, updated_at";

fn record_from_row(row: &PgRow) -> Result<CountryRecord, sqlx::Error> {
    Ok(CountryRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        capital: row.try_get("capital")?,
        region: row.try_get("region")?,
        population: row.try_get("population")?,
        currency_code: row.try_get("currency_code")?,
        exchange_rate: row.try_get("exchange_rate")?,
        estimated_gdp: row.try_get("estimated_gdp")?,
        flag_url: row.try_get("flag_url")?,
        last_refreshed_at: row.try_get("last_refreshed_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn order_clause(sort: CountrySort) -> &'static str {
    match sort {
        CountrySort::GdpDesc => "estimated_gdp DESC NULLS LAST, id ASC",
        CountrySort::GdpAsc => "estimated_gdp ASC NULLS LAST, id ASC",
        CountrySort::NameAsc => "LOWER(name) ASC, id ASC",
        CountrySort::NameDesc => "LOWER(name) DESC, id ASC",
        CountrySort::PopulationDesc => "population DESC, id ASC",
        CountrySort::PopulationAsc => "population ASC, id ASC",
        CountrySort::InsertionOrder => "id ASC",
    }
}

/// Postgres-backed store. Case-insensitive uniqueness lives in the schema:
/// the `name_key` column carries a UNIQUE constraint and every lookup and
/// upsert goes through it.
#[derive(Debug, Clone)]
pub struct PgCountryStore {
    pool: PgPool,
}

impl PgCountryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl CountryStore for PgCountryStore {
    async fn upsert(&self, record: CountryUpsert) -> Result<(), StoreError> {
        debug!(name = %record.name, "upserting country");
        sqlx::query(
            r#"
            INSERT INTO countries (
                name, name_key, capital, region, population, currency_code,
                exchange_rate, estimated_gdp, flag_url, last_refreshed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (name_key) DO UPDATE SET
                capital = EXCLUDED.capital,
                region = EXCLUDED.region,
                population = EXCLUDED.population,
                currency_code = EXCLUDED.currency_code,
                exchange_rate = EXCLUDED.exchange_rate,
                estimated_gdp = EXCLUDED.estimated_gdp,
                flag_url = EXCLUDED.flag_url,
                last_refreshed_at = EXCLUDED.last_refreshed_at,
                updated_at = NOW()
            "#,
        )
        .bind(&record.name)
        .bind(name_key(&record.name))
        .bind(&record.capital)
        .bind(&record.region)
        .bind(record.population)
        .bind(&record.currency_code)
        .bind(record.exchange_rate)
        .bind(record.estimated_gdp)
        .bind(&record.flag_url)
        .bind(record.last_refreshed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(
        &self,
        filter: &CountryFilter,
        sort: CountrySort,
    ) -> Result<Vec<CountryRecord>, StoreError> {
        let mut builder = QueryBuilder::<sqlx::Postgres>::new(format!(
            "SELECT {COUNTRY_COLUMNS} FROM countries"
        ));

        let mut has_where = false;
        if let Some(region) = &filter.region {
            builder.push(" WHERE region = ").push_bind(region.clone());
            has_where = true;
        }
        if let Some(code) = &filter.currency_code {
            builder
                .push(if has_where { " AND " } else { " WHERE " })
                .push("currency_code = ")
                .push_bind(code.clone());
        }
        builder.push(" ORDER BY ").push(order_clause(sort));

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| record_from_row(row).map_err(StoreError::from))
            .collect()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<CountryRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COUNTRY_COLUMNS} FROM countries WHERE name_key = $1"
        ))
        .bind(name_key(name))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose().map_err(StoreError::from)
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM countries WHERE name_key = $1")
            .bind(name_key(name))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn status(&self) -> Result<StoreStatus, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total_countries, MAX(last_refreshed_at) AS last_refreshed_at \
             FROM countries",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(StoreStatus {
            total_countries: row.try_get("total_countries")?,
            last_refreshed_at: row.try_get("last_refreshed_at")?,
        })
    }

    async fn top_by_gdp(&self, limit: usize) -> Result<Vec<CountryRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COUNTRY_COLUMNS} FROM countries \
             WHERE estimated_gdp IS NOT NULL \
             ORDER BY estimated_gdp DESC, id ASC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| record_from_row(row).map_err(StoreError::from))
            .collect()
    }
}
