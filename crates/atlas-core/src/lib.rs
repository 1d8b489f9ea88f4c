//! Core domain model for the Atlas country data service.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "atlas-core";

/// Normalized lookup key for case-insensitive country-name matching.
///
/// Uniqueness is enforced on this key at the storage layer, so two upserts of
/// "Ghana" and "ghana" always land on the same row.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// One country as observed from the metadata provider.
///
/// Providers omit fields freely; everything except `name` defaults so a
/// malformed entry is processed best-effort instead of rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryObservation {
    pub name: String,
    #[serde(default)]
    pub capital: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub population: i64,
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub currencies: Vec<CurrencyObservation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyObservation {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
}

impl CountryObservation {
    /// Single-currency policy: only the first listed currency counts.
    pub fn primary_currency_code(&self) -> Option<&str> {
        self.currencies.first().and_then(|c| c.code.as_deref())
    }
}

/// Ephemeral currency-code -> units-per-USD mapping, fetched fresh each
/// refresh cycle and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRateTable(HashMap<String, f64>);

impl ExchangeRateTable {
    pub fn new(rates: HashMap<String, f64>) -> Self {
        Self(rates)
    }

    /// Rate for `code`, treating non-positive quotes as unknown.
    pub fn rate_for(&self, code: &str) -> Option<f64> {
        self.0.get(code).copied().filter(|rate| *rate > 0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, f64)> for ExchangeRateTable {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One stored row per distinct (case-insensitive) country name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryRecord {
    pub id: i64,
    pub name: String,
    pub capital: Option<String>,
    pub region: Option<String>,
    pub population: i64,
    pub currency_code: Option<String>,
    /// Units of `currency_code` per 1 USD.
    pub exchange_rate: Option<f64>,
    /// Randomized proxy metric; 0 when the country has no currency at all,
    /// null when a currency exists but its rate was unknown.
    pub estimated_gdp: Option<f64>,
    pub flag_url: Option<String>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Write-side shape for insert-or-update by case-insensitive name.
///
/// Identity (`id`, `created_at`, the originally stored `name` casing) is
/// owned by the store and never supplied by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryUpsert {
    pub name: String,
    pub capital: Option<String>,
    pub region: Option<String>,
    pub population: i64,
    pub currency_code: Option<String>,
    pub exchange_rate: Option<f64>,
    pub estimated_gdp: Option<f64>,
    pub flag_url: Option<String>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

/// Exact-match filters for listing; absent fields are not applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountryFilter {
    pub region: Option<String>,
    pub currency_code: Option<String>,
}

/// Sort orders accepted by the list operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountrySort {
    GdpDesc,
    GdpAsc,
    NameAsc,
    NameDesc,
    PopulationDesc,
    PopulationAsc,
    /// Insertion order by id.
    #[default]
    InsertionOrder,
}

impl CountrySort {
    /// Unrecognized or absent values fall back to insertion order rather
    /// than failing the request.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("gdp_desc") => Self::GdpDesc,
            Some("gdp_asc") => Self::GdpAsc,
            Some("name_asc") => Self::NameAsc,
            Some("name_desc") => Self::NameDesc,
            Some("population_desc") => Self::PopulationDesc,
            Some("population_asc") => Self::PopulationAsc,
            _ => Self::InsertionOrder,
        }
    }
}

/// Aggregate store snapshot served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStatus {
    pub total_countries: i64,
    /// Latest `last_refreshed_at` across all records, if any was ever set.
    pub last_refreshed_at: Option<DateTime<Utc>>,
}
