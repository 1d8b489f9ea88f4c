//! HTTP gateway over the country-metadata and exchange-rate providers.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use atlas_core::{CountryObservation, ExchangeRateTable};

pub const CRATE_NAME: &str = "atlas-gateway";

pub const DEFAULT_COUNTRIES_URL: &str =
    "https://restcountries.com/v2/all?fields=name,capital,region,population,flag,currencies";
pub const DEFAULT_EXCHANGE_RATES_URL: &str = "https://open.er-api.com/v6/latest/USD";

/// Bound on each upstream call; a single attempt, no retries.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub countries_url: String,
    pub exchange_rates_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            countries_url: DEFAULT_COUNTRIES_URL.to_string(),
            exchange_rates_url: DEFAULT_EXCHANGE_RATES_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The remote call timed out, failed at the transport layer, returned a
    /// non-success status, or produced a body of an unexpected shape.
    #[error("could not fetch data from {provider}: {details}")]
    UpstreamUnavailable {
        provider: &'static str,
        details: String,
    },
}

impl GatewayError {
    fn unavailable(source: &'static str, details: impl ToString) -> Self {
        Self::UpstreamUnavailable {
            provider: source,
            details: details.to_string(),
        }
    }
}

/// Contract the refresh pipeline fetches through. Implementations own
/// timeout and transport-failure semantics and nothing else.
#[async_trait]
pub trait DataGateway: Send + Sync {
    async fn fetch_countries(&self) -> Result<Vec<CountryObservation>, GatewayError>;
    async fn fetch_exchange_rates(&self) -> Result<ExchangeRateTable, GatewayError>;
}

/// Rates arrive wrapped in a provider envelope; only `rates` matters.
#[derive(Debug, Deserialize)]
struct ExchangeRateEnvelope {
    rates: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct HttpDataGateway {
    client: reqwest::Client,
    config: GatewayConfig,
}

impl HttpDataGateway {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client, config })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        source: &'static str,
        url: &str,
    ) -> Result<T, GatewayError> {
        debug!(source, url, "fetching upstream data");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| GatewayError::unavailable(source, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::unavailable(
                source,
                format!("http status {status}"),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| GatewayError::unavailable(source, err))
    }
}

#[async_trait]
impl DataGateway for HttpDataGateway {
    async fn fetch_countries(&self) -> Result<Vec<CountryObservation>, GatewayError> {
        self.get_json("RestCountries API", &self.config.countries_url)
            .await
    }

    async fn fetch_exchange_rates(&self) -> Result<ExchangeRateTable, GatewayError> {
        let envelope: ExchangeRateEnvelope = self
            .get_json("Exchange Rate API", &self.config.exchange_rates_url)
            .await?;
        Ok(ExchangeRateTable::new(envelope.rates))
    }
}
