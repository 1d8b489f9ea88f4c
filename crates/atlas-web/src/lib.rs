//! Axum JSON API over the country service.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, Request, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;
use tokio::net::TcpListener;

use atlas_core::{CountryFilter, CountrySort};
use atlas_pipeline::{maybe_build_scheduler, AtlasConfig, CountryService, RefreshError};
use atlas_store::{CountryStore, PgCountryStore};

pub const CRATE_NAME: &str = "atlas-web";

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CountryService>,
}

impl AppState {
    pub fn new(service: Arc<CountryService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ListQuery {
    region: Option<String>,
    currency: Option<String>,
    sort: Option<String>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/countries/refresh", post(refresh_handler))
        .route("/countries", get(list_countries_handler))
        .route("/countries/image", get(summary_image_handler))
        .route(
            "/countries/{name}",
            get(get_country_handler).delete(delete_country_handler),
        )
        .route("/status", get(status_handler))
        .fallback(route_not_found)
        .layer(middleware::from_fn(cors_middleware))
        .with_state(Arc::new(state))
}

/// Connect to Postgres, migrate, and serve until shutdown. The optional
/// cron scheduler shares the same service instance.
pub async fn serve_from_env() -> anyhow::Result<()> {
    use anyhow::Context;

    let config = AtlasConfig::from_env();
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    let store = PgCountryStore::new(pool);
    store.migrate().await.context("running migrations")?;

    let store: Arc<dyn CountryStore> = Arc::new(store);
    let service = Arc::new(CountryService::from_config(&config, store)?);

    if let Some(scheduler) = maybe_build_scheduler(&config, service.clone()).await? {
        scheduler.start().await.context("starting scheduler")?;
        tracing::info!(cron = %config.refresh_cron, "scheduled refresh enabled");
    }

    serve(AppState::new(service), config.web_port).await
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "atlas web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn index_handler() -> Response {
    Json(json!({
        "message": "Atlas Country Economic Data Service",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "POST /countries/refresh": "Fetch and cache countries data",
            "GET /countries": "List countries (filters: ?region=Africa&currency=NGN&sort=gdp_desc)",
            "GET /countries/{name}": "Get country by name",
            "DELETE /countries/{name}": "Delete country by name",
            "GET /countries/image": "Summary image for the latest refresh",
            "GET /status": "Store status"
        }
    }))
    .into_response()
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.refresh().await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(RefreshError::UpstreamUnavailable(err)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "External data source unavailable",
                "details": err.to_string(),
            })),
        )
            .into_response(),
        Err(err) => internal_error(err),
    }
}

async fn list_countries_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    let filter = CountryFilter {
        region: query.region,
        currency_code: query.currency,
    };
    let sort = CountrySort::parse(query.sort.as_deref());
    match state.service.list_countries(&filter, sort).await {
        Ok(countries) => (StatusCode::OK, Json(countries)).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn get_country_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> Response {
    if name.trim().is_empty() {
        return validation_failed();
    }
    match state.service.get_country(&name).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => not_found("Country not found"),
        Err(err) => internal_error(err),
    }
}

async fn delete_country_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(name): AxumPath<String>,
) -> Response {
    if name.trim().is_empty() {
        return validation_failed();
    }
    match state.service.delete_country(&name).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({"message": "Country deleted successfully"})),
        )
            .into_response(),
        Ok(false) => not_found("Country not found"),
        Err(err) => internal_error(err),
    }
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.service.status().await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn summary_image_handler(State(state): State<Arc<AppState>>) -> Response {
    if !state.service.summary_image_exists() {
        return not_found("Summary image not found");
    }
    match tokio::fs::read(state.service.summary_image_path()).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, "image/png")], bytes).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn route_not_found() -> Response {
    not_found("Route not found")
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        apply_cors_headers(response.headers_mut());
        return response;
    }
    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Origin, X-Requested-With, Content-Type, Accept"),
    );
}

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": message}))).into_response()
}

fn validation_failed() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "Validation failed",
            "details": {"name": "is required"},
        })),
    )
        .into_response()
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    tracing::error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use atlas_core::{CountryObservation, CurrencyObservation, ExchangeRateTable};
    use atlas_gateway::{DataGateway, GatewayError};
    use atlas_pipeline::{FixedMultiplier, SummaryArtifactGenerator};
    use atlas_store::MemoryCountryStore;

    struct StubGateway {
        fail: bool,
    }

    #[async_trait]
    impl DataGateway for StubGateway {
        async fn fetch_countries(&self) -> Result<Vec<CountryObservation>, GatewayError> {
            if self.fail {
                return Err(GatewayError::UpstreamUnavailable {
                    provider: "RestCountries API",
                    details: "operation timed out".to_string(),
                });
            }
            Ok(vec![
                CountryObservation {
                    name: "Ghana".to_string(),
                    capital: Some("Accra".to_string()),
                    region: Some("Africa".to_string()),
                    population: 31_072_940,
                    flag: None,
                    currencies: vec![CurrencyObservation {
                        code: Some("GHS".to_string()),
                        name: None,
                        symbol: None,
                    }],
                },
                CountryObservation {
                    name: "Moneyless".to_string(),
                    capital: None,
                    region: Some("Testland".to_string()),
                    population: 500,
                    flag: None,
                    currencies: vec![],
                },
            ])
        }

        async fn fetch_exchange_rates(&self) -> Result<ExchangeRateTable, GatewayError> {
            Ok(vec![("GHS".to_string(), 15.0)].into_iter().collect())
        }
    }

    fn test_app(fail_gateway: bool) -> (Router, TempDir) {
        let cache = TempDir::new().expect("tempdir");
        let service = CountryService::new(
            Arc::new(StubGateway { fail: fail_gateway }),
            Arc::new(MemoryCountryStore::new()),
            Arc::new(FixedMultiplier(1_500.0)),
            SummaryArtifactGenerator::new(cache.path()),
        );
        (app(AppState::new(Arc::new(service))), cache)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn request(method: &str, uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn index_lists_the_endpoints() {
        let (app, _cache) = test_app(false);
        let response = app.oneshot(request("GET", "/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Atlas Country Economic Data Service");
    }

    #[tokio::test]
    async fn refresh_then_query_round_trip() {
        let (app, _cache) = test_app(false);

        let refresh = app
            .clone()
            .oneshot(request("POST", "/countries/refresh"))
            .await
            .unwrap();
        assert_eq!(refresh.status(), StatusCode::OK);
        let body = body_json(refresh).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["message"], "Countries data refreshed successfully");

        let list = app
            .clone()
            .oneshot(request("GET", "/countries?sort=gdp_desc"))
            .await
            .unwrap();
        assert_eq!(list.status(), StatusCode::OK);
        let countries = body_json(list).await;
        let rows = countries.as_array().expect("array");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "Ghana");

        let filtered = app
            .clone()
            .oneshot(request("GET", "/countries?region=Africa&currency=GHS"))
            .await
            .unwrap();
        let filtered_rows = body_json(filtered).await;
        assert_eq!(filtered_rows.as_array().unwrap().len(), 1);

        let lookup = app
            .clone()
            .oneshot(request("GET", "/countries/GHANA"))
            .await
            .unwrap();
        assert_eq!(lookup.status(), StatusCode::OK);
        let record = body_json(lookup).await;
        assert_eq!(record["name"], "Ghana");
        assert_eq!(record["currency_code"], "GHS");

        let status = app.clone().oneshot(request("GET", "/status")).await.unwrap();
        let status_body = body_json(status).await;
        assert_eq!(status_body["total_countries"], 2);
        assert!(status_body["last_refreshed_at"].is_string());

        let image = app
            .clone()
            .oneshot(request("GET", "/countries/image"))
            .await
            .unwrap();
        assert_eq!(image.status(), StatusCode::OK);
        assert_eq!(
            image.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "image/png"
        );
    }

    #[tokio::test]
    async fn upstream_failure_maps_to_service_unavailable() {
        let (app, _cache) = test_app(true);
        let response = app
            .oneshot(request("POST", "/countries/refresh"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["error"], "External data source unavailable");
        assert!(body["details"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn missing_country_and_missing_image_are_not_found() {
        let (app, _cache) = test_app(false);

        let lookup = app
            .clone()
            .oneshot(request("GET", "/countries/Narnia"))
            .await
            .unwrap();
        assert_eq!(lookup.status(), StatusCode::NOT_FOUND);
        let body = body_json(lookup).await;
        assert_eq!(body["error"], "Country not found");

        let image = app
            .clone()
            .oneshot(request("GET", "/countries/image"))
            .await
            .unwrap();
        assert_eq!(image.status(), StatusCode::NOT_FOUND);

        let unknown = app.oneshot(request("GET", "/no/such/route")).await.unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
        let unknown_body = body_json(unknown).await;
        assert_eq!(unknown_body["error"], "Route not found");
    }

    #[tokio::test]
    async fn delete_reports_presence_and_absence() {
        let (app, _cache) = test_app(false);
        app.clone()
            .oneshot(request("POST", "/countries/refresh"))
            .await
            .unwrap();

        let deleted = app
            .clone()
            .oneshot(request("DELETE", "/countries/ghana"))
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::OK);
        let body = body_json(deleted).await;
        assert_eq!(body["message"], "Country deleted successfully");

        let again = app
            .clone()
            .oneshot(request("DELETE", "/countries/ghana"))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);

        let lookup = app
            .oneshot(request("GET", "/countries/Ghana"))
            .await
            .unwrap();
        assert_eq!(lookup.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn blank_name_fails_validation() {
        let (app, _cache) = test_app(false);
        let response = app
            .oneshot(request("GET", "/countries/%20%20"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Validation failed");
        assert_eq!(body["details"]["name"], "is required");
    }

    #[tokio::test]
    async fn responses_carry_cors_headers() {
        let (app, _cache) = test_app(false);
        let response = app.oneshot(request("GET", "/")).await.unwrap();
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN]
                .to_str()
                .unwrap(),
            "*"
        );
    }
}
