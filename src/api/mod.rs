//! HTTP API for health checks, status, and operator actions

use crate::config::{ApiConfig, ChainConfig};
use crate::error::{RelayerError, RelayerResult};
use crate::service::{BridgeService, ChainStatus};
use crate::transfer::MessageId;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BridgeService>,
}

/// Routes of the query and operator API
pub fn router(service: Arc<BridgeService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/chains", get(get_chains))
        .route("/chains/:chain_id", get(get_chain))
        .route("/transfers/:message_id", get(get_transfer))
        .route("/transfers/:message_id/relay", post(relay_transfer))
        .route("/transfers/:message_id/cancel", post(cancel_transfer))
        .route("/stats", get(get_stats))
        .route("/fees", get(estimate_fee))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { service })
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, service: Arc<BridgeService>) -> RelayerResult<()> {
    let app = router(service);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayerError::Config(format!("Failed to bind API server on {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayerError::Internal(format!("API server failed: {}", e)))
}

/// Maps service errors onto HTTP statuses
pub struct ApiError(RelayerError);

impl From<RelayerError> for ApiError {
    fn from(err: RelayerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RelayerError::TransferNotFound { .. } | RelayerError::ChainNotConfigured { .. } => {
                StatusCode::NOT_FOUND
            }
            RelayerError::NotEligible { .. } | RelayerError::InvalidStateTransition { .. } => {
                StatusCode::CONFLICT
            }
            RelayerError::InvalidTransfer(_) => StatusCode::BAD_REQUEST,
            RelayerError::SignatureUnavailable | RelayerError::ChainDegraded { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RelayerError::Connectivity { .. } | RelayerError::Timeout { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("API request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_message_id(raw: &str) -> Result<MessageId, ApiError> {
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    hex.parse::<MessageId>().map_err(|_| {
        ApiError(RelayerError::InvalidTransfer(format!(
            "invalid message id: {}",
            raw
        )))
    })
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - transfer store and chain connections
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.service.registry().health_check().await.is_ok();

    let chain_health = state.service.chains().health_check().await;
    let chains_ok = chain_health.iter().any(|(_, healthy)| *healthy);
    let ready = store_ok && chains_ok;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            store: store_ok,
            chains: chains_ok,
            relay_enabled: state.service.relay_enabled(),
            details: chain_health
                .into_iter()
                .map(|(chain_id, healthy)| ChainHealth { chain_id, healthy })
                .collect(),
        }),
    )
}

async fn get_chains(State(state): State<AppState>) -> Json<Vec<ChainStatus>> {
    Json(state.service.get_all_chains_status().await)
}

async fn get_chain(
    State(state): State<AppState>,
    Path(chain_id): Path<u64>,
) -> ApiResult<ChainResponse> {
    let config = state.service.chain_config(chain_id)?.clone();
    let status = state.service.get_chain_status(chain_id).await?;
    Ok(Json(ChainResponse { config, status }))
}

async fn get_transfer(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let message_id = parse_message_id(&message_id)?;
    Ok(Json(state.service.get_transfer_status(&message_id).await?))
}

async fn relay_transfer(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let message_id = parse_message_id(&message_id)?;
    let transfer = state.service.relay_transfer(&message_id).await?;
    Ok((StatusCode::ACCEPTED, Json(transfer)))
}

async fn cancel_transfer(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let message_id = parse_message_id(&message_id)?;
    Ok(Json(state.service.cancel_transfer(&message_id).await?))
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.get_stats().await)
}

async fn estimate_fee(
    State(state): State<AppState>,
    Query(query): Query<FeeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let amount = U256::from_dec_str(&query.amount).map_err(|_| {
        ApiError(RelayerError::InvalidTransfer(format!(
            "invalid amount: {}",
            query.amount
        )))
    })?;
    Ok(Json(state.service.estimate_fee(query.source, query.destination, amount)?))
}

// Request and response types

#[derive(Deserialize)]
struct FeeQuery {
    source: u64,
    destination: u64,
    amount: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    store: bool,
    chains: bool,
    relay_enabled: bool,
    details: Vec<ChainHealth>,
}

#[derive(Serialize)]
struct ChainHealth {
    chain_id: u64,
    healthy: bool,
}

#[derive(Serialize)]
struct ChainResponse {
    config: ChainConfig,
    status: ChainStatus,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainRegistry, LedgerConnector};
    use crate::config::{FeeConfig, RelayerConfig};
    use crate::registry::TransferRegistry;
    use crate::store::MemoryStore;
    use crate::testing::{chain_config, FakeConnector};
    use crate::transfer::sample_transfer;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<BridgeService>) {
        let chains = ChainRegistry::new(vec![
            (
                chain_config(80002, "Polygon Amoy", "MATIC"),
                Arc::new(FakeConnector::new(80002)) as Arc<dyn LedgerConnector>,
            ),
            (
                chain_config(421614, "Arbitrum Sepolia", "ETH"),
                Arc::new(FakeConnector::new(421614)) as Arc<dyn LedgerConnector>,
            ),
        ]);
        let registry = Arc::new(
            TransferRegistry::open(Arc::new(MemoryStore::new()))
                .await
                .unwrap(),
        );
        let service = Arc::new(BridgeService::new(
            chains,
            registry,
            None,
            RelayerConfig::default(),
            FeeConfig::default(),
        ));
        (router(service.clone()), service)
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let (app, _) = app().await;

        let (status, body) = call(app.clone(), "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = call(app, "GET", "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["relay_enabled"], false);
        assert_eq!(body["details"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transfer_lookup_errors() {
        let (app, service) = app().await;
        let transfer = sample_transfer(1, 80002, 421614, 100);
        let id = format!("{:?}", transfer.message_id);
        service.registry().insert_if_absent(transfer).await.unwrap();

        let (status, body) = call(app.clone(), "GET", &format!("/transfers/{}", id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "detected");
        assert_eq!(body["detail"]["source"], "local");

        let (status, _) = call(app.clone(), "GET", "/transfers/0xnothex").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = format!("/transfers/0x{}", "ab".repeat(32));
        let (status, _) = call(app.clone(), "GET", &unknown).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // no relayer key loaded
        let (status, body) = call(app, "POST", &format!("/transfers/{}/relay", id)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].as_str().unwrap().contains("status-only"));
    }

    #[tokio::test]
    async fn test_cancel_then_conflict() {
        let (app, service) = app().await;
        let transfer = sample_transfer(2, 80002, 421614, 100);
        let id = format!("{:?}", transfer.message_id);
        service.registry().insert_if_absent(transfer).await.unwrap();

        let uri = format!("/transfers/{}/cancel", id);
        let (status, body) = call(app.clone(), "POST", &uri).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "CANCELLED");

        let (status, _) = call(app, "POST", &uri).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_chains_stats_and_fees() {
        let (app, _) = app().await;

        let (status, body) = call(app.clone(), "GET", "/chains").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (status, body) = call(app.clone(), "GET", "/chains/80002").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["config"]["native_currency"], "MATIC");
        assert_eq!(body["status"]["connected"], true);

        let (status, _) = call(app.clone(), "GET", "/chains/1").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(app.clone(), "GET", "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_bridged"], "0");
        assert_eq!(body["relay_enabled"], false);

        let (status, body) = call(
            app.clone(),
            "GET",
            "/fees?source=80002&destination=421614&amount=1000000000000000000",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_fee"], "1500000000000000");
        assert_eq!(body["currency"], "MATIC");

        let (status, _) = call(app, "GET", "/fees?source=80002&destination=1&amount=5").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
