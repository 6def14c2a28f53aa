//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status and scanned height
//! - Event counts and duplicate deliveries
//! - Transfer lifecycle and relay submissions
//! - Health checks

use crate::error::{RelayerError, RelayerResult};
use crate::events::ChainEvent;
use crate::transfer::{Transfer, TransferStatus};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge_vec, register_histogram_vec, Counter,
    CounterVec, Encoder, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::{error, info};

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "bridge_relayer_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_DEGRADED: GaugeVec = register_gauge_vec!(
        "bridge_relayer_chain_degraded",
        "Chain gave up reconnecting (1=degraded)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "bridge_relayer_chain_block_height",
        "Last block scanned for bridge events per chain",
        &["chain_id"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_RECEIVED: CounterVec = register_counter_vec!(
        "bridge_relayer_events_received_total",
        "Total events received by type",
        &["chain_id", "event_type"]
    ).unwrap();

    pub static ref DUPLICATE_EVENTS: CounterVec = register_counter_vec!(
        "bridge_relayer_duplicate_events_total",
        "TransferInitiated deliveries for already known message ids",
        &["chain_id"]
    ).unwrap();

    // Transfer metrics
    pub static ref TRANSFERS_DETECTED: CounterVec = register_counter_vec!(
        "bridge_relayer_transfers_detected_total",
        "Transfers detected per source chain",
        &["chain_id"]
    ).unwrap();

    pub static ref TRANSFERS_COMPLETED: CounterVec = register_counter_vec!(
        "bridge_relayer_transfers_completed_total",
        "Transfers completed per destination chain",
        &["chain_id"]
    ).unwrap();

    pub static ref TRANSFERS_FAILED: CounterVec = register_counter_vec!(
        "bridge_relayer_transfers_failed_total",
        "Transfers marked failed per destination chain",
        &["chain_id"]
    ).unwrap();

    pub static ref REJECTED_TRANSITIONS: Counter = register_counter!(
        "bridge_relayer_rejected_transitions_total",
        "Status changes refused by the transfer state machine"
    ).unwrap();

    // Relay metrics
    pub static ref RELAY_SUBMITTED: CounterVec = register_counter_vec!(
        "bridge_relayer_relay_submissions_total",
        "completeTransfer submission attempts",
        &["chain_id"]
    ).unwrap();

    pub static ref RELAY_LATENCY: HistogramVec = register_histogram_vec!(
        "bridge_relayer_relay_latency_seconds",
        "Time from first submission attempt to receipt",
        &["chain_id"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: Counter = register_counter!(
        "bridge_relayer_health_check_success_total",
        "Total successful health checks"
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: Counter = register_counter!(
        "bridge_relayer_health_check_failure_total",
        "Total failed health checks"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayerError::Config(format!("Failed to bind metrics server on {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayerError::Internal(format!("Metrics server failed: {}", e)))
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Text exposition of every registered metric
pub fn render() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chain_health(chain_id: u64, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_chain_degraded(chain_id: u64, degraded: bool) {
    CHAIN_DEGRADED
        .with_label_values(&[&chain_id.to_string()])
        .set(if degraded { 1.0 } else { 0.0 });
}

pub fn record_block_height(chain_id: u64, block_number: u64) {
    CHAIN_BLOCK_HEIGHT
        .with_label_values(&[&chain_id.to_string()])
        .set(block_number as f64);
}

pub fn record_event(chain_id: u64, event: &ChainEvent) {
    EVENTS_RECEIVED
        .with_label_values(&[&chain_id.to_string(), event.name()])
        .inc();
}

pub fn record_duplicate_event(chain_id: u64) {
    DUPLICATE_EVENTS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_transfer_detected(source_chain_id: u64) {
    TRANSFERS_DETECTED
        .with_label_values(&[&source_chain_id.to_string()])
        .inc();
}

/// Count a transfer reaching an outcome after a successful transition
pub fn record_transition(transfer: &Transfer) {
    let chain_id = transfer.destination_chain_id.to_string();
    match transfer.status {
        TransferStatus::Completed => TRANSFERS_COMPLETED.with_label_values(&[&chain_id]).inc(),
        TransferStatus::Failed => TRANSFERS_FAILED.with_label_values(&[&chain_id]).inc(),
        _ => {}
    }
}

pub fn record_rejected_transition() {
    REJECTED_TRANSITIONS.inc();
}

pub fn record_relay_submitted(chain_id: u64) {
    RELAY_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_relay_latency(chain_id: u64, latency_secs: f64) {
    RELAY_LATENCY
        .with_label_values(&[&chain_id.to_string()])
        .observe(latency_secs);
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.inc();
}
