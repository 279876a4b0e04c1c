//! Prometheus metrics and the probe/metrics HTTP server
//!
//! Metric names are part of the operator's external contract.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tracing::info;

use crate::error::ControllerError;

/// Values of `gpu_operator_reconciliation_status`
pub mod status {
    pub const READY: i64 = 1;
    pub const NOT_READY: i64 = 0;
    pub const FAILED: i64 = -1;
}

/// Process-wide operator metrics
#[derive(Debug)]
pub struct OperatorMetrics {
    registry: Registry,

    pub reconciliation_status: IntGauge,
    pub reconciliation_total: IntCounter,
    pub reconciliation_failed_total: IntCounter,
    pub reconciliation_last_success_ts_seconds: IntGauge,
    pub reconciliation_has_nfd_labels: IntGauge,
    pub gpu_nodes_total: IntGauge,
    pub openshift_driver_toolkit_enabled: IntGauge,
    pub driver_auto_upgrade_enabled: IntGauge,

    pub upgrades_in_progress: IntGauge,
    pub upgrades_done: IntGauge,
    pub upgrades_failed: IntGauge,
    pub upgrades_available: IntGauge,
    pub upgrades_pending: IntGauge,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let g = IntGauge::new(name, help)?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::new(name, help)?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl OperatorMetrics {
    /// Creates a fresh registry with every operator metric registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        Ok(Self {
            reconciliation_status: gauge(
                &registry,
                "gpu_operator_reconciliation_status",
                "1 if the last ClusterPolicy reconcile was ready, 0 if not ready, -1 if it failed",
            )?,
            reconciliation_total: counter(
                &registry,
                "gpu_operator_reconciliation_total",
                "Total number of ClusterPolicy reconciliations",
            )?,
            reconciliation_failed_total: counter(
                &registry,
                "gpu_operator_reconciliation_failed_total",
                "Number of failed ClusterPolicy reconciliations",
            )?,
            reconciliation_last_success_ts_seconds: gauge(
                &registry,
                "gpu_operator_reconciliation_last_success_ts_seconds",
                "Timestamp of the last ready ClusterPolicy reconciliation",
            )?,
            reconciliation_has_nfd_labels: gauge(
                &registry,
                "gpu_operator_reconciliation_has_nfd_labels",
                "1 if any node carries node feature discovery labels",
            )?,
            gpu_nodes_total: gauge(&registry, "gpu_operator_gpu_nodes_total", "Number of nodes with NVIDIA GPUs")?,
            openshift_driver_toolkit_enabled: gauge(
                &registry,
                "gpu_operator_openshift_driver_toolkit_enabled",
                "1 if the OpenShift driver toolkit builds the driver",
            )?,
            driver_auto_upgrade_enabled: gauge(
                &registry,
                "gpu_operator_driver_auto_upgrade_enabled",
                "1 if driver auto-upgrade is enabled",
            )?,
            upgrades_in_progress: gauge(
                &registry,
                "gpu_operator_nodes_upgrades_in_progress",
                "Nodes currently going through a driver upgrade",
            )?,
            upgrades_done: gauge(
                &registry,
                "gpu_operator_nodes_upgrades_done",
                "Nodes whose driver is up to date",
            )?,
            upgrades_failed: gauge(
                &registry,
                "gpu_operator_nodes_upgrades_failed",
                "Nodes whose driver upgrade failed",
            )?,
            upgrades_available: gauge(
                &registry,
                "gpu_operator_nodes_upgrades_available",
                "Upgrade slots currently available",
            )?,
            upgrades_pending: gauge(
                &registry,
                "gpu_operator_nodes_upgrades_pending",
                "Nodes waiting for a driver upgrade",
            )?,
            registry,
        })
    }

    /// Get the Prometheus registry for serving metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition of every registered metric.
    pub fn encode(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ControllerError::Watch(format!("metrics are not UTF-8: {}", e)))
    }

    pub fn record_success(&self) {
        self.reconciliation_status.set(status::READY);
        self.reconciliation_last_success_ts_seconds
            .set(chrono::Utc::now().timestamp());
    }

    pub fn record_failure(&self) {
        self.reconciliation_status.set(status::FAILED);
        self.reconciliation_failed_total.inc();
    }
}

/// Router serving `/metrics`, `/healthz` and `/readyz`.
pub fn router(metrics: Arc<OperatorMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(probe_handler))
        .route("/readyz", get(probe_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<OperatorMetrics>>) -> Response {
    match metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn probe_handler() -> &'static str {
    "ok"
}

/// Serves metrics and probes until the listener fails.
pub async fn serve(addr: SocketAddr, metrics: Arc<OperatorMetrics>) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}
