//! Prometheus exposition of the agent's own activity.
//!
//! The polling loop records report outcomes and the latest host sample into a
//! [`Telemetry`] registry; a small axum server renders it at `/metrics`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use prometheus::{Encoder, Gauge, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;

use crate::error::{AgentError, Result};
use crate::reporter::{MetricsPayload, ReportKind, ReportOutcome};

pub struct Telemetry {
    registry: Registry,
    reports: IntCounterVec,
    cpu_load: Gauge,
    memory_usage: Gauge,
    rx_bytes: IntGaugeVec,
    tx_bytes: IntGaugeVec,
}

impl Telemetry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reports = IntCounterVec::new(
            Opts::new(
                "device_agent_reports_total",
                "Controller reports by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        let cpu_load = Gauge::new("device_agent_cpu_load", "Last sampled 1-minute load average")?;
        let memory_usage = Gauge::new(
            "device_agent_memory_usage_percent",
            "Last sampled memory usage percentage",
        )?;
        let rx_bytes = IntGaugeVec::new(
            Opts::new(
                "device_agent_interface_rx_bytes",
                "Received bytes per interface at the last sample",
            ),
            &["interface"],
        )?;
        let tx_bytes = IntGaugeVec::new(
            Opts::new(
                "device_agent_interface_tx_bytes",
                "Transmitted bytes per interface at the last sample",
            ),
            &["interface"],
        )?;

        registry.register(Box::new(reports.clone()))?;
        registry.register(Box::new(cpu_load.clone()))?;
        registry.register(Box::new(memory_usage.clone()))?;
        registry.register(Box::new(rx_bytes.clone()))?;
        registry.register(Box::new(tx_bytes.clone()))?;

        Ok(Self {
            registry,
            reports,
            cpu_load,
            memory_usage,
            rx_bytes,
            tx_bytes,
        })
    }

    pub fn record_report(&self, kind: ReportKind, outcome: &ReportOutcome) {
        self.reports
            .with_label_values(&[kind.as_str(), outcome.label()])
            .inc();
    }

    /// Stores the host sample carried by a metrics payload.
    pub fn record_sample(&self, sample: &MetricsPayload) {
        self.cpu_load.set(sample.cpu_usage);
        self.memory_usage.set(sample.memory_usage);

        for (name, counters) in &sample.network_interfaces {
            self.rx_bytes
                .with_label_values(&[name.as_str()])
                .set(i64::try_from(counters.rx_bytes).unwrap_or(i64::MAX));
            self.tx_bytes
                .with_label_values(&[name.as_str()])
                .set(i64::try_from(counters.tx_bytes).unwrap_or(i64::MAX));
        }
    }

    /// Renders the registry in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| AgentError::Exporter(e.to_string()))
    }
}

#[cfg(test)]
impl Telemetry {
    /// Number of reports recorded for a kind/outcome pair.
    pub fn report_count(&self, kind: ReportKind, outcome: &str) -> u64 {
        self.reports
            .with_label_values(&[kind.as_str(), outcome])
            .get()
    }
}

pub fn create_routes() -> Router<Arc<Telemetry>> {
    Router::new().route("/metrics", get(metrics))
}

/// GET /metrics
async fn metrics(State(telemetry): State<Arc<Telemetry>>) -> impl IntoResponse {
    match telemetry.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Binds the exporter on all interfaces.
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    TcpListener::bind(addr)
        .await
        .map_err(|e| AgentError::Exporter(format!("Failed to bind {}: {}", addr, e)))
}

/// Serves `/metrics` until the listener fails.
pub async fn serve(listener: TcpListener, telemetry: Arc<Telemetry>) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Prometheus metrics listening on {}", addr);
    }

    let app = Router::new().merge(create_routes()).with_state(telemetry);
    axum::serve(listener, app).await?;
    Ok(())
}
