//! Controller reporting over HTTP.
//!
//! Payloads are posted as JSON with a short per-request timeout. The
//! response is classified into a [`ReportOutcome`] and logged here; callers
//! never see transport errors as `Err`.

use std::fmt;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::error::Result;
use crate::stats::InterfaceMap;

/// Upper bound on a single controller request.
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(5);

/// The two reports sent on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Heartbeat,
    Metrics,
}

impl ReportKind {
    /// Last path segment of the controller endpoint, also used as a metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Heartbeat => "heartbeat",
            ReportKind::Metrics => "metrics",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPayload {
    pub site_id: String,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
    pub status: &'static str,
}

impl HeartbeatPayload {
    pub fn healthy(site_id: impl Into<String>) -> Self {
        Self {
            site_id: site_id.into(),
            timestamp: epoch_seconds(),
            status: "healthy",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsPayload {
    pub site_id: String,
    pub timestamp: f64,
    /// 1-minute load average. Kept raw; it is not a percentage.
    pub cpu_usage: f64,
    /// Used memory, 0-100.
    pub memory_usage: f64,
    pub network_interfaces: InterfaceMap,
}

/// Current time as fractional Unix seconds.
pub fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Result of one POST to the controller.
#[derive(Debug)]
pub enum ReportOutcome {
    /// Controller answered 200.
    Success,
    /// Controller answered with any other status.
    SoftFailure(StatusCode),
    /// No usable response: refused, timed out, DNS, bad URL.
    HardFailure(reqwest::Error),
}

impl ReportOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ReportOutcome::Success => "success",
            ReportOutcome::SoftFailure(_) => "soft_failure",
            ReportOutcome::HardFailure(_) => "hard_failure",
        }
    }
}

#[cfg(test)]
impl ReportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ReportOutcome::Success)
    }
}

#[derive(Debug, Clone)]
pub struct ReportingClient {
    client: Client,
    base_url: String,
}

impl ReportingClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// `{base}/api/v1/devices/{site_id}/{kind}`
    pub fn endpoint_url(&self, site_id: &str, kind: ReportKind) -> String {
        format!("{}/api/v1/devices/{}/{}", self.base_url, site_id, kind)
    }

    /// Sends `payload` for `site_id` to the endpoint matching `kind`.
    pub async fn report<T: Serialize>(
        &self,
        kind: ReportKind,
        site_id: &str,
        payload: &T,
    ) -> Result<ReportOutcome> {
        let url = self.endpoint_url(site_id, kind);
        self.post(kind, &url, payload, REPORT_TIMEOUT).await
    }

    /// POSTs `payload` as JSON and classifies the response.
    ///
    /// Only a payload that cannot be encoded is returned as `Err`; every
    /// network-side failure becomes an outcome.
    pub async fn post<T: Serialize>(
        &self,
        kind: ReportKind,
        url: &str,
        payload: &T,
        timeout: Duration,
    ) -> Result<ReportOutcome> {
        let body = serde_json::to_vec(payload)?;

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await;

        let outcome = match response {
            Ok(resp) if resp.status() == StatusCode::OK => {
                tracing::debug!("{} sent successfully", kind);
                ReportOutcome::Success
            }
            Ok(resp) => {
                let status = resp.status();
                tracing::warn!("{} failed: {}", kind, status.as_u16());
                ReportOutcome::SoftFailure(status)
            }
            Err(e) => {
                tracing::error!("Failed to send {}: {}", kind, e);
                ReportOutcome::HardFailure(e)
            }
        };

        Ok(outcome)
    }
}
