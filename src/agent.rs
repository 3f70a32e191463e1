//! The polling loop.
//!
//! Each tick sends a heartbeat, then samples the host and sends a metrics
//! report, then sleeps for `metrics_interval`. Report and sampling failures
//! are logged and never end the loop; any other error returned by a tick is
//! fatal and propagates out of [`AgentLoop::start`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::EffectiveConfig;
use crate::error::Result;
use crate::exporter::Telemetry;
use crate::reporter::{
    epoch_seconds, HeartbeatPayload, MetricsPayload, ReportKind, ReportOutcome, ReportingClient,
};
use crate::stats::SystemStatsReader;

/// Stops a running [`AgentLoop`] from another task.
///
/// The loop notices at its next iteration boundary; an in-flight request or
/// sleep is not interrupted.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        tracing::info!("Stopping device agent");
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct AgentLoop {
    config: EffectiveConfig,
    client: ReportingClient,
    stats: SystemStatsReader,
    telemetry: Arc<Telemetry>,
    running: Arc<AtomicBool>,
}

impl AgentLoop {
    pub fn new(config: EffectiveConfig, telemetry: Arc<Telemetry>) -> Result<Self> {
        let client = ReportingClient::new(&config.controller_endpoint)?;

        Ok(Self {
            config,
            client,
            stats: SystemStatsReader::default(),
            telemetry,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
        }
    }

    pub fn stop(&self) {
        self.stop_handle().stop();
    }

    /// Runs ticks until stopped. Returns immediately if already running.
    pub async fn start(&self) -> Result<()> {
        self.run_ticks(|| self.tick()).await
    }

    async fn run_ticks<F, Fut>(&self, mut tick: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::debug!("Device agent already running");
            return Ok(());
        }

        tracing::info!(
            "Starting SD-WAN Device Agent for site: {}",
            self.config.site_id
        );
        let interval = self.config.poll_interval();

        while self.is_running() {
            if let Err(e) = tick().await {
                tracing::error!("Device agent error: {}", e);
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }

            if interval.is_zero() {
                // Still yield so a pending interrupt can be observed.
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(interval).await;
            }
        }

        tracing::info!("Device agent stopped");
        Ok(())
    }

    /// One heartbeat followed by one metrics report.
    pub async fn tick(&self) -> Result<()> {
        self.send_heartbeat().await?;
        self.collect_metrics().await?;
        Ok(())
    }

    async fn send_heartbeat(&self) -> Result<ReportOutcome> {
        let payload = HeartbeatPayload::healthy(&self.config.site_id);
        self.report(ReportKind::Heartbeat, &payload).await
    }

    async fn collect_metrics(&self) -> Result<ReportOutcome> {
        let sample = self.sample();
        self.telemetry.record_sample(&sample);
        self.report(ReportKind::Metrics, &sample).await
    }

    async fn report<T: serde::Serialize>(
        &self,
        kind: ReportKind,
        payload: &T,
    ) -> Result<ReportOutcome> {
        let outcome = self
            .client
            .report(kind, &self.config.site_id, payload)
            .await?;
        self.telemetry.record_report(kind, &outcome);
        Ok(outcome)
    }

    /// Reads the host counters into a fresh metrics payload.
    pub fn sample(&self) -> MetricsPayload {
        MetricsPayload {
            site_id: self.config.site_id.clone(),
            timestamp: epoch_seconds(),
            cpu_usage: self.stats.cpu_load(),
            memory_usage: self.stats.memory_usage_percent(),
            network_interfaces: self.stats.network_interfaces(),
        }
    }
}

#[cfg(test)]
impl AgentLoop {
    pub fn with_stats_reader(mut self, stats: SystemStatsReader) -> Self {
        self.stats = stats;
        self
    }
}
