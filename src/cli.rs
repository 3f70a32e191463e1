use std::path::PathBuf;

use clap::Parser;

use crate::config::EffectiveConfig;

/// Command-line flags. Any flag given overrides the config file and the
/// environment.
#[derive(Parser, Debug)]
#[command(name = "device-agent")]
#[command(version)]
#[command(about = "SD-WAN device agent")]
#[command(long_about = "Reports heartbeat and host telemetry to the SD-WAN controller.\n\nConfiguration is read from built-in defaults, then the YAML config file, then SITE_ID, CONTROLLER_ENDPOINT, LOG_LEVEL, METRICS_INTERVAL and PROMETHEUS_PORT.")]
pub struct Cli {
    /// Configuration file path (default: $CONFIG_FILE or /app/config/config.yml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Controller endpoint, e.g. http://controller:8080
    #[arg(long)]
    pub controller: Option<String>,

    /// Site identifier
    #[arg(long)]
    pub site_id: Option<String>,

    /// Log level (DEBUG, INFO, WARNING, ERROR)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Prometheus metrics port
    #[arg(long)]
    pub metrics_port: Option<u16>,
}

impl Cli {
    pub fn apply(&self, config: &mut EffectiveConfig) {
        if let Some(controller) = &self.controller {
            config.controller_endpoint = controller.clone();
        }
        if let Some(site_id) = &self.site_id {
            config.site_id = site_id.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(port) = self.metrics_port {
            config.prometheus_port = i64::from(port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_leaves_config_untouched() {
        let cli = Cli::try_parse_from(["device-agent"]).unwrap();
        let mut config = EffectiveConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, EffectiveConfig::default());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "device-agent",
            "--config",
            "/etc/agent.yml",
            "--controller",
            "http://controller:9000",
            "--site-id",
            "branch-3",
            "--log-level",
            "debug",
            "--metrics-port",
            "9200",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/agent.yml")));

        let mut config = EffectiveConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.controller_endpoint, "http://controller:9000");
        assert_eq!(config.site_id, "branch-3");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.prometheus_port, 9200);
        assert_eq!(config.metrics_interval, 30);
    }

    #[test]
    fn test_invalid_port_rejected() {
        assert!(Cli::try_parse_from(["device-agent", "--metrics-port", "70000"]).is_err());
    }
}
