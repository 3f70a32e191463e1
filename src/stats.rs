//! Host counters read straight from the `/proc` pseudo-files.
//!
//! Every accessor is best-effort: a missing file or an unexpected format
//! yields a zero value instead of an error, so a transient read failure never
//! takes down the polling loop.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub const PROC_LOADAVG: &str = "/proc/loadavg";
pub const PROC_MEMINFO: &str = "/proc/meminfo";
pub const PROC_NET_DEV: &str = "/proc/net/dev";

/// Byte counters for one network interface since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterfaceCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

pub type InterfaceMap = BTreeMap<String, InterfaceCounters>;

/// Reads load average, memory and network counters from fixed source paths.
#[derive(Debug, Clone)]
pub struct SystemStatsReader {
    loadavg: PathBuf,
    meminfo: PathBuf,
    net_dev: PathBuf,
}

impl Default for SystemStatsReader {
    fn default() -> Self {
        Self::new(PROC_LOADAVG, PROC_MEMINFO, PROC_NET_DEV)
    }
}

impl SystemStatsReader {
    pub fn new(
        loadavg: impl Into<PathBuf>,
        meminfo: impl Into<PathBuf>,
        net_dev: impl Into<PathBuf>,
    ) -> Self {
        Self {
            loadavg: loadavg.into(),
            meminfo: meminfo.into(),
            net_dev: net_dev.into(),
        }
    }

    /// 1-minute load average. This is a raw load value, not a percentage.
    pub fn cpu_load(&self) -> f64 {
        read_source(&self.loadavg)
            .and_then(|content| parse_load_average(&content))
            .unwrap_or(0.0)
    }

    /// Used memory as a percentage of total, from `MemTotal` and `MemAvailable`.
    pub fn memory_usage_percent(&self) -> f64 {
        read_source(&self.meminfo)
            .and_then(|content| parse_memory_usage(&content))
            .unwrap_or(0.0)
    }

    /// Per-interface receive/transmit byte counters.
    pub fn network_interfaces(&self) -> InterfaceMap {
        read_source(&self.net_dev)
            .and_then(|content| parse_net_dev(&content))
            .unwrap_or_default()
    }
}

fn read_source(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(e) => {
            tracing::debug!("Failed to read {}: {}", path.display(), e);
            None
        }
    }
}

/// First field of `/proc/loadavg`. `NaN` and infinities are rejected.
fn parse_load_average(content: &str) -> Option<f64> {
    content
        .split_whitespace()
        .next()?
        .parse::<f64>()
        .ok()
        .filter(|load| load.is_finite())
}

/// `/proc/meminfo` lists `MemTotal` on line 1 and `MemAvailable` on line 3,
/// both as `<name>: <value> kB`. Counters are unsigned; a negative value is
/// a parse failure.
fn parse_memory_usage(content: &str) -> Option<f64> {
    let lines: Vec<&str> = content.lines().collect();
    let field = |idx: usize| -> Option<u64> {
        lines.get(idx)?.split_whitespace().nth(1)?.parse().ok()
    };

    let total = field(0)?;
    let available = field(2)?;
    if total == 0 {
        return None;
    }

    let (total, available) = (total as f64, available as f64);
    Some((total - available) / total * 100.0)
}

/// `/proc/net/dev` has two header lines, then one line per interface:
/// `name: rx_bytes rx_packets ... (8 receive fields) tx_bytes ...`.
/// Lines with fewer than 10 fields are skipped; a malformed counter
/// invalidates the whole read.
fn parse_net_dev(content: &str) -> Option<InterfaceMap> {
    let mut interfaces = InterfaceMap::new();

    for line in content.lines().skip(2) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 10 {
            continue;
        }

        let name = parts[0].trim_end_matches(':');
        let rx_bytes = parts[1].parse().ok()?;
        let tx_bytes = parts[9].parse().ok()?;

        interfaces.insert(name.to_string(), InterfaceCounters { rx_bytes, tx_bytes });
    }

    Some(interfaces)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET_DEV_HEADER: &str = "Inter-|   Receive                                                |  Transmit\n face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n";

    const MEMINFO: &str = "MemTotal:        1000 kB\nMemFree:          200 kB\nMemAvailable:     400 kB\nBuffers:           10 kB\n";

    struct Fixture {
        dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
            }
        }

        fn write(&self, name: &str, content: &str) -> &Self {
            std::fs::write(self.dir.path().join(name), content).unwrap();
            self
        }

        fn reader(&self) -> SystemStatsReader {
            SystemStatsReader::new(
                self.dir.path().join("loadavg"),
                self.dir.path().join("meminfo"),
                self.dir.path().join("net_dev"),
            )
        }
    }

    #[test]
    fn test_cpu_load_reads_first_field() {
        let fixture = Fixture::new();
        fixture.write("loadavg", "0.42 0.30 0.25 1/123 4567\n");
        assert_eq!(fixture.reader().cpu_load(), 0.42);
    }

    #[test]
    fn test_cpu_load_fallbacks() {
        let fixture = Fixture::new();
        assert_eq!(fixture.reader().cpu_load(), 0.0);

        fixture.write("loadavg", "");
        assert_eq!(fixture.reader().cpu_load(), 0.0);

        fixture.write("loadavg", "busy 0.3 0.2\n");
        assert_eq!(fixture.reader().cpu_load(), 0.0);
    }

    #[test]
    fn test_cpu_load_rejects_non_finite() {
        let fixture = Fixture::new();
        for content in ["NaN 0.1 0.1 1/1 1\n", "inf 0.1 0.1 1/1 1\n", "-inf\n"] {
            fixture.write("loadavg", content);
            assert_eq!(fixture.reader().cpu_load(), 0.0, "content: {:?}", content);
        }
    }

    #[test]
    fn test_memory_usage_percent() {
        let fixture = Fixture::new();
        fixture.write("meminfo", MEMINFO);
        assert_eq!(fixture.reader().memory_usage_percent(), 60.0);
    }

    #[test]
    fn test_memory_usage_fallbacks() {
        let fixture = Fixture::new();
        assert_eq!(fixture.reader().memory_usage_percent(), 0.0);

        fixture.write("meminfo", "MemTotal: 0 kB\nMemFree: 0 kB\nMemAvailable: 0 kB\n");
        assert_eq!(fixture.reader().memory_usage_percent(), 0.0);

        fixture.write("meminfo", "MemTotal: lots kB\nMemFree: 0 kB\nMemAvailable: 0 kB\n");
        assert_eq!(fixture.reader().memory_usage_percent(), 0.0);

        fixture.write("meminfo", "MemTotal: 1000 kB\n");
        assert_eq!(fixture.reader().memory_usage_percent(), 0.0);
    }

    #[test]
    fn test_memory_usage_out_of_range_counters() {
        let fixture = Fixture::new();

        fixture.write(
            "meminfo",
            "MemTotal: 1 kB\nMemFree: 0 kB\nMemAvailable: -9223372036854775808 kB\n",
        );
        assert_eq!(fixture.reader().memory_usage_percent(), 0.0);

        fixture.write("meminfo", "MemTotal: -1000 kB\nMemFree: 0 kB\nMemAvailable: 400 kB\n");
        assert_eq!(fixture.reader().memory_usage_percent(), 0.0);

        fixture.write(
            "meminfo",
            "MemTotal: 99999999999999999999 kB\nMemFree: 0 kB\nMemAvailable: 0 kB\n",
        );
        assert_eq!(fixture.reader().memory_usage_percent(), 0.0);
    }

    #[test]
    fn test_memory_usage_large_counters() {
        let fixture = Fixture::new();
        fixture.write(
            "meminfo",
            "MemTotal: 18446744073709551615 kB\nMemFree: 0 kB\nMemAvailable: 0 kB\n",
        );
        assert_eq!(fixture.reader().memory_usage_percent(), 100.0);
    }

    #[test]
    fn test_network_interfaces() {
        let fixture = Fixture::new();
        fixture.write(
            "net_dev",
            &format!("{}eth0: 100 0 0 0 0 0 0 0 500 0 0 0 0 0 0 0\n", NET_DEV_HEADER),
        );

        let interfaces = fixture.reader().network_interfaces();
        assert_eq!(interfaces.len(), 1);
        assert_eq!(
            interfaces["eth0"],
            InterfaceCounters {
                rx_bytes: 100,
                tx_bytes: 500
            }
        );
    }

    #[test]
    fn test_network_interfaces_skips_short_lines() {
        let fixture = Fixture::new();
        fixture.write(
            "net_dev",
            &format!(
                "{}    lo: 2048 10 0 0 0 0 0 0 2048 10 0 0 0 0 0 0\n  bogus: 1 2 3\nwlan0: 7 0 0 0 0 0 0 0 9 0\n",
                NET_DEV_HEADER
            ),
        );

        let interfaces = fixture.reader().network_interfaces();
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces["lo"].rx_bytes, 2048);
        assert_eq!(interfaces["wlan0"].tx_bytes, 9);
        assert!(!interfaces.contains_key("bogus"));
    }

    #[test]
    fn test_network_interfaces_missing_source() {
        let fixture = Fixture::new();
        assert!(fixture.reader().network_interfaces().is_empty());
    }

    #[test]
    fn test_network_interfaces_malformed_counter() {
        let fixture = Fixture::new();
        fixture.write(
            "net_dev",
            &format!(
                "{}eth0: 100 0 0 0 0 0 0 0 500 0\neth1: x 0 0 0 0 0 0 0 500 0\n",
                NET_DEV_HEADER
            ),
        );
        assert!(fixture.reader().network_interfaces().is_empty());
    }

    #[test]
    fn test_interface_counters_serialization() {
        let counters = InterfaceCounters {
            rx_bytes: 100,
            tx_bytes: 500,
        };
        let json = serde_json::to_value(counters).unwrap();
        assert_eq!(json, serde_json::json!({"rx_bytes": 100, "tx_bytes": 500}));
    }
}
