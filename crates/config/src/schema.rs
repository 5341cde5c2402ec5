/// Config schema types (database, log sources, correlation windows, completion sinks).
use std::{net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    pub database: DatabaseConfig,
    pub logs: LogsConfig,
    pub correlation: CorrelationConfig,
    pub connections: ConnectionsConfig,
    pub completion: CompletionConfig,
    pub metrics: MetricsConfig,
}

/// SQLite database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the SQLite file. Defaults to `<data_dir>/gatekeeper.db`.
    pub path: Option<PathBuf>,
}

/// One log category written by the game server as daily files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogSourceConfig {
    /// Reader name used in logs and cursor bookkeeping, e.g. "login".
    pub name: String,
    /// Directory holding `<prefix>_<YYYY-MM-DD>.log` files.
    pub directory: PathBuf,
    /// File name prefix, e.g. "login".
    pub prefix: String,
}

/// Log tailing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub sources: Vec<LogSourceConfig>,
    /// Delay between two polls of the same file.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Delay between existence checks while a file has not been created yet.
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    /// Wake readers early on filesystem notifications (needs the
    /// `file-watcher` feature; interval polling still runs).
    #[serde(default = "default_true")]
    pub watch: bool,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            poll_interval_ms: default_poll_interval_ms(),
            probe_interval_ms: default_probe_interval_ms(),
            watch: true,
        }
    }
}

impl LogsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_probe_interval_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

/// Time windows used by the session-id correlator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Recency window of the recent-IP strategy.
    #[serde(default = "default_recent_window_secs")]
    pub recent_window_secs: u64,
    /// Window in which a sole awaiting candidate is accepted.
    #[serde(default = "default_sole_candidate_window_secs")]
    pub sole_candidate_window_secs: u64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            recent_window_secs: default_recent_window_secs(),
            sole_candidate_window_secs: default_sole_candidate_window_secs(),
        }
    }
}

fn default_recent_window_secs() -> u64 {
    10 * 60
}

fn default_sole_candidate_window_secs() -> u64 {
    30 * 60
}

/// Transient connection bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionsConfig {
    #[serde(default = "default_connection_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_connection_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_connection_ttl_secs() -> u64 {
    5 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

/// Targets of the one-time completion sequence.
///
/// Unset URLs fall back to a sink that only logs the completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Whitelist file the game server reads (one account id per line).
    pub access_list_path: Option<PathBuf>,
    pub role_grant_url: Option<String>,
    pub reward_url: Option<String>,
    pub notify_url: Option<String>,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            access_list_path: None,
            role_grant_url: None,
            reward_url: None,
            notify_url: None,
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

fn default_completion_timeout_secs() -> u64 {
    10
}

/// Prometheus exporter (binary built with the `metrics` feature).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Address of the `/metrics` HTTP listener, e.g. `127.0.0.1:9464`.
    pub listen: Option<SocketAddr>,
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: GatekeeperConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.logs.poll_interval_ms, 1_000);
        assert_eq!(cfg.logs.probe_interval_ms, 5_000);
        assert_eq!(cfg.correlation.recent_window_secs, 600);
        assert_eq!(cfg.correlation.sole_candidate_window_secs, 1_800);
        assert_eq!(cfg.connections.ttl_secs, 300);
        assert!(cfg.logs.sources.is_empty());
        assert!(!cfg.metrics.enabled);
    }

    #[test]
    fn parses_sources_and_partial_sections() {
        let cfg: GatekeeperConfig = toml::from_str(
            r#"
            [logs]
            poll_interval_ms = 250

            [[logs.sources]]
            name = "login"
            directory = "/srv/game/logs"
            prefix = "login"

            [completion]
            notify_url = "http://localhost:9000/hooks/complete"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.logs.poll_interval(), Duration::from_millis(250));
        assert_eq!(cfg.logs.probe_interval_ms, 5_000);
        assert_eq!(cfg.logs.sources.len(), 1);
        assert_eq!(cfg.logs.sources[0].prefix, "login");
        assert_eq!(cfg.completion.timeout_secs, 10);
        assert!(cfg.completion.role_grant_url.is_none());
    }
}
