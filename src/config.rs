//! Configuration for the quorumd daemon.
//!
//! A config file has three sections: `[node]` (identity and membership),
//! `[timing]` (the engine's intervals, in milliseconds) and `[logging]`.
//! Every field has a default, so a missing file falls back to a runnable
//! testbed configuration on loopback addresses.

use serde::{Deserialize, Serialize};
use std::fs;
use tokio::time::Duration;

use crate::error::Error;

/// Base port for the deterministic per-user port scheme.
const PORT_BASE: i64 = 20000;
/// Port spacing between co-tenant users on one host.
const PORT_STRIDE: i64 = 50;
/// First regular (non-system) uid on the deployment hosts.
const FIRST_USER_UID: i64 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address this peer binds and identifies itself by.
    #[serde(default = "default_ip")]
    pub ip: String,
    /// The configured membership. Quorum is computed against the size of
    /// this list, never against the currently reachable subset.
    #[serde(default = "default_server_list")]
    pub server_list: Vec<String>,
    /// Explicit listen port. When absent the port is derived from the
    /// operating-system user id so co-tenants on one host do not collide.
    #[serde(default)]
    pub port: Option<u16>,
}

fn default_ip() -> String {
    "127.0.0.7".to_string()
}

fn default_server_list() -> Vec<String> {
    vec![
        "127.0.0.7".to_string(),
        "127.0.0.8".to_string(),
        "127.0.0.9".to_string(),
    ]
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            server_list: default_server_list(),
            port: None,
        }
    }
}

impl NodeConfig {
    /// Resolve the listen port: the configured override, or the uid-derived
    /// default (`20000 + (uid - 1000) * 50`).
    pub fn resolve_port(&self) -> Result<u16, Error> {
        match self.port {
            Some(port) => Ok(port),
            None => derive_port(),
        }
    }
}

/// Compute the per-user default port from the OS user id.
pub fn derive_port() -> Result<u16, Error> {
    let output = std::process::Command::new("id")
        .arg("-u")
        .output()
        .map_err(|e| Error::PortDerivation(e.to_string()))?;
    let uid: i64 = String::from_utf8_lossy(&output.stdout)
        .trim()
        .parse()
        .map_err(|_| Error::PortDerivation("`id -u` did not print a number".to_string()))?;
    let port = PORT_BASE + (uid - FIRST_USER_UID) * PORT_STRIDE;
    u16::try_from(port).map_err(|_| {
        Error::PortDerivation(format!(
            "uid {} maps to port {} which is out of range; set [node] port explicitly",
            uid, port
        ))
    })
}

/// Engine intervals. Millisecond granularity so test deployments can run
/// the whole state machine in well under a second per transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Dwell before each discovery round, giving co-starting peers time to
    /// come up and become reachable.
    #[serde(default = "default_discovery_dwell_ms")]
    pub discovery_dwell_ms: u64,
    /// How long a candidate collects votes, and how long discovery waits
    /// for the rest of the network to finish probing us.
    #[serde(default = "default_vote_timeout_ms")]
    pub vote_timeout_ms: u64,
    /// Poll interval of the vote collector between dedup passes.
    #[serde(default = "default_vote_poll_ms")]
    pub vote_poll_ms: u64,
    /// Poll interval while waiting for inbound master queries.
    #[serde(default = "default_request_poll_ms")]
    pub request_poll_ms: u64,
    /// Follower-to-master ping interval.
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// The master's presence-sweep window.
    #[serde(default = "default_ping_window_ms")]
    pub ping_window_ms: u64,
    /// Discovery rounds allowed below quorum before giving up.
    #[serde(default = "default_max_discovery_attempts")]
    pub max_discovery_attempts: u32,
}

fn default_discovery_dwell_ms() -> u64 {
    10_000
}
fn default_vote_timeout_ms() -> u64 {
    20_000
}
fn default_vote_poll_ms() -> u64 {
    1_000
}
fn default_request_poll_ms() -> u64 {
    5_000
}
fn default_ping_interval_ms() -> u64 {
    6_000
}
fn default_ping_window_ms() -> u64 {
    15_000
}
fn default_max_discovery_attempts() -> u32 {
    3
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            discovery_dwell_ms: default_discovery_dwell_ms(),
            vote_timeout_ms: default_vote_timeout_ms(),
            vote_poll_ms: default_vote_poll_ms(),
            request_poll_ms: default_request_poll_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_window_ms: default_ping_window_ms(),
            max_discovery_attempts: default_max_discovery_attempts(),
        }
    }
}

impl TimingConfig {
    pub fn discovery_dwell(&self) -> Duration {
        Duration::from_millis(self.discovery_dwell_ms)
    }
    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }
    pub fn vote_poll(&self) -> Duration {
        Duration::from_millis(self.vote_poll_ms)
    }
    pub fn request_poll(&self) -> Duration {
        Duration::from_millis(self.request_poll_ms)
    }
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
    pub fn ping_window(&self) -> Duration {
        Duration::from_millis(self.ping_window_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "debug".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn save_to_file(&self, path: &str) -> Result<(), Error> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &str) -> Result<Self, Error> {
        if std::path::Path::new(path).exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_form_a_three_peer_testbed() {
        let config = Config::default();
        assert_eq!(config.node.server_list.len(), 3);
        assert!(config.node.server_list.contains(&config.node.ip));
        assert_eq!(config.timing.max_discovery_attempts, 3);
    }

    #[test]
    fn roundtrip_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quorumd.toml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.node.ip = "10.0.0.4".to_string();
        config.node.port = Some(26450);
        config.timing.ping_window_ms = 500;
        config.save_to_file(path).unwrap();

        let loaded = Config::load_from_file(path).unwrap();
        assert_eq!(loaded.node.ip, "10.0.0.4");
        assert_eq!(loaded.node.resolve_port().unwrap(), 26450);
        assert_eq!(loaded.timing.ping_window(), Duration::from_millis(500));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = toml::from_str("[node]\nip = \"127.0.0.9\"\n").unwrap();
        assert_eq!(config.node.ip, "127.0.0.9");
        assert_eq!(config.timing.vote_timeout_ms, 20_000);
        assert_eq!(config.logging.level, "debug");
    }
}
