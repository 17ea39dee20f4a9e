//! Load config from file and environment.

use conservify_core::ClientConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Host transport configuration. File: ~/.config/conservify/config.toml or /etc/conservify/config.toml.
/// Env overrides: CONSERVIFY_DISCOVERY_PORT, CONSERVIFY_SERVICE_PORT, CONSERVIFY_CONNECT_TIMEOUT,
/// CONSERVIFY_DEFAULT_TIMEOUT (seconds).
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery UDP port (default 54321).
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    /// Discovery multicast group (default 239.255.54.54).
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,
    /// Port advertised for our own service (default 80).
    #[serde(default = "default_service_port")]
    pub service_port: u16,
    #[serde(default = "default_announce_interval_secs")]
    pub announce_interval_secs: u64,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default)]
    pub client: ClientConfig,
}

fn default_discovery_port() -> u16 {
    54321
}
fn default_multicast_group() -> String {
    "239.255.54.54".to_string()
}
fn default_service_port() -> u16 {
    80
}
fn default_announce_interval_secs() -> u64 {
    4
}
fn default_connection_timeout_secs() -> u64 {
    10
}
fn default_default_timeout_secs() -> u64 {
    60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_port: default_discovery_port(),
            multicast_group: default_multicast_group(),
            service_port: default_service_port(),
            announce_interval_secs: default_announce_interval_secs(),
            connection_timeout_secs: default_connection_timeout_secs(),
            default_timeout_secs: default_default_timeout_secs(),
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs.max(1))
    }

    /// Services not heard from for this long are reported lost.
    pub fn service_timeout(&self) -> Duration {
        self.announce_interval() * 4
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    apply_env(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(p) = var("CONSERVIFY_DISCOVERY_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.discovery_port = p;
    }
    if let Some(p) = var("CONSERVIFY_SERVICE_PORT").and_then(|s| s.parse::<u16>().ok()) {
        c.service_port = p;
    }
    if let Some(t) = var("CONSERVIFY_CONNECT_TIMEOUT").and_then(|s| s.parse::<u64>().ok()) {
        c.connection_timeout_secs = t;
    }
    if let Some(t) = var("CONSERVIFY_DEFAULT_TIMEOUT").and_then(|s| s.parse::<u64>().ok()) {
        c.default_timeout_secs = t;
    }
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/conservify/config.toml"));
    }
    out.push(PathBuf::from("/etc/conservify/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p).map(|s| toml::from_str::<Config>(&s)) {
                Ok(Ok(c)) => return Some(c),
                Ok(Err(e)) => tracing::warn!(path = %p.display(), error = %e, "invalid config; using defaults"),
                Err(e) => tracing::warn!(path = %p.display(), error = %e, "unreadable config; using defaults"),
            }
            break;
        }
    }
    None
}
