//! Layered configuration: CLI/env > TOML file > built-in default, the same
//! priority scheme as the ecosystem's other daemon-style config loaders.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_LOG: &str = "info";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_AUTH_SETTLE_MS: u64 = 200;
const DEFAULT_STATUS_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_CRITICAL_RETRY_BASE_MS: u64 = 2000;
const DEFAULT_CRITICAL_RETRY_ATTEMPTS: u32 = 3;

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var > TOML > built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// Log level filter string, e.g. "debug", "info,ypsopump_core=trace".
    log: Option<String>,
    /// Base URL of the key-exchange relay, e.g. "https://relay.example.com".
    relay_url: Option<String>,
    /// Status-polling interval, in seconds (spec §4.7: "every 60 s").
    poll_interval_secs: Option<u64>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

/// Inter-step delays and retry cadences baked into the BLE protocol and
/// controller layers (spec §4.6, §4.7, §5). Broken out so tests can shrink
/// them instead of waiting on real-world timings.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub auth_settle_ms: u64,
    pub status_retry_delay_ms: u64,
    pub critical_retry_base_ms: u64,
    pub critical_retry_attempts: u32,
    pub poll_interval_secs: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            auth_settle_ms: DEFAULT_AUTH_SETTLE_MS,
            status_retry_delay_ms: DEFAULT_STATUS_RETRY_DELAY_MS,
            critical_retry_base_ms: DEFAULT_CRITICAL_RETRY_BASE_MS,
            critical_retry_attempts: DEFAULT_CRITICAL_RETRY_ATTEMPTS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PumpConfig {
    pub data_dir: PathBuf,
    pub log: String,
    /// Base URL of the key-exchange relay; `None` until pairing configures
    /// it (spec §4.7 step 1: "ensure relay URL is configured... otherwise
    /// signal NeedsKeyExchange").
    pub relay_url: Option<String>,
    pub timings: Timings,
}

impl PumpConfig {
    /// Build config from CLI/env args plus an optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(data_dir: Option<PathBuf>, log: Option<String>, relay_url: Option<String>) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let toml = load_toml(&data_dir).unwrap_or_default();

        let log = log.or(toml.log).unwrap_or_else(|| DEFAULT_LOG.to_string());

        let relay_url = std::env::var("YPSOPUMP_RELAY_URL")
            .ok()
            .or(relay_url)
            .or(toml.relay_url);

        let mut timings = Timings::default();
        if let Some(secs) = toml.poll_interval_secs {
            timings.poll_interval_secs = secs;
        }

        Self {
            data_dir,
            log,
            relay_url,
            timings,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("ypsopump-core");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("ypsopump-core");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("ypsopump-core");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("ypsopump-core");
        }
    }
    PathBuf::from(".ypsopump-core")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_configured() {
        std::env::remove_var("YPSOPUMP_RELAY_URL");
        let cfg = PumpConfig::new(Some(PathBuf::from("/tmp/ypsopump-core-test-defaults")), None, None);
        assert_eq!(cfg.log, "info");
        assert_eq!(cfg.timings.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
    }

    #[test]
    fn explicit_relay_url_overrides_default() {
        std::env::remove_var("YPSOPUMP_RELAY_URL");
        let cfg = PumpConfig::new(
            Some(PathBuf::from("/tmp/ypsopump-core-test-relay")),
            None,
            Some("https://relay.example.com".to_string()),
        );
        assert_eq!(cfg.relay_url.as_deref(), Some("https://relay.example.com"));
    }
}
