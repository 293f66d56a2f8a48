//! Configuration for wealthsimple-realtime

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file location
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wealthsimple-realtime")
        .join("config.toml")
}

/// Connection configuration for the subscription endpoint.
///
/// The bearer credential is not part of the config; it is supplied by the
/// caller when the client is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Candidate WebSocket endpoints, tried in order
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Value of the `x-ws-api-version` marker
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Value of the `x-ws-locale` marker
    #[serde(default = "default_locale")]
    pub locale: String,

    /// Value of the `x-ws-profile` marker
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Value of the `x-platform-os` marker
    #[serde(default = "default_platform_os")]
    pub platform_os: String,

    /// `Origin` header sent with the upgrade request
    #[serde(default = "default_origin")]
    pub origin: String,

    /// `User-Agent` header sent with the upgrade request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Device identifier sent in `connection_init` (random when unset)
    #[serde(default)]
    pub device_id: Option<String>,

    /// Bound on opening one candidate endpoint
    #[serde(default = "default_open_timeout")]
    pub open_timeout_secs: u64,

    /// Bound on the closing handshake
    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,

    /// How long to wait for `connection_ack` before proceeding anyway
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,
}

fn default_endpoints() -> Vec<String> {
    vec![
        "wss://realtime-api.wealthsimple.com/subscription".to_string(),
        "wss://my.wealthsimple.com/graphql".to_string(),
        "wss://my.wealthsimple.com/subscriptions".to_string(),
        "wss://my.wealthsimple.com/subscription".to_string(),
    ]
}

fn default_api_version() -> String {
    "12".to_string()
}

fn default_locale() -> String {
    "en-CA".to_string()
}

fn default_profile() -> String {
    "trade".to_string()
}

fn default_platform_os() -> String {
    "web".to_string()
}

fn default_origin() -> String {
    "https://my.wealthsimple.com".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/26.0 Safari/605.1.15"
        .to_string()
}

fn default_open_timeout() -> u64 {
    20
}

fn default_close_timeout() -> u64 {
    10
}

fn default_ack_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            api_version: default_api_version(),
            locale: default_locale(),
            profile: default_profile(),
            platform_os: default_platform_os(),
            origin: default_origin(),
            user_agent: default_user_agent(),
            device_id: None,
            open_timeout_secs: default_open_timeout(),
            close_timeout_secs: default_close_timeout(),
            ack_timeout_secs: default_ack_timeout(),
        }
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
    }

    /// Apply `WS_ENDPOINTS` and `WS_DEVICE_ID` overrides from the environment.
    pub fn apply_env(&mut self) {
        if let Ok(endpoints) = std::env::var("WS_ENDPOINTS") {
            let parsed = split_csv(&endpoints);
            if !parsed.is_empty() {
                self.endpoints = parsed;
            }
        }
        if let Ok(device_id) = std::env::var("WS_DEVICE_ID") {
            if !device_id.is_empty() {
                self.device_id = Some(device_id);
            }
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
