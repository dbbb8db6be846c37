use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;
use super::protocol::SessionConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub control: ControlConfig,
    /// Optional monitoring session to start before the dashboard runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the detection service, without trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Period of both the status query and the event snapshot query.
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    /// `limit` sent with `GET /events`.
    #[serde(default = "default_event_limit")]
    pub event_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_stream_enabled")]
    pub enabled: bool,
    /// Path of the push endpoint relative to the backend base URL.
    #[serde(default = "default_stream_path")]
    pub path: String,
    /// Ceiling for the reconnect backoff.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Maximum number of events kept in the log.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Whether the dashboard enters live mode (rather than paused) when the
    /// service is first seen active.
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,
}

/// Local operator control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSection {
    /// Send `POST /start` with this session before the dashboard loop.
    #[serde(default)]
    pub auto_start: bool,
    #[serde(flatten)]
    pub session: SessionConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            event_limit: default_event_limit(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: default_stream_enabled(),
            path: default_stream_path(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            auto_refresh: default_auto_refresh(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: default_control_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_event_limit() -> usize {
    200
}

fn default_stream_enabled() -> bool {
    true
}

fn default_stream_path() -> String {
    "/events/stream".to_string()
}

fn default_max_backoff_secs() -> u64 {
    10
}

fn default_capacity() -> usize {
    200
}

fn default_auto_refresh() -> bool {
    true
}

fn default_control_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Clamp values that would otherwise stall timers or empty the log.
    fn normalize(&mut self) {
        self.backend.base_url = self.backend.base_url.trim_end_matches('/').to_string();
        self.backend.request_timeout_secs = self.backend.request_timeout_secs.max(1);
        self.polling.interval_secs = self.polling.interval_secs.max(1);
        self.polling.event_limit = self.polling.event_limit.max(1);
        self.dashboard.capacity = self.dashboard.capacity.max(1);
        self.stream.max_backoff_secs = self.stream.max_backoff_secs.max(1);
        if !self.stream.path.starts_with('/') {
            self.stream.path.insert(0, '/');
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            polling: PollingConfig::default(),
            stream: StreamConfig::default(),
            dashboard: DashboardConfig::default(),
            control: ControlConfig::default(),
            session: None,
        }
    }
}
