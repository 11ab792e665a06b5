use crate::error::{ConfigError, TelemetryError};
use crate::latency::HeartbeatCadence;
use crate::retry::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Ex: "wss://dashboard.example.com"
    pub base_url: String,
    pub monitor_endpoint: String,
    /// Période d'échantillonnage demandée à l'agent (query `interval`)
    pub interval_secs: u64,
    pub heartbeat_interval_ms: u64,
    pub background_floor_ms: u64,
    pub connect_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
    pub history_len: usize,
    /// Variable d'environnement contenant le bearer token
    pub token_env: String,
    /// Serveurs suivis par le binaire termhub-monitor
    pub servers: Vec<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://localhost:8080".into(),
            monitor_endpoint: "ws/monitor".into(),
            interval_secs: 3,
            heartbeat_interval_ms: 5_000,
            background_floor_ms: 30_000,
            connect_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
            history_len: 10,
            token_env: "TERMHUB_TOKEN".into(),
            servers: Vec::new(),
        }
    }
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url cannot be empty".into()));
        }
        Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url {:?}: {}", self.base_url, e)))?;
        if self.interval_secs == 0 {
            return Err(ConfigError::Invalid("interval_secs must be > 0".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat_interval_ms must be > 0".into()));
        }
        if self.history_len == 0 {
            return Err(ConfigError::Invalid("history_len must be > 0".into()));
        }
        for server in &self.servers {
            validate_server_id(server)?;
        }
        Ok(())
    }

    pub fn cadence(&self) -> HeartbeatCadence {
        HeartbeatCadence::new(
            Duration::from_millis(self.heartbeat_interval_ms),
            Duration::from_millis(self.background_floor_ms),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// `<base_url>/<monitor_endpoint>/<server_id>?interval=<secs>`
    pub fn monitor_url(&self, server_id: &str) -> Result<Url, ConfigError> {
        validate_server_id(server_id)?;
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url {:?}: {}", self.base_url, e)))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ConfigError::Invalid(format!("base_url {:?} cannot be a base", self.base_url)))?;
            segments.pop_if_empty();
            for part in self.monitor_endpoint.split('/').filter(|p| !p.is_empty()) {
                segments.push(part);
            }
            segments.push(server_id);
        }
        url.query_pairs_mut()
            .clear()
            .append_pair("interval", &self.interval_secs.to_string());
        Ok(url)
    }
}

/// Identifiant non vide, ASCII alphanumérique plus `-`, `_`, `.`
pub fn validate_server_id(server_id: &str) -> Result<(), ConfigError> {
    let valid = !server_id.is_empty()
        && server_id.len() <= 128
        && server_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidServerId(server_id.to_string()))
    }
}

pub async fn load_config() -> TelemetryConfig {
    let path = std::env::var("TERMHUB_TELEMETRY_CONFIG").unwrap_or_else(|_| "telemetry.yaml".into());
    match load_config_from(&path).await {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("[config] invalid config {}: {}, using defaults", path, e);
            TelemetryConfig::default()
        }
    }
}

pub async fn load_config_from<P: AsRef<Path>>(path: P) -> Result<TelemetryConfig, TelemetryError> {
    let path = path.as_ref();
    if !path.exists() {
        info!("[config] no {}, using default config", path.display());
        return Ok(TelemetryConfig::default());
    }
    let txt = fs::read_to_string(path).await?;
    if txt.trim().is_empty() {
        return Ok(TelemetryConfig::default());
    }
    let cfg: TelemetryConfig = serde_yaml::from_str(&txt)?;
    cfg.validate()?;
    Ok(cfg)
}
