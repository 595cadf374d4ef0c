// Client configuration loaded from config/client and POWER_MONITOR__* variables
use crate::application::history_service::DEFAULT_HISTORY_POINTS;
use crate::domain::rolling_window::DEFAULT_WINDOW_CAPACITY;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_HOST: &str = "192.168.50.92";
pub const DEFAULT_PORT: u16 = 8080;
const ENV_PREFIX: &str = "POWER_MONITOR";

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub server: ServerSettings,
    pub http: HttpSettings,
    pub stream: StreamSettings,
    pub session: SessionSettings,
    pub credentials: CredentialSettings,
    pub account: Option<AccountSettings>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerSettings {
    /// Parse `host:port`, optionally wrapped as `http://host:port/`.
    pub fn from_address(address: &str) -> anyhow::Result<Self> {
        let trimmed = address.trim();
        let trimmed = trimmed.strip_prefix("http://").unwrap_or(trimmed);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);

        let Some((host, port)) = trimmed.split_once(':') else {
            bail!("server address {:?} is not host:port", address);
        };
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid port in server address {:?}", address))?;

        let settings = Self {
            host: host.to_string(),
            port,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn api_base_url(&self) -> String {
        format!("http://{}:{}/", self.host, self.port)
    }

    pub fn websocket_base_url(&self) -> String {
        format!("ws://{}:{}/", self.host, self.port)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_valid_host(&self.host) {
            bail!("invalid server host {:?}", self.host);
        }
        if self.port == 0 {
            bail!("server port must be between 1 and 65535");
        }
        Ok(())
    }
}

/// IP literal or domain name: alphanumerics, dots and dashes, not starting or
/// ending with a separator.
pub fn is_valid_host(host: &str) -> bool {
    let host = host.trim();
    let Some(first) = host.chars().next() else {
        return false;
    };
    let last = host.chars().last().unwrap_or(first);
    first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && host.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HttpSettings {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            request_timeout_secs: 30,
        }
    }
}

impl HttpSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StreamSettings {
    pub path: String,
    /// Zero disables the keepalive
    pub heartbeat_interval_secs: u64,
    pub event_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            path: "api/realtime/ws".to_string(),
            heartbeat_interval_secs: 30,
            event_buffer: 256,
        }
    }
}

impl StreamSettings {
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    pub window_capacity: usize,
    pub history_max_points: usize,
    pub shutdown_grace_ms: u64,
    /// Collector to monitor; the first one listed by the server otherwise
    pub collector_id: Option<String>,
    /// Tariff used to price history consumption
    pub price_per_kwh: Option<f64>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            history_max_points: DEFAULT_HISTORY_POINTS,
            shutdown_grace_ms: 2000,
            collector_id: None,
            price_per_kwh: None,
        }
    }
}

impl SessionSettings {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CredentialSettings {
    /// JSON token file; tokens are kept in memory only when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AccountSettings {
    pub username: String,
    pub password: String,
}

impl ClientConfig {
    pub fn websocket_url(&self) -> String {
        format!(
            "{}{}",
            self.server.websocket_base_url(),
            self.stream.path.trim_start_matches('/')
        )
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.server.validate()?;
        if self.session.window_capacity == 0 {
            bail!("session.window_capacity must be positive");
        }
        if self.session.history_max_points == 0 {
            bail!("session.history_max_points must be positive");
        }
        if self.session.price_per_kwh.is_some_and(|price| !price.is_finite() || price < 0.0) {
            bail!("session.price_per_kwh must be a non-negative number");
        }
        if self.stream.event_buffer == 0 {
            bail!("stream.event_buffer must be positive");
        }
        Ok(())
    }
}

pub fn load_client_config() -> anyhow::Result<ClientConfig> {
    load(config::File::with_name("config/client").required(false))
}

pub fn load_client_config_from(path: &Path) -> anyhow::Result<ClientConfig> {
    load(config::File::from(path))
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn load(file: config::File<config::FileSourceFile, config::FileFormat>) -> anyhow::Result<ClientConfig> {
    let settings = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let client: ClientConfig = settings.try_deserialize()?;
    client.validate()?;
    Ok(client)
}
