use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the broker.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub storage: StorageConfig,
    pub broadcast: BroadcastConfig,
    pub admin: AdminConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "8002".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            storage: StorageConfig::from_env(),
            broadcast: BroadcastConfig::from_env(),
            admin: AdminConfig::from_env(),
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Service-account material for the remote spreadsheet backend. An inline
/// secret takes precedence over a key-file path.
#[derive(Debug, Clone)]
pub enum SheetsCredential {
    Inline(String),
    KeyFile(PathBuf),
}

/// Storage backend selection. Remote mode needs both a sheet locator and a
/// credential; anything less selects the local file store explicitly.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub sheet_url: Option<String>,
    pub credential: Option<SheetsCredential>,
    pub local_path: PathBuf,
}

impl StorageConfig {
    fn from_env() -> Self {
        let sheet_url = env::var("SHEET_URL").ok().filter(|v| !v.trim().is_empty());
        let credential = match env::var("GOOGLE_CREDENTIALS_JSON") {
            Ok(raw) if !raw.trim().is_empty() => Some(SheetsCredential::Inline(raw)),
            _ => env::var("GOOGLE_KEY_FILE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|path| SheetsCredential::KeyFile(PathBuf::from(path))),
        };
        let local_path = env::var("MOCK_DB_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("mock_db.json"));

        Self {
            sheet_url,
            credential,
            local_path,
        }
    }

    pub fn remote_configured(&self) -> bool {
        self.sheet_url.is_some() && self.credential.is_some()
    }
}

/// Public-channel broadcast target. Multiple comma-separated ids may be
/// supplied; only the first is used, and only when it looks like a broadcast
/// channel id (`-100…`, longer than nine characters).
#[derive(Debug, Clone, Default)]
pub struct BroadcastConfig {
    pub channel_id: Option<String>,
    pub bot_token: Option<String>,
}

impl BroadcastConfig {
    fn from_env() -> Self {
        Self {
            channel_id: env::var("CHANNEL_ID")
                .ok()
                .and_then(|raw| Self::first_entry(&raw)),
            bot_token: env::var("BOT_TOKEN").ok().filter(|v| !v.trim().is_empty()),
        }
    }

    fn first_entry(raw: &str) -> Option<String> {
        let first = raw.split(',').next().unwrap_or("").trim();
        (!first.is_empty()).then(|| first.to_string())
    }

    /// The channel id, if one is configured and syntactically valid.
    pub fn valid_channel(&self) -> Option<&str> {
        self.channel_id
            .as_deref()
            .filter(|id| id.starts_with("-100") && id.len() > 9)
    }
}

/// Administrator allow-list for the moderation interfaces. Non-numeric
/// entries are dropped rather than failing the whole config.
#[derive(Debug, Clone, Default)]
pub struct AdminConfig {
    pub admin_ids: Vec<i64>,
}

impl AdminConfig {
    fn from_env() -> Self {
        let admin_ids = env::var("ADMIN_IDS")
            .map(|raw| Self::parse_ids(&raw))
            .unwrap_or_default();
        Self { admin_ids }
    }

    fn parse_ids(raw: &str) -> Vec<i64> {
        raw.split(',')
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .collect()
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
