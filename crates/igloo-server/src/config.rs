//! Environment-driven configuration.
//!
//! Everything that shapes core behavior arrives through the environment and
//! is parsed exactly once at startup. A value that fails to parse is a
//! startup error, not a silent default.

use std::path::PathBuf;
use std::time::Duration;

use igloo_auth::{AuthConfig, TokenConfig};
use igloo_queue::QueueConfig;
use igloo_transport::TransportConfig;

/// Default relays used when `RELAYS` is unset.
pub const DEFAULT_RELAYS: &[&str] = &["wss://relay.damus.io", "wss://relay.primal.net"];

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host_port: u16,
    pub data_dir: PathBuf,
    pub relays: Vec<String>,
    pub headless: bool,
    pub static_dir: PathBuf,
    pub admin_secret: Option<String>,
    pub api_key: Option<String>,
    pub rate_limit_window: Duration,
    pub rate_limit_max: u32,
    pub session_idle_timeout: Duration,
    pub session_absolute_timeout: Duration,
    pub request_ttl: Duration,
    pub max_relays: usize,
}

impl ServerConfig {
    /// Read the environment. Returns a human-readable message on the first
    /// unusable value; the binary turns that into exit code 1.
    pub fn from_env() -> Result<Self, String> {
        Ok(Self {
            host_port: parse_var("HOST_PORT", 8002)?,
            data_dir: std::env::var("IGLOO_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            relays: relays_from_env(),
            headless: flag_var("HEADLESS"),
            static_dir: std::env::var("IGLOO_STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("static")),
            admin_secret: non_empty_var("ADMIN_SECRET"),
            api_key: non_empty_var("API_KEY"),
            rate_limit_window: Duration::from_secs(parse_var("RATE_LIMIT_WINDOW", 900)?),
            rate_limit_max: parse_var("RATE_LIMIT_MAX", 5)?,
            session_idle_timeout: Duration::from_secs(parse_var("SESSION_IDLE_TIMEOUT", 1800)?),
            session_absolute_timeout: Duration::from_secs(parse_var(
                "SESSION_ABSOLUTE_TIMEOUT",
                43_200,
            )?),
            request_ttl: Duration::from_secs(parse_var("REQUEST_TTL", 600)?),
            max_relays: parse_var("MAX_RELAYS", 12)?,
        })
    }

    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig {
            password_auth: true,
            api_key: self.api_key.clone(),
            admin_secret: self.admin_secret.clone(),
            rate_window: self.rate_limit_window,
            rate_max_attempts: self.rate_limit_max,
            tokens: TokenConfig {
                idle_timeout: self.session_idle_timeout,
                absolute_timeout: self.session_absolute_timeout,
            },
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            request_ttl: self.request_ttl,
            ..QueueConfig::default()
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            max_relays: self.max_relays,
            ..TransportConfig::default()
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("igloo.redb")
    }
}

fn relays_from_env() -> Vec<String> {
    match non_empty_var("RELAYS") {
        Some(value) => value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        None => DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag_var(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T, String> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} has unusable value {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}
