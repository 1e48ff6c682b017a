//! Gateway configuration with layered loading.
//!
//! Settings come from `starward.toml` merged with `STARWARD_`-prefixed
//! environment variables (`STARWARD_SERVER__PORT=8080` overrides
//! `[server] port`).

use figment::{
    providers::{Env, Format, Toml},
    Error as FigmentError, Figment,
};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when loading or parsing gateway configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Error from the Figment configuration library.
    #[error("Configuration error: {0}")]
    Figment(Box<FigmentError>),

    /// The specified configuration file was not found.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration is invalid or malformed.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<FigmentError> for ConfigError {
    fn from(err: FigmentError) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    /// HTTP server settings (bind address, shared port, worker count).
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared store backend.
    #[serde(default)]
    pub store: StoreConfig,

    /// Readiness marker settings (initial status, TTL, renewal period).
    #[serde(default)]
    pub instance: InstanceConfig,

    /// Operator health probe. Disabled when absent.
    #[serde(default)]
    pub health_probe: Option<ProbeConfig>,

    /// Overrides for gateway-authored response bodies.
    #[serde(default)]
    pub messages: Messages,

    /// Worker restart policy.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Parameters for the bundled rate-limit collaborator.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl GatewayConfig {
    /// Loads configuration from the default path (`starward.toml`).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("starward.toml")
    }

    /// Loads configuration from the specified file path.
    ///
    /// Environment variables prefixed with `STARWARD_` override file settings.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("STARWARD_").split("__").lowercase(false));

        let config: Self = figment.extract().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new().merge(Toml::string(content));
        let config: Self = figment.extract().map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field invariants.
    ///
    /// A renewal period at or above the marker TTL would let a live worker
    /// lapse between ticks, so it is rejected here rather than discovered in
    /// production.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance.renew_interval >= self.instance.ttl {
            return Err(ConfigError::Invalid(format!(
                "instance.renew_interval ({:?}) must be strictly shorter than instance.ttl ({:?})",
                self.instance.renew_interval, self.instance.ttl
            )));
        }
        if self.instance.ttl < Duration::from_secs(1) {
            return Err(ConfigError::Invalid(
                "instance.ttl must be at least one second".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to bind worker listeners to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// Port shared by all workers (SO_REUSEPORT).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of workers; 0 means one per available core.
    #[serde(default)]
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            workers: 0,
        }
    }
}

const fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

const fn default_port() -> u16 {
    8420
}

/// Shared store backend configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-memory store. Dev and test only: workers do not actually share it.
    #[default]
    Memory,
    /// Valkey/Redis store.
    Valkey {
        url: String,
        #[serde(default = "default_namespace")]
        namespace: Option<String>,
        #[serde(default = "default_pool_size")]
        pool_size: usize,
    },
}

fn default_namespace() -> Option<String> {
    Some("starward".to_owned())
}

const fn default_pool_size() -> usize {
    8
}

/// Readiness marker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Value written to the readiness key at startup. Traffic is served only
    /// while the stored value equals `ready`.
    #[serde(default = "default_initial_status")]
    pub initial_status: String,

    /// Marker TTL.
    #[serde(default = "default_ttl", deserialize_with = "deserialize_duration")]
    pub ttl: Duration,

    /// Renewal period; must be strictly shorter than the TTL.
    #[serde(
        default = "default_renew_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub renew_interval: Duration,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            initial_status: default_initial_status(),
            ttl: default_ttl(),
            renew_interval: default_renew_interval(),
        }
    }
}

fn default_initial_status() -> String {
    "ready".to_owned()
}

const fn default_ttl() -> Duration {
    Duration::from_secs(60)
}

const fn default_renew_interval() -> Duration {
    Duration::from_secs(50)
}

/// Operator health probe configuration. Exactly one sub-mode is active.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProbeConfig {
    /// Probe requests carry `name: value`.
    Header { name: String, value: String },
    /// Probe requests target this exact path.
    Path { path: String },
}

/// Overrides for gateway-authored response bodies and content type.
///
/// Unset fields fall back to hardcoded defaults at response-build time.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Messages {
    #[serde(default)]
    pub not_ready: Option<String>,

    #[serde(default)]
    pub not_found: Option<String>,

    #[serde(default)]
    pub maintenance: Option<String>,

    #[serde(default)]
    pub store_error: Option<String>,

    #[serde(default)]
    pub health_ok: Option<String>,

    /// `Content-Type` applied to every gateway-authored response when set.
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Worker restart policy configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "restart", rename_all = "lowercase")]
pub enum SupervisorConfig {
    /// Log worker exits and let attrition stand.
    Never,
    /// Respawn immediately, up to `max_restarts` times per worker.
    Immediate {
        #[serde(default = "default_max_restarts")]
        max_restarts: u32,
    },
    /// Respawn with exponential backoff, up to `max_restarts` times per worker.
    Backoff {
        #[serde(
            default = "default_backoff_initial",
            deserialize_with = "deserialize_duration"
        )]
        initial: Duration,
        #[serde(
            default = "default_backoff_max",
            deserialize_with = "deserialize_duration"
        )]
        max: Duration,
        #[serde(default = "default_max_restarts")]
        max_restarts: u32,
    },
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::Backoff {
            initial: default_backoff_initial(),
            max: default_backoff_max(),
            max_restarts: default_max_restarts(),
        }
    }
}

const fn default_backoff_initial() -> Duration {
    Duration::from_millis(500)
}

const fn default_backoff_max() -> Duration {
    Duration::from_secs(30)
}

const fn default_max_restarts() -> u32 {
    10
}

/// Parameters for the bundled per-route rate-limit collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum sustained request rate per route per second.
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Maximum burst size (bucket capacity).
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

const fn default_requests_per_second() -> u32 {
    50
}

const fn default_burst_size() -> u32 {
    100
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") {
        let ms: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_millis(ms))
    } else if let Some(stripped) = s.strip_suffix('s') {
        let secs: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    } else if let Some(stripped) = s.strip_suffix('m') {
        let mins: u64 = stripped
            .trim()
            .parse()
            .map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(mins * 60))
    } else {
        let secs: u64 = s.parse().map_err(|_| format!("Invalid duration: {s}"))?;
        Ok(Duration::from_secs(secs))
    }
}
