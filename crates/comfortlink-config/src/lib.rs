//! Configuration for comfortlink.
//!
//! TOML file + `COMFORTLINK_` environment overlay, credential resolution
//! (env + keyring + plaintext), validation, and translation to
//! `comfortlink_core::EngineConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

use comfortlink_api::portal::client::DEFAULT_BASE_URL;
use comfortlink_api::{Credentials, RetryPolicy, TlsMode};
use comfortlink_core::{EngineConfig, PollSettings};

/// Keyring service name; the entry user is the portal username.
pub const KEYRING_SERVICE: &str = "comfortlink";

const ENV_PREFIX: &str = "COMFORTLINK_";
const ENV_USERNAME: &str = "COMFORTLINK_USERNAME";
const ENV_PASSWORD: &str = "COMFORTLINK_PASSWORD";

/// Allowed poll interval, in seconds. Values outside are clamped.
pub const POLL_INTERVAL_RANGE: (u64, u64) = (60, 3600);
/// Allowed request timeout, in seconds. Values outside are rejected.
pub const TIMEOUT_RANGE: (u64, u64) = (5, 120);

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured: {reason}")]
    NoCredentials { reason: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub account: Account,

    #[serde(default)]
    pub polling: Polling,

    #[serde(default)]
    pub defaults: Defaults,
}

/// Portal account and connection settings.
#[derive(Debug, Deserialize, Serialize)]
pub struct Account {
    /// Portal login (e-mail address).
    pub username: Option<String>,

    /// Password (plaintext -- prefer keyring or env var).
    pub password: Option<String>,

    /// Portal root URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path to an additional CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Skip TLS verification.
    #[serde(default)]
    pub insecure: bool,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Account {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            base_url: default_base_url(),
            ca_cert: None,
            insecure: false,
            timeout: default_timeout(),
        }
    }
}

/// Poll loop tuning. Durations are in seconds unless noted.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Polling {
    pub interval: u64,
    pub auth_retry_delay: u64,
    pub max_consecutive_failures: u32,
    pub backoff_ceiling: u64,
    pub detail_concurrency: usize,
    pub shutdown_timeout: u64,
    pub rate_limit_cooldown: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            interval: 300,
            auth_retry_delay: 60,
            max_consecutive_failures: 3,
            backoff_ceiling: 30 * 60,
            detail_concurrency: 4,
            shutdown_timeout: 10,
            rate_limit_cooldown: 5 * 60,
            retry_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.into()
}
fn default_timeout() -> u64 {
    30
}
fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "comfortlink", "comfortlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("comfortlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from a specific file + environment. A missing file yields the
/// defaults. Nested keys use a double underscore, e.g.
/// `COMFORTLINK_POLLING__INTERVAL=120`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(&path, cfg)?;
    Ok(path)
}

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve portal credentials.
///
/// Username: config, then `COMFORTLINK_USERNAME`. Password:
/// `COMFORTLINK_PASSWORD`, then the system keyring, then plaintext config.
pub fn resolve_credentials(account: &Account) -> Result<Credentials, ConfigError> {
    resolve_credentials_with(
        account,
        |name| std::env::var(name).ok(),
        keyring_password,
    )
}

fn resolve_credentials_with(
    account: &Account,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<Credentials, ConfigError> {
    let username = account
        .username
        .clone()
        .or_else(|| env(ENV_USERNAME))
        .map(|u| u.trim().to_owned())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ConfigError::Validation {
            field: "account.username".into(),
            reason: "must not be empty".into(),
        })?;

    // 1. Env var
    if let Some(pw) = env(ENV_PASSWORD) {
        return Ok(Credentials::new(username, SecretString::from(pw)));
    }

    // 2. Keyring
    if let Some(pw) = keyring(&username) {
        return Ok(Credentials::new(username, SecretString::from(pw)));
    }

    // 3. Plaintext in config
    if let Some(ref pw) = account.password {
        return Ok(Credentials::new(username, SecretString::from(pw.clone())));
    }

    Err(ConfigError::NoCredentials {
        reason: format!("no password for '{username}' in {ENV_PASSWORD}, keyring, or config"),
    })
}

fn keyring_password(username: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, username)
        .ok()?
        .get_password()
        .ok()
}

/// Store a password in the system keyring for `username`.
pub fn store_password(username: &str, password: &SecretString) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, username)
        .and_then(|entry| entry.set_password(password.expose_secret()))
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

// ── Validation ──────────────────────────────────────────────────────

/// Clamp a poll interval into [`POLL_INTERVAL_RANGE`], warning when it moves.
pub fn clamp_poll_interval(secs: u64) -> Duration {
    let (min, max) = POLL_INTERVAL_RANGE;
    let clamped = secs.clamp(min, max);
    if clamped != secs {
        warn!(
            requested = secs,
            applied = clamped,
            "poll interval out of range, clamped"
        );
    }
    Duration::from_secs(clamped)
}

fn validate_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Validation {
        field: "account.base_url".into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "account.base_url".into(),
            reason: format!("expected http or https, got '{}'", url.scheme()),
        });
    }
    Ok(url)
}

fn validate_timeout(secs: u64) -> Result<Duration, ConfigError> {
    let (min, max) = TIMEOUT_RANGE;
    if !(min..=max).contains(&secs) {
        return Err(ConfigError::Validation {
            field: "account.timeout".into(),
            reason: format!("must be between {min} and {max} seconds, got {secs}"),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn tls_mode(account: &Account) -> TlsMode {
    if account.insecure {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = account.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    }
}

impl Polling {
    /// Engine tuning with the poll interval clamped.
    pub fn to_settings(&self) -> PollSettings {
        PollSettings {
            interval: clamp_poll_interval(self.interval),
            auth_retry_delay: Duration::from_secs(self.auth_retry_delay),
            max_consecutive_failures: self.max_consecutive_failures,
            backoff_ceiling: Duration::from_secs(self.backoff_ceiling),
            detail_concurrency: self.detail_concurrency.max(1),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
            rate_limit_cooldown: Duration::from_secs(self.rate_limit_cooldown),
            retry: RetryPolicy {
                attempts: self.retry_attempts.max(1),
                delay: Duration::from_millis(self.retry_delay_ms),
            },
        }
    }
}

/// Validate a loaded config and build the engine configuration.
pub fn to_engine_config(cfg: &Config) -> Result<EngineConfig, ConfigError> {
    let credentials = resolve_credentials(&cfg.account)?;
    build_engine_config(cfg, credentials)
}

/// Like [`to_engine_config`] with already-resolved credentials.
pub fn build_engine_config(
    cfg: &Config,
    credentials: Credentials,
) -> Result<EngineConfig, ConfigError> {
    if credentials.username.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "account.username".into(),
            reason: "must not be empty".into(),
        });
    }
    let base_url = validate_base_url(&cfg.account.base_url)?;
    let request_timeout = validate_timeout(cfg.account.timeout)?;

    Ok(EngineConfig {
        base_url,
        credentials,
        tls: tls_mode(&cfg.account),
        request_timeout,
        poll: cfg.polling.to_settings(),
    })
}
