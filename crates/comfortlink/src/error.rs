//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use comfortlink_config::ConfigError;
use comfortlink_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const RATE_LIMITED: i32 = 5;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the portal: {message}")]
    #[diagnostic(
        code(comfortlink::connection_failed),
        help("Check your network connection and account.base_url, then run: comfortlink check")
    )]
    ConnectionFailed { message: String },

    #[error("Rate limited by the portal for {seconds}s")]
    #[diagnostic(
        code(comfortlink::rate_limited),
        help("Wait for the cool-down to pass, or raise polling.interval.")
    )]
    RateLimited { seconds: u64 },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(comfortlink::auth_failed),
        help(
            "Verify your portal username and password.\n\
             Run: comfortlink config set-password"
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured: {reason}")]
    #[diagnostic(
        code(comfortlink::no_credentials),
        help(
            "Create a config with: comfortlink config init --username <email>\n\
             Then run: comfortlink config set-password\n\
             Or set COMFORTLINK_PASSWORD."
        )
    )]
    NoCredentials { reason: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("Device '{identifier}' not found")]
    #[diagnostic(
        code(comfortlink::not_found),
        help("Run: comfortlink devices to see available devices")
    )]
    NotFound { identifier: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("Portal error: {message}")]
    #[diagnostic(code(comfortlink::api_error))]
    ApiError { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(comfortlink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(comfortlink::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(comfortlink::config))]
    Config(ConfigError),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(comfortlink::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::RateLimited { .. } => exit_code::RATE_LIMITED,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::ConfigExists { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoCredentials { reason } => Self::NoCredentials { reason },
            other => Self::Config(other),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthenticationFailed { message } => Self::AuthFailed { message },

            CoreError::SessionExpired => Self::AuthFailed {
                message: "the portal ended the session".into(),
            },

            CoreError::RateLimited { retry_after } => Self::RateLimited {
                seconds: retry_after.as_secs(),
            },

            CoreError::Communication { message } => Self::ConnectionFailed { message },

            CoreError::DeviceNotFound { device_id } => Self::NotFound {
                identifier: device_id.to_string(),
            },

            CoreError::ValidationFailed { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },

            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Rejected { message } | CoreError::Api { message, .. } => {
                Self::ApiError { message }
            }

            err @ (CoreError::AlreadyStarted | CoreError::ShutDown) => Self::ApiError {
                message: err.to_string(),
            },
        }
    }
}
