// ── Core error types ──
//
// Errors surfaced by the engine. Portal failures are translated from
// `comfortlink_api::Error` so consumers switch on engine-level categories
// rather than HTTP details.

use std::time::Duration;

use thiserror::Error;

use crate::model::DeviceId;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Portal session expired -- will log in again")]
    SessionExpired,

    #[error("Rate limited by portal -- retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("Cannot reach portal: {message}")]
    Communication { message: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: DeviceId },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation rejected by portal: {message}")]
    Rejected { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Engine already started")]
    AlreadyStarted,

    #[error("Engine has been shut down")]
    ShutDown,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<comfortlink_api::Error> for CoreError {
    fn from(err: comfortlink_api::Error) -> Self {
        use comfortlink_api::Error as Api;

        match err {
            Api::AuthenticationFailed { message } => Self::AuthenticationFailed { message },
            Api::NotAuthenticated | Api::SessionExpired { .. } => Self::SessionExpired,
            Api::RateLimited { retry_after } => Self::RateLimited { retry_after },
            Api::ApiRejected { message } => Self::Rejected { message },
            Api::CommunicationFailure(e) => Self::Communication {
                message: e.to_string(),
            },
            Api::UnexpectedResponse { status } => Self::Api {
                message: format!("unexpected HTTP {status} from portal"),
                status: Some(status),
            },
            Api::MalformedResponse { message, .. } => Self::Api {
                message,
                status: None,
            },
            Api::InvalidUrl(e) => Self::Config {
                message: format!("invalid portal URL: {e}"),
            },
            Api::ClientSetup(message) => Self::Config { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_engine_categories() {
        let err: CoreError = comfortlink_api::Error::SessionExpired { status: 403 }.into();
        assert!(matches!(err, CoreError::SessionExpired));

        let err: CoreError = comfortlink_api::Error::UnexpectedResponse { status: 502 }.into();
        assert!(matches!(err, CoreError::Api { status: Some(502), .. }));

        let err: CoreError = comfortlink_api::Error::ApiRejected {
            message: "bad setpoint".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Operation rejected by portal: bad setpoint");
    }
}
