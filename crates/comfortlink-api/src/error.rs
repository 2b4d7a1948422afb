use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `comfortlink-api` crate.
///
/// Every outcome of a portal request is classified into exactly one of
/// these variants. Callers (the poll scheduler, command routing) switch on
/// the classification to decide status and backoff; nothing here is
/// retried except the transient transport and parse failures.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected: bad credentials, non-2xx login reply, or a session
    /// that could not survive its first keepalive.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// A data request was attempted without an authenticated session.
    #[error("Not authenticated -- login required")]
    NotAuthenticated,

    /// The portal answered 401/403; the session cookie is no longer valid.
    #[error("Session expired (HTTP {status}) -- re-authentication required")]
    SessionExpired { status: u16 },

    // ── Throttling ──────────────────────────────────────────────────
    /// HTTP 429 or a rate-limit marker in the body. Requests are refused
    /// locally until the cool-down elapses.
    #[error("Rate limited -- retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    // ── Application ─────────────────────────────────────────────────
    /// The portal accepted the request but reported `success: false`.
    #[error("Request rejected by portal: {message}")]
    ApiRejected { message: String },

    /// Any non-2xx status that is not otherwise classified.
    #[error("Unexpected response (HTTP {status})")]
    UnexpectedResponse { status: u16 },

    // ── Transport ───────────────────────────────────────────────────
    /// Timeout, connection refused, DNS failure, broken body stream.
    #[error("Communication failure: {0}")]
    CommunicationFailure(#[source] reqwest::Error),

    /// The body could not be interpreted (not JSON, wrong shape).
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String, body: String },

    // ── Setup ───────────────────────────────────────────────────────
    /// URL parsing or joining failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The HTTP client could not be constructed.
    #[error("HTTP client setup failed: {0}")]
    ClientSetup(String),
}

impl Error {
    /// Returns `true` for failures the client retries locally before
    /// surfacing them.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CommunicationFailure(_) | Self::MalformedResponse { .. }
        )
    }

    /// Returns `true` if logging in again might resolve this error.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::SessionExpired { .. } | Self::NotAuthenticated)
    }

    /// Returns `true` if this error carries a rate-limit cool-down.
    pub fn is_rate_limited(&self) -> bool {
        self.retry_after().is_some()
    }

    /// The cool-down carried by a rate-limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// HTTP status associated with this error, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::SessionExpired { status } | Self::UnexpectedResponse { status } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::CommunicationFailure(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
