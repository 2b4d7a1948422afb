// ── Runtime engine configuration ──
//
// These types describe how one engine talks to one portal account.
// They carry credentials and tuning but never touch disk; the config
// crate validates user input and hands a finished `EngineConfig` in.

use std::time::Duration;

use comfortlink_api::portal::client::DEFAULT_BASE_URL;
use comfortlink_api::{Credentials, RetryPolicy, SessionConfig, TlsMode, TransportConfig};
use url::Url;

use crate::error::CoreError;

/// Poll loop and backoff tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    /// Normal delay between poll cycles.
    pub interval: Duration,
    /// Delay before the next login attempt after rejected credentials.
    pub auth_retry_delay: Duration,
    /// Consecutive failed cycles before the delay starts escalating.
    /// Zero disables escalation.
    pub max_consecutive_failures: u32,
    /// Upper bound for escalated delays.
    pub backoff_ceiling: Duration,
    /// Detail fetches in flight at once within a cycle.
    pub detail_concurrency: usize,
    /// How long shutdown waits for background tasks before aborting them.
    pub shutdown_timeout: Duration,
    /// Cool-down after a 429 that carries no `Retry-After`.
    pub rate_limit_cooldown: Duration,
    /// Local retry of transient request failures.
    pub retry: RetryPolicy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            auth_retry_delay: Duration::from_secs(60),
            max_consecutive_failures: 3,
            backoff_ceiling: Duration::from_secs(30 * 60),
            detail_concurrency: 4,
            shutdown_timeout: Duration::from_secs(10),
            rate_limit_cooldown: Duration::from_secs(5 * 60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Configuration for a single engine (one portal account).
///
/// Built by the CLI or the config crate; core never reads config files.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Portal root, e.g. `https://mytotalconnectcomfort.com/portal/`.
    pub base_url: Url,
    pub credentials: Credentials,
    pub tls: TlsMode,
    /// Per-request timeout.
    pub request_timeout: Duration,
    pub poll: PollSettings,
}

impl EngineConfig {
    /// Configuration against the public portal with default tuning.
    pub fn new(credentials: Credentials) -> Result<Self, CoreError> {
        let base_url = Url::parse(DEFAULT_BASE_URL).map_err(|e| CoreError::Config {
            message: format!("invalid default portal URL: {e}"),
        })?;
        Ok(Self {
            base_url,
            credentials,
            tls: TlsMode::System,
            request_timeout: Duration::from_secs(30),
            poll: PollSettings::default(),
        })
    }

    pub(crate) fn session_config(&self) -> SessionConfig {
        SessionConfig {
            base_url: self.base_url.clone(),
            transport: TransportConfig {
                tls: self.tls.clone(),
                timeout: self.request_timeout,
            },
            retry: self.poll.retry,
            rate_limit_cooldown: self.poll.rate_limit_cooldown,
        }
    }
}
