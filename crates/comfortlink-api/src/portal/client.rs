// Portal HTTP client
//
// Wraps `reqwest::Client` with cookie handling, manual redirect following,
// session state tracking and response classification. Endpoint methods
// (login, locations, control) live in sibling modules as inherent impls so
// this file stays focused on transport mechanics.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::auth::{Credentials, SessionState};
use crate::cookie::CookieJar;
use crate::error::Error;
use crate::transport::TransportConfig;

/// Default portal root. Endpoint paths are relative to it.
pub const DEFAULT_BASE_URL: &str = "https://mytotalconnectcomfort.com/portal/";

/// Substring the portal embeds in throttling pages (matched case-insensitively).
pub(crate) const RATE_LIMIT_MARKER: &str = "too many attempts";

const MAX_REDIRECTS: usize = 10;
const BODY_PREVIEW: usize = 200;

pub(crate) const ACCEPT_JSON: &str = "application/json, text/javascript, */*; q=0.01";
pub(crate) const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Local retry policy for transient failures (transport errors and
/// unparseable bodies). Classified application errors are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Construction parameters for a [`SessionClient`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: Url,
    pub transport: TransportConfig,
    pub retry: RetryPolicy,
    /// Cool-down applied after a 429 without a usable `Retry-After`.
    pub rate_limit_cooldown: Duration,
}

impl SessionConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            transport: TransportConfig::default(),
            retry: RetryPolicy::default(),
            rate_limit_cooldown: Duration::from_secs(300),
        }
    }
}

/// Body of an outgoing request.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Form(Vec<(String, String)>),
    Json(Value),
}

/// A completed HTTP exchange after redirects were followed.
#[derive(Debug)]
pub(crate) struct Exchange {
    pub status: StatusCode,
    /// Final URL after redirects.
    pub url: Url,
    pub headers: HeaderMap,
    pub body: String,
    /// Status of the first redirect hop, if any.
    pub redirected_from: Option<StatusCode>,
}

struct SessionInner {
    /// State ignoring any active cool-down.
    state: SessionState,
    rate_limited_until: Option<Instant>,
    effective_base: Url,
    /// Bumped on every login and close. A request only demotes the
    /// session if the generation it started under is still current.
    generation: u64,
}

/// Stateful client for the portal's cookie-backed web session.
///
/// One instance per account. Share it behind an `Arc`; all methods take
/// `&self`. Session transitions are decided under an internal lock, and a
/// login holds an async lock for its whole handshake so two logins never
/// interleave.
pub struct SessionClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
    jar: CookieJar,
    retry: RetryPolicy,
    rate_limit_cooldown: Duration,
    session: Mutex<SessionInner>,
    pub(crate) login_lock: tokio::sync::Mutex<()>,
}

impl SessionClient {
    /// Create a client. No network traffic happens until [`login`](Self::login).
    pub fn new(config: SessionConfig, credentials: Credentials) -> Result<Self, Error> {
        let http = config.transport.build_client()?;
        Ok(Self::with_client(http, config, credentials))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    ///
    /// The client must not follow redirects on its own, otherwise cookies
    /// set on intermediate hops are lost.
    pub fn with_client(
        http: reqwest::Client,
        config: SessionConfig,
        credentials: Credentials,
    ) -> Self {
        let base_url = normalize_base(config.base_url);
        Self {
            http,
            credentials,
            jar: CookieJar::new(),
            retry: config.retry,
            rate_limit_cooldown: config.rate_limit_cooldown,
            session: Mutex::new(SessionInner {
                state: SessionState::Unauthenticated,
                rate_limited_until: None,
                effective_base: base_url.clone(),
                generation: 0,
            }),
            base_url,
            login_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current session state, accounting for any active cool-down.
    pub fn state(&self) -> SessionState {
        let mut inner = self.session();
        match inner.rate_limited_until {
            Some(until) if until > Instant::now() => SessionState::RateLimited,
            Some(_) => {
                inner.rate_limited_until = None;
                inner.state
            }
            None => inner.state,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// Time left in the current rate-limit cool-down, if one is active.
    pub fn rate_limit_remaining(&self) -> Option<Duration> {
        let until = self.session().rate_limited_until?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    /// The configured portal root.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Portal root after the redirects observed during the last login.
    pub fn effective_base_url(&self) -> Url {
        self.session().effective_base.clone()
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub(crate) fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    /// Drop the session: state becomes `Unauthenticated` and the cookie
    /// jar is cleared. Safe to call repeatedly.
    pub fn close(&self) {
        {
            let mut inner = self.session();
            if inner.state != SessionState::Unauthenticated {
                info!(user = %self.credentials.username, "closing portal session");
            }
            inner.state = SessionState::Unauthenticated;
            inner.rate_limited_until = None;
            inner.generation += 1;
        }
        self.jar.clear();
    }

    // ── Data requests ────────────────────────────────────────────────

    /// GET a data endpoint and return its classified JSON payload.
    pub async fn get(&self, path: &str) -> Result<Value, Error> {
        self.request(Method::GET, path, RequestBody::Empty).await
    }

    /// POST to a data endpoint and return its classified JSON payload.
    pub async fn post(&self, path: &str, body: RequestBody) -> Result<Value, Error> {
        self.request(Method::POST, path, body).await
    }

    /// Authenticated request with local retry for transient failures.
    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
    ) -> Result<T, Error> {
        let (base, generation) = self.begin_request()?;
        let url = base.join(path)?;
        let label = format!("{method} {path}");

        self.with_retry(&label, || async {
            let exchange = self
                .exchange(method.clone(), url.clone(), body.clone(), ACCEPT_JSON, true)
                .await?;
            let exchange = self.classify(exchange, generation)?;
            parse_payload(&exchange.body)
        })
        .await
    }

    /// Check that the session may issue a request and capture the base
    /// URL and generation it runs under.
    fn begin_request(&self) -> Result<(Url, u64), Error> {
        if let Some(retry_after) = self.rate_limit_remaining() {
            return Err(Error::RateLimited { retry_after });
        }
        let inner = self.session();
        if inner.state != SessionState::Authenticated {
            return Err(Error::NotAuthenticated);
        }
        Ok((inner.effective_base.clone(), inner.generation))
    }

    // ── Classification ───────────────────────────────────────────────

    /// Map an exchange onto the error taxonomy, updating session state
    /// for expiry and throttling.
    pub(crate) fn classify(&self, exchange: Exchange, generation: u64) -> Result<Exchange, Error> {
        if let Some(err) = self.check_rate_limit(&exchange) {
            return Err(err);
        }

        let status = exchange.status;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.demote(generation, SessionState::Expired);
            return Err(Error::SessionExpired {
                status: status.as_u16(),
            });
        }

        // Dead sessions are bounced to the sign-in page instead of getting 401.
        if let Some(hop) = exchange.redirected_from {
            if self.is_sign_in_page(&exchange.url) {
                debug!(url = %exchange.url, "request redirected to sign-in page");
                self.demote(generation, SessionState::Expired);
                return Err(Error::SessionExpired {
                    status: hop.as_u16(),
                });
            }
        }

        if !status.is_success() {
            return Err(Error::UnexpectedResponse {
                status: status.as_u16(),
            });
        }

        Ok(exchange)
    }

    /// Returns the rate-limit error (and starts the cool-down) if the
    /// exchange signals throttling.
    pub(crate) fn check_rate_limit(&self, exchange: &Exchange) -> Option<Error> {
        let throttled = exchange.status == StatusCode::TOO_MANY_REQUESTS
            || exchange.body.to_ascii_lowercase().contains(RATE_LIMIT_MARKER);
        if !throttled {
            return None;
        }

        let retry_after = exchange
            .headers
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(self.rate_limit_cooldown, Duration::from_secs);

        self.session().rate_limited_until = Some(Instant::now() + retry_after);
        warn!(
            retry_after_secs = retry_after.as_secs(),
            "portal is rate limiting, entering cool-down"
        );
        Some(Error::RateLimited { retry_after })
    }

    /// Move the session to `next` unless a newer login has happened since
    /// the request that observed the failure started.
    pub(crate) fn demote(&self, generation: u64, next: SessionState) {
        let mut inner = self.session();
        if inner.generation != generation {
            debug!(
                stale = generation,
                current = inner.generation,
                "ignoring session failure from a superseded session"
            );
            return;
        }
        if inner.state == SessionState::Authenticated {
            info!(?next, "portal session lost");
        }
        inner.state = next;
    }

    pub(crate) fn current_generation(&self) -> u64 {
        self.session().generation
    }

    /// Record a successful login.
    pub(crate) fn promote(&self, effective_base: Url) {
        let mut inner = self.session();
        inner.state = SessionState::Authenticated;
        inner.effective_base = effective_base;
        inner.generation += 1;
    }

    /// Reset to `Unauthenticated` at the start of a login attempt.
    pub(crate) fn reset_for_login(&self) {
        {
            let mut inner = self.session();
            inner.state = SessionState::Unauthenticated;
            inner.generation += 1;
        }
        self.jar.clear();
    }

    fn is_sign_in_page(&self, url: &Url) -> bool {
        let base = self.session().effective_base.clone();
        url.path().trim_end_matches('/') == base.path().trim_end_matches('/')
    }

    // ── Transport ────────────────────────────────────────────────────

    /// Run `op` up to `retry.attempts` times while it fails transiently.
    pub(crate) async fn with_retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(attempt, max = attempts, error = %e, "{label} failed, retrying");
                    tokio::time::sleep(self.retry.delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Send one logical request, following redirects manually and feeding
    /// every hop's cookies into the jar.
    pub(crate) async fn exchange(
        &self,
        method: Method,
        url: Url,
        body: RequestBody,
        accept: &'static str,
        ajax: bool,
    ) -> Result<Exchange, Error> {
        let mut method = method;
        let mut url = url;
        let mut body = body;
        let mut redirected_from = None;

        for _ in 0..=MAX_REDIRECTS {
            debug!("{method} {url}");
            let resp = self
                .build_request(&method, &url, &body, accept, ajax)
                .send()
                .await
                .map_err(Error::CommunicationFailure)?;

            let status = resp.status();
            let skipped = self.jar.ingest(&url, resp.headers());
            if skipped > 0 {
                trace!(skipped, "ignored malformed Set-Cookie headers");
            }

            let location = status
                .is_redirection()
                .then(|| resp.headers().get(header::LOCATION))
                .flatten()
                .and_then(|v| v.to_str().ok())
                .and_then(|loc| url.join(loc).ok());

            if let Some(next) = location {
                trace!(%status, from = %url, to = %next, "following redirect");
                redirected_from.get_or_insert(status);
                if status != StatusCode::TEMPORARY_REDIRECT
                    && status != StatusCode::PERMANENT_REDIRECT
                {
                    method = Method::GET;
                    body = RequestBody::Empty;
                }
                url = next;
                continue;
            }

            let headers = resp.headers().clone();
            let text = resp.text().await.map_err(Error::CommunicationFailure)?;
            return Ok(Exchange {
                status,
                url,
                headers,
                body: text,
                redirected_from,
            });
        }

        warn!(url = %url, "redirect limit exceeded");
        Err(Error::UnexpectedResponse {
            status: redirected_from.map_or(0, |s| s.as_u16()),
        })
    }

    fn build_request(
        &self,
        method: &Method,
        url: &Url,
        body: &RequestBody,
        accept: &'static str,
        ajax: bool,
    ) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method.clone(), url.clone())
            .header(header::ACCEPT, HeaderValue::from_static(accept));

        if ajax {
            builder = builder.header(
                HeaderName::from_static("x-requested-with"),
                HeaderValue::from_static("XMLHttpRequest"),
            );
        }

        let cookies = self.jar.header_for(url.as_str());
        if !cookies.is_empty() {
            builder = builder.header(header::COOKIE, cookies);
        }

        match body {
            RequestBody::Empty if *method == Method::POST => {
                builder.header(header::CONTENT_LENGTH, "0")
            }
            RequestBody::Empty => builder,
            RequestBody::Form(fields) => builder.form(fields),
            RequestBody::Json(value) => builder.json(value),
        }
    }

    fn session(&self) -> MutexGuard<'_, SessionInner> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Make sure the base URL ends with `/` so relative joins stay under it.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Interpret a 2xx body: JSON required; a top-level `success` field that
/// is false (or zero) means the portal rejected the operation.
pub(crate) fn parse_payload<T: DeserializeOwned>(body: &str) -> Result<T, Error> {
    let value: Value = serde_json::from_str(body).map_err(|e| malformed(&e, body))?;

    if let Some(success) = value.get("success") {
        let accepted = match success {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
            Value::String(s) => s.eq_ignore_ascii_case("true") || s == "1",
            _ => false,
        };
        if !accepted {
            let message = ["message", "Message", "errorMessage"]
                .iter()
                .find_map(|k| value.get(*k).and_then(Value::as_str))
                .unwrap_or("operation not accepted")
                .to_owned();
            return Err(Error::ApiRejected { message });
        }
    }

    serde_json::from_value(value).map_err(|e| malformed(&e, body))
}

fn malformed(err: &serde_json::Error, body: &str) -> Error {
    let preview: String = body.chars().take(BODY_PREVIEW).collect();
    Error::MalformedResponse {
        message: format!("{err} (body preview: {preview:?})"),
        body: body.to_owned(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn payload_success_marker() {
        let v: Value = parse_payload(r#"{"success": true, "x": 1}"#).unwrap();
        assert_eq!(v["x"], 1);
        let v: Value = parse_payload(r#"{"success": 1}"#).unwrap();
        assert_eq!(v["success"], 1);
    }

    #[test]
    fn payload_failure_marker() {
        let err = parse_payload::<Value>(r#"{"success": false, "message": "bad setpoint"}"#)
            .unwrap_err();
        match err {
            Error::ApiRejected { message } => assert_eq!(message, "bad setpoint"),
            other => panic!("expected ApiRejected, got {other:?}"),
        }
        assert!(matches!(
            parse_payload::<Value>(r#"{"success": 0}"#),
            Err(Error::ApiRejected { .. })
        ));
    }

    #[test]
    fn payload_without_marker_passes_through() {
        let v: Vec<Value> = parse_payload(r#"[{"LocationID": 1}]"#).unwrap();
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn non_json_payload_is_malformed() {
        let err = parse_payload::<Value>("<html>login</html>").unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let url = normalize_base(Url::parse("https://example.com/portal").unwrap());
        assert_eq!(url.as_str(), "https://example.com/portal/");
        assert_eq!(
            url.join("Account/KeepAlive").unwrap().as_str(),
            "https://example.com/portal/Account/KeepAlive"
        );
    }
}
