// Portal authentication
//
// Cookie-based session login and the keepalive probe. Login primes the
// jar with a GET of the sign-in page, posts the credential form, then
// proves the new session with one keepalive before declaring success.

use reqwest::Method;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};
use url::Url;

use crate::auth::SessionState;
use crate::error::Error;
use crate::portal::client::{ACCEPT_HTML, ACCEPT_JSON, Exchange, RequestBody, SessionClient};

/// Keepalive endpoint, relative to the portal root.
pub const KEEPALIVE_PATH: &str = "Account/KeepAlive";

/// Substring of the sign-in page shown after a rejected login.
pub const INVALID_CREDENTIALS_MARKER: &str = "The email or password provided is incorrect";

/// Browser time-zone offset the sign-in form submits, in minutes.
const TIME_OFFSET_MINUTES: &str = "480";

impl SessionClient {
    /// Authenticate with the portal.
    ///
    /// On success the session cookies are in the jar, the state is
    /// `Authenticated`, and the post-redirect portal root is recorded.
    /// A rejected form, a non-2xx reply, or a failed first keepalive all
    /// yield [`Error::AuthenticationFailed`] and leave the state
    /// `Unauthenticated`. Transport failures surface as
    /// [`Error::CommunicationFailure`] after local retries.
    pub async fn login(&self) -> Result<(), Error> {
        let _guard = self.login_lock.lock().await;
        self.login_locked().await
    }

    /// Log in unless the session is already authenticated.
    ///
    /// The state is checked after taking the login lock, so concurrent
    /// callers that all saw an expired session run a single handshake and
    /// the later ones reuse its session instead of resetting it.
    pub async fn ensure_authenticated(&self) -> Result<(), Error> {
        let _guard = self.login_lock.lock().await;
        if self.state() == SessionState::Authenticated {
            debug!(user = %self.username(), "session already renewed, skipping login");
            return Ok(());
        }
        self.login_locked().await
    }

    /// Login handshake. Callers hold `login_lock`.
    async fn login_locked(&self) -> Result<(), Error> {
        if let Some(retry_after) = self.rate_limit_remaining() {
            return Err(Error::RateLimited { retry_after });
        }

        self.reset_for_login();
        debug!(user = %self.username(), "logging in at {}", self.base_url());

        // Prime cookies and discover where the portal actually lives.
        let base = self.base_url().clone();
        let primed = self
            .with_retry("GET sign-in page", || {
                self.exchange(
                    Method::GET,
                    base.clone(),
                    RequestBody::Empty,
                    ACCEPT_HTML,
                    false,
                )
            })
            .await?;
        if let Some(err) = self.check_rate_limit(&primed) {
            return Err(err);
        }
        if !primed.status.is_success() {
            return Err(Error::UnexpectedResponse {
                status: primed.status.as_u16(),
            });
        }
        let effective_base = primed.url.join(base.path())?;

        let form = self.login_form();
        let submitted = self
            .with_retry("POST sign-in form", || {
                self.exchange(
                    Method::POST,
                    effective_base.clone(),
                    RequestBody::Form(form.clone()),
                    ACCEPT_HTML,
                    false,
                )
            })
            .await?;
        self.check_login_reply(&submitted)?;

        // A session that cannot survive one keepalive is a failed login.
        let generation = self.current_generation();
        if let Err(e) = self.probe(&effective_base, generation).await {
            warn!(error = %e, "new session rejected keepalive");
            self.reset_for_login();
            return Err(match e {
                Error::RateLimited { .. } => e,
                other => Error::AuthenticationFailed {
                    message: format!("session rejected keepalive: {other}"),
                },
            });
        }

        self.promote(effective_base);
        info!(user = %self.username(), "portal login successful");
        Ok(())
    }

    /// Lightweight liveness check of the current session.
    ///
    /// Same classification as [`get`](Self::get). A 401 drops the session
    /// to `Unauthenticated`; a 403 (or a bounce to the sign-in page) marks
    /// it `Expired`.
    pub async fn keepalive(&self) -> Result<(), Error> {
        if let Some(retry_after) = self.rate_limit_remaining() {
            return Err(Error::RateLimited { retry_after });
        }
        if self.state() != SessionState::Authenticated {
            return Err(Error::NotAuthenticated);
        }
        let generation = self.current_generation();
        let base = self.effective_base_url();
        match self.probe(&base, generation).await {
            Err(Error::SessionExpired { status: 401 }) => {
                self.demote(generation, SessionState::Unauthenticated);
                Err(Error::SessionExpired { status: 401 })
            }
            other => other,
        }
    }

    async fn probe(&self, base: &Url, generation: u64) -> Result<(), Error> {
        let url = base.join(KEEPALIVE_PATH)?;
        self.with_retry("keepalive", || async {
            let exchange = self
                .exchange(Method::GET, url.clone(), RequestBody::Empty, ACCEPT_JSON, true)
                .await?;
            self.classify(exchange, generation).map(|_| ())
        })
        .await
    }

    fn login_form(&self) -> Vec<(String, String)> {
        let credentials = self.credentials();
        vec![
            ("timeOffset".into(), TIME_OFFSET_MINUTES.into()),
            ("UserName".into(), credentials.username.clone()),
            (
                "Password".into(),
                credentials.password.expose_secret().to_owned(),
            ),
            ("RememberMe".into(), "false".into()),
        ]
    }

    fn check_login_reply(&self, reply: &Exchange) -> Result<(), Error> {
        if let Some(err) = self.check_rate_limit(reply) {
            return Err(err);
        }
        if !reply.status.is_success() {
            return Err(Error::AuthenticationFailed {
                message: format!("login failed (HTTP {})", reply.status),
            });
        }
        if reply.body.contains(INVALID_CREDENTIALS_MARKER) {
            return Err(Error::AuthenticationFailed {
                message: "invalid username or password".into(),
            });
        }
        Ok(())
    }
}
