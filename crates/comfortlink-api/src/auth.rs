use secrecy::SecretString;

/// Account credentials for the portal.
///
/// Immutable for the lifetime of a [`SessionClient`](crate::SessionClient);
/// a credential change means building a new client.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

/// Observable state of a portal session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session: never logged in, login failed, or closed.
    Unauthenticated,
    /// Logged in and the last keepalive/request was accepted.
    Authenticated,
    /// The portal rejected the session cookie; a fresh login is needed.
    Expired,
    /// Inside a rate-limit cool-down. Reverts to the previous state once
    /// the deadline passes.
    RateLimited,
}
