// Session cookie storage
//
// The portal's login flow bounces through several redirects, each of which
// may set or clear cookies, so the session client drives redirects itself
// and feeds every response through this jar. Matching follows RFC 6265
// domain/path rules, with one portal cookie that must never be echoed back.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use reqwest::header::{HeaderMap, SET_COOKIE};
use url::Url;

/// Cookie the portal sets but rejects when sent back. Compared
/// case-insensitively, ignoring a leading `.`.
pub const EXCLUDED_COOKIE: &str = "ASPXAUTH_TRUEHOME_RT";

/// A stored session cookie.
///
/// Callers only ever see clones; the jar owns the authoritative copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    domain: String,
    host_only: bool,
    path: String,
    secure: bool,
    max_age: Option<Duration>,
    created_at: DateTime<Utc>,
}

impl Cookie {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Domain without a leading dot. For host-only cookies this is the
    /// host that set the cookie.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    /// When this cookie was last observed in a `Set-Cookie` header.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.max_age.is_some_and(|max_age| {
            let lifetime = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
            self.created_at
                .checked_add_signed(lifetime)
                .is_some_and(|deadline| deadline <= now)
        })
    }

    fn matches_host(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if self.host_only {
            return host == self.domain;
        }
        host == self.domain
            || host
                .strip_suffix(self.domain.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    }

    fn matches_path(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }
        request_path.starts_with(&self.path)
            && (self.path.ends_with('/')
                || request_path[self.path.len()..].starts_with('/'))
    }
}

/// Returns `true` for the cookie name that must never be sent.
fn is_excluded(name: &str) -> bool {
    name.trim_start_matches('.')
        .eq_ignore_ascii_case(EXCLUDED_COOKIE)
}

/// What a single `Set-Cookie` header asked the jar to do.
enum Directive {
    Store(Cookie),
    Delete(String),
}

/// Thread-safe cookie jar keyed by cookie name.
///
/// Concurrent `ingest` and `header_for` calls need no external locking.
/// Empty values, `Max-Age=0` and past `Expires` dates delete the named
/// cookie instead of storing it, so the jar never holds an empty value.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: DashMap<String, Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply every `Set-Cookie` header of a response received from `origin`.
    ///
    /// Malformed headers, and cookies whose `Domain` does not cover the
    /// origin host, are skipped. Returns how many headers were skipped so
    /// the caller can log it.
    pub fn ingest(&self, origin: &Url, headers: &HeaderMap) -> usize {
        let Some(origin_host) = origin.host_str() else {
            return headers.get_all(SET_COOKIE).iter().count();
        };
        let now = Utc::now();
        let mut skipped = 0;

        for raw in headers.get_all(SET_COOKIE) {
            let directive = raw
                .to_str()
                .ok()
                .and_then(|line| parse_set_cookie(line, origin_host, now));
            match directive {
                Some(Directive::Store(cookie)) => {
                    self.cookies.insert(cookie.name.clone(), cookie);
                }
                Some(Directive::Delete(name)) => {
                    self.cookies.remove(&name);
                }
                None => skipped += 1,
            }
        }
        skipped
    }

    /// Build the `Cookie` request header value for `target_url`.
    ///
    /// Returns an empty string when nothing matches or the URL does not
    /// parse. Expired cookies are dropped along the way.
    pub fn header_for(&self, target_url: &str) -> String {
        let Ok(url) = Url::parse(target_url) else {
            return String::new();
        };
        let Some(host) = url.host_str() else {
            return String::new();
        };
        let path = if url.path().is_empty() { "/" } else { url.path() };
        let secure_channel = url.scheme() == "https";

        let now = Utc::now();
        self.cookies.retain(|_, cookie| !cookie.is_expired(now));

        let mut selected: Vec<Cookie> = self
            .cookies
            .iter()
            .filter(|entry| {
                let cookie = entry.value();
                !is_excluded(&cookie.name)
                    && (secure_channel || !cookie.secure)
                    && cookie.matches_host(host)
                    && cookie.matches_path(path)
            })
            .map(|entry| entry.value().clone())
            .collect();

        // Longer paths first, then by name for a stable header.
        selected.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then_with(|| a.name.cmp(&b.name))
        });

        selected
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Look up a stored cookie by name.
    pub fn get(&self, name: &str) -> Option<Cookie> {
        self.cookies.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn clear(&self) {
        self.cookies.clear();
    }
}

fn parse_set_cookie(line: &str, origin_host: &str, now: DateTime<Utc>) -> Option<Directive> {
    let parsed = cookie::Cookie::parse(line).ok()?;
    let name = parsed.name().trim();
    if name.is_empty() {
        return None;
    }

    let value = parsed.value().trim();
    let max_age_secs = parsed.max_age().map(|d| d.whole_seconds());
    let expires_at = parsed
        .expires()
        .and_then(|e| e.datetime())
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0));

    let expired_by_date = max_age_secs.is_none() && expires_at.is_some_and(|at| at <= now);
    if value.is_empty() || max_age_secs.is_some_and(|secs| secs <= 0) || expired_by_date {
        return Some(Directive::Delete(name.to_owned()));
    }

    let origin_host = origin_host.to_ascii_lowercase();
    let (domain, host_only) = match parsed.domain() {
        Some(d) if !d.trim_start_matches('.').is_empty() => {
            let d = d.trim_start_matches('.').to_ascii_lowercase();
            let covers_origin = origin_host == d
                || origin_host
                    .strip_suffix(d.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'));
            if !covers_origin {
                return None;
            }
            (d, false)
        }
        _ => (origin_host, true),
    };

    let path = parsed
        .path()
        .filter(|p| p.starts_with('/'))
        .unwrap_or("/")
        .to_owned();

    let max_age = match (max_age_secs, expires_at) {
        (Some(secs), _) => u64::try_from(secs).ok().map(Duration::from_secs),
        (None, Some(at)) => (at - now).to_std().ok(),
        (None, None) => None,
    };

    Some(Directive::Store(Cookie {
        name: name.to_owned(),
        value: value.to_owned(),
        domain,
        host_only,
        path,
        secure: parsed.secure().unwrap_or(false),
        max_age,
        created_at: now,
    }))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    fn origin() -> Url {
        Url::parse("https://mytotalconnectcomfort.com/portal/").unwrap()
    }

    fn headers(lines: &[&str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for line in lines {
            map.append(SET_COOKIE, HeaderValue::from_str(line).unwrap());
        }
        map
    }

    #[test]
    fn stores_and_serves_matching_cookies() {
        let jar = CookieJar::new();
        let skipped = jar.ingest(
            &origin(),
            &headers(&["SessionId=abc; Path=/", "Portal=1; Path=/portal"]),
        );
        assert_eq!(skipped, 0);
        assert_eq!(jar.len(), 2);

        let header = jar.header_for("https://mytotalconnectcomfort.com/portal/Device/1");
        assert_eq!(header, "Portal=1; SessionId=abc");

        // Path mismatch excludes the /portal cookie.
        assert_eq!(
            jar.header_for("https://mytotalconnectcomfort.com/other"),
            "SessionId=abc"
        );
    }

    #[test]
    fn empty_value_deletes_existing_cookie() {
        let jar = CookieJar::new();
        jar.ingest(&origin(), &headers(&["Auth=token; Path=/"]));
        assert!(jar.get("Auth").is_some());

        jar.ingest(&origin(), &headers(&["Auth=; Path=/"]));
        assert!(jar.get("Auth").is_none());
        assert!(jar.is_empty());
    }

    #[test]
    fn blank_value_never_stored() {
        let jar = CookieJar::new();
        jar.ingest(&origin(), &headers(&["Blank=   ; Path=/"]));
        assert!(jar.is_empty());
    }

    #[test]
    fn zero_max_age_deletes() {
        let jar = CookieJar::new();
        jar.ingest(&origin(), &headers(&["Auth=token"]));
        jar.ingest(&origin(), &headers(&["Auth=token; Max-Age=0"]));
        assert!(jar.get("Auth").is_none());
    }

    #[test]
    fn past_expires_deletes() {
        let jar = CookieJar::new();
        jar.ingest(&origin(), &headers(&["Auth=token"]));
        jar.ingest(
            &origin(),
            &headers(&["Auth=token; Expires=Thu, 01 Jan 1970 00:00:00 GMT"]),
        );
        assert!(jar.get("Auth").is_none());
    }

    #[test]
    fn excluded_cookie_never_sent() {
        let jar = CookieJar::new();
        jar.ingest(
            &origin(),
            &headers(&[
                "ASPXAUTH_TRUEHOME_RT=bad; Path=/",
                ".aspxauth_truehome_rt=worse; Path=/",
                "Good=1; Path=/",
            ]),
        );
        let header = jar.header_for("https://mytotalconnectcomfort.com/portal/");
        assert_eq!(header, "Good=1");
    }

    #[test]
    fn domain_suffix_matching() {
        let jar = CookieJar::new();
        let origin = Url::parse("https://www.mytotalconnectcomfort.com/portal/").unwrap();
        jar.ingest(
            &origin,
            &headers(&[
                "Wide=1; Domain=.mytotalconnectcomfort.com; Path=/",
                "Narrow=2; Path=/",
            ]),
        );

        assert_eq!(
            jar.header_for("https://api.mytotalconnectcomfort.com/"),
            "Wide=1"
        );
        assert_eq!(
            jar.header_for("https://www.mytotalconnectcomfort.com/"),
            "Narrow=2; Wide=1"
        );
        assert_eq!(jar.header_for("https://evilmytotalconnectcomfort.com/"), "");
        assert_eq!(jar.header_for("https://example.com/"), "");
    }

    #[test]
    fn foreign_domain_is_skipped() {
        let jar = CookieJar::new();
        let skipped = jar.ingest(&origin(), &headers(&["Evil=1; Domain=example.com"]));
        assert_eq!(skipped, 1);
        assert!(jar.is_empty());
    }

    #[test]
    fn malformed_header_is_skipped() {
        let jar = CookieJar::new();
        let skipped = jar.ingest(&origin(), &headers(&["no-equals-sign", "Ok=1"]));
        assert_eq!(skipped, 1);
        assert_eq!(jar.len(), 1);
    }

    #[test]
    fn malformed_url_yields_empty_header() {
        let jar = CookieJar::new();
        jar.ingest(&origin(), &headers(&["Auth=token"]));
        assert_eq!(jar.header_for("not a url"), "");
        assert_eq!(jar.header_for(""), "");
    }

    #[test]
    fn secure_cookie_requires_https() {
        let jar = CookieJar::new();
        jar.ingest(&origin(), &headers(&["Sec=1; Secure", "Plain=2"]));
        assert_eq!(
            jar.header_for("http://mytotalconnectcomfort.com/"),
            "Plain=2"
        );
    }

    #[test]
    fn upsert_refreshes_value() {
        let jar = CookieJar::new();
        jar.ingest(&origin(), &headers(&["Auth=one"]));
        jar.ingest(&origin(), &headers(&["Auth=two; Max-Age=3600"]));
        let cookie = jar.get("Auth").unwrap();
        assert_eq!(cookie.value(), "two");
        assert_eq!(cookie.max_age(), Some(Duration::from_secs(3600)));
        assert_eq!(cookie.path(), "/");
        assert_eq!(cookie.domain(), "mytotalconnectcomfort.com");
    }

    #[test]
    fn clear_empties_jar() {
        let jar = CookieJar::new();
        jar.ingest(&origin(), &headers(&["A=1", "B=2"]));
        jar.clear();
        assert!(jar.is_empty());
        assert_eq!(jar.header_for("https://mytotalconnectcomfort.com/"), "");
    }
}
