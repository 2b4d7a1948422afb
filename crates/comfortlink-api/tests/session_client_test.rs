#![allow(clippy::unwrap_used)]
// Integration tests for `SessionClient` using wiremock.

use std::time::Duration;

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_partial_json, body_string_contains, header_regex, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use comfortlink_api::{
    ControlChange, Credentials, Error, RetryPolicy, SessionClient, SessionConfig, SessionState,
    TransportConfig,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn client_for(server: &MockServer, timeout: Duration) -> SessionClient {
    let base = Url::parse(&format!("{}/portal/", server.uri())).unwrap();
    let config = SessionConfig {
        base_url: base,
        transport: TransportConfig::default().with_timeout(timeout),
        retry: RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(10),
        },
        rate_limit_cooldown: Duration::from_secs(300),
    };
    let credentials = Credentials::new("user@example.com", "hunter2".to_string().into());
    SessionClient::new(config, credentials).unwrap()
}

async fn setup() -> (MockServer, SessionClient) {
    let server = MockServer::start().await;
    let client = client_for(&server, Duration::from_secs(5));
    (server, client)
}

/// Mount the sign-in page and a form POST that redirects into the portal.
async fn mount_sign_in(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/portal/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "ASP.NET_SessionId=prime; path=/")
                .set_body_string("<html>sign in</html>"),
        )
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/portal/"))
        .and(body_string_contains("UserName=user%40example.com"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/portal/Locations")
                .insert_header("set-cookie", ".ASPXAUTH_TRUEHOME=session-token; path=/; HttpOnly"),
        )
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/portal/Locations"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>locations</html>"))
        .mount(server)
        .await;
}

async fn mount_keepalive(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/portal/Account/KeepAlive"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

async fn logged_in() -> (MockServer, SessionClient) {
    let (server, client) = setup().await;
    mount_sign_in(&server).await;
    Mock::given(method("GET"))
        .and(path("/portal/Account/KeepAlive"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    client.login().await.unwrap();
    (server, client)
}

// ── Login ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_login_success_collects_cookies_across_redirects() {
    let (server, client) = setup().await;
    mount_sign_in(&server).await;

    Mock::given(method("GET"))
        .and(path("/portal/Account/KeepAlive"))
        .and(header_regex("cookie", r"\.ASPXAUTH_TRUEHOME=session-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client.login().await.unwrap();

    assert_eq!(client.state(), SessionState::Authenticated);
    assert_eq!(client.jar().get("ASP.NET_SessionId").unwrap().value(), "prime");
    assert_eq!(
        client.jar().get(".ASPXAUTH_TRUEHOME").unwrap().value(),
        "session-token"
    );
    assert_eq!(
        client.effective_base_url().as_str(),
        format!("{}/portal/", server.uri())
    );
}

#[tokio::test]
async fn test_login_invalid_credentials() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/portal/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/portal/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<div class=\"validation-summary-errors\">The email or password provided is incorrect.</div>",
        ))
        .mount(&server)
        .await;

    let result = client.login().await;
    assert!(
        matches!(result, Err(Error::AuthenticationFailed { .. })),
        "expected AuthenticationFailed, got: {result:?}"
    );
    assert_eq!(client.state(), SessionState::Unauthenticated);

    // The session never silently becomes usable.
    let result = client.get("Location/GetLocationListData?page=1&filter=").await;
    assert!(matches!(result, Err(Error::NotAuthenticated)), "got: {result:?}");
}

#[tokio::test]
async fn test_login_non_2xx_is_authentication_failure() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/portal/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/portal/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = client.login().await;
    assert!(matches!(result, Err(Error::AuthenticationFailed { .. })), "got: {result:?}");
    assert_eq!(client.state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn test_login_fails_when_keepalive_rejected() {
    let (server, client) = setup().await;
    mount_sign_in(&server).await;
    mount_keepalive(&server, 401).await;

    let result = client.login().await;
    assert!(matches!(result, Err(Error::AuthenticationFailed { .. })), "got: {result:?}");
    assert_eq!(client.state(), SessionState::Unauthenticated);
    assert!(client.jar().is_empty());
}

#[tokio::test]
async fn test_login_rate_limited() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/portal/"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "120"))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.login().await;
    match result {
        Err(Error::RateLimited { retry_after }) => assert_eq!(retry_after, Duration::from_secs(120)),
        other => panic!("expected RateLimited, got: {other:?}"),
    }
    assert_eq!(client.state(), SessionState::RateLimited);

    // Cool-down is honoured without touching the network.
    assert!(matches!(client.login().await, Err(Error::RateLimited { .. })));
}

#[tokio::test]
async fn test_concurrent_ensure_authenticated_logs_in_once() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/portal/"))
        .respond_with(ResponseTemplate::new(200).insert_header("set-cookie", "ASP.NET_SessionId=prime; path=/"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/portal/"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/portal/Locations")
                .insert_header("set-cookie", ".ASPXAUTH_TRUEHOME=session-token; path=/")
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/portal/Locations"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    mount_keepalive(&server, 200).await;

    let (first, second) = tokio::join!(client.ensure_authenticated(), client.ensure_authenticated());
    first.unwrap();
    second.unwrap();
    assert_eq!(client.state(), SessionState::Authenticated);
    assert_eq!(
        client.jar().get(".ASPXAUTH_TRUEHOME").unwrap().value(),
        "session-token"
    );

    // Already authenticated: no handshake at all.
    client.ensure_authenticated().await.unwrap();
}

// ── Data requests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_get_requires_authentication() {
    let (_server, client) = setup().await;
    let result = client.get("Account/KeepAlive").await;
    assert!(matches!(result, Err(Error::NotAuthenticated)));
}

#[tokio::test]
async fn test_list_locations() {
    let (server, client) = logged_in().await;

    Mock::given(method("POST"))
        .and(path("/portal/Location/GetLocationListData"))
        .and(header_regex("x-requested-with", "XMLHttpRequest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "LocationID": 1,
                "Name": "Home",
                "Devices": [
                    {"DeviceID": 10, "Name": "Upstairs", "MacID": "00D02D000010"},
                    {"DeviceID": 11, "Name": "Downstairs"}
                ]
            },
            {"LocationID": 2, "Name": "Cabin", "Devices": []}
        ])))
        .mount(&server)
        .await;

    let locations = client.list_locations().await.unwrap();
    assert_eq!(locations.len(), 2);
    assert_eq!(locations[0].devices.len(), 2);
    assert_eq!(locations[0].devices[1].mac_id, None);
    assert_eq!(locations[1].name, "Cabin");
}

#[tokio::test]
async fn test_device_detail() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/portal/Device/CheckDataSession/10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "deviceLive": true,
            "communicationLost": false,
            "latestData": {
                "uiData": {"DispTemperature": 70.5, "SystemSwitchPosition": 1},
                "fanData": {"fanMode": 0}
            }
        })))
        .mount(&server)
        .await;

    let detail = client.device_detail(10).await.unwrap();
    assert!(detail.device_live);
    let snapshot = detail.snapshot();
    assert_eq!(snapshot["DispTemperature"], 70.5);
    assert_eq!(snapshot["fanMode"], 0);
}

#[tokio::test]
async fn test_api_rejected() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/portal/Device/CheckDataSession/10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false})))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.device_detail(10).await;
    assert!(matches!(result, Err(Error::ApiRejected { .. })), "got: {result:?}");
    assert_eq!(client.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_session_expired_on_401() {
    let (server, client) = logged_in().await;

    Mock::given(method("POST"))
        .and(path("/portal/Location/GetLocationListData"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.list_locations().await;
    assert!(matches!(result, Err(Error::SessionExpired { status: 401 })), "got: {result:?}");
    assert_eq!(client.state(), SessionState::Expired);
    assert!(matches!(client.list_locations().await, Err(Error::NotAuthenticated)));
}

#[tokio::test]
async fn test_redirect_to_sign_in_means_expired() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/portal/Device/CheckDataSession/10"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/portal/"))
        .mount(&server)
        .await;

    let result = client.device_detail(10).await;
    assert!(matches!(result, Err(Error::SessionExpired { status: 302 })), "got: {result:?}");
    assert_eq!(client.state(), SessionState::Expired);
}

#[tokio::test]
async fn test_rate_limited_starts_cool_down() {
    let (server, client) = logged_in().await;

    Mock::given(method("POST"))
        .and(path("/portal/Location/GetLocationListData"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.list_locations().await;
    match result {
        Err(Error::RateLimited { retry_after }) => assert_eq!(retry_after, Duration::from_secs(300)),
        other => panic!("expected RateLimited, got: {other:?}"),
    }
    assert_eq!(client.state(), SessionState::RateLimited);
    assert!(client.rate_limit_remaining().is_some());

    // Second call fails fast; the mock's expect(1) verifies no new request.
    assert!(matches!(client.list_locations().await, Err(Error::RateLimited { .. })));
}

#[tokio::test]
async fn test_rate_limit_body_marker() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/portal/Device/CheckDataSession/10"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Too Many Attempts</h1>"))
        .mount(&server)
        .await;

    let result = client.device_detail(10).await;
    assert!(matches!(result, Err(Error::RateLimited { .. })), "got: {result:?}");
}

#[tokio::test]
async fn test_unexpected_status() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/portal/Device/CheckDataSession/10"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let result = client.device_detail(10).await;
    assert!(matches!(result, Err(Error::UnexpectedResponse { status: 500 })), "got: {result:?}");
    assert_eq!(client.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_transport_failure_retried_three_times() {
    let server = MockServer::start().await;
    let client = client_for(&server, Duration::from_millis(200));
    mount_sign_in(&server).await;
    Mock::given(method("GET"))
        .and(path("/portal/Account/KeepAlive"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    client.login().await.unwrap();

    Mock::given(method("GET"))
        .and(path("/portal/Device/CheckDataSession/10"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .expect(3)
        .mount(&server)
        .await;

    let result = client.device_detail(10).await;
    assert!(
        matches!(result, Err(Error::CommunicationFailure(_))),
        "got: {result:?}"
    );
    // Transport failures leave the session alone.
    assert_eq!(client.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_malformed_body_retried_then_surfaced() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/portal/Device/CheckDataSession/10"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(3)
        .mount(&server)
        .await;

    let result = client.device_detail(10).await;
    assert!(matches!(result, Err(Error::MalformedResponse { .. })), "got: {result:?}");
}

#[tokio::test]
async fn test_submit_control() {
    let (server, client) = logged_in().await;

    Mock::given(method("POST"))
        .and(path("/portal/Device/SubmitControlScreenChanges"))
        .and(body_partial_json(json!({"DeviceID": 10, "HeatSetpoint": 69.0, "CoolSetpoint": null})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let change = ControlChange {
        heat_setpoint: Some(69.0),
        status_heat: Some(1),
        ..ControlChange::for_device(10)
    };
    client.submit_control(&change).await.unwrap();
}

// ── Keepalive & close ───────────────────────────────────────────────

#[tokio::test]
async fn test_keepalive_403_marks_expired() {
    let (server, client) = logged_in().await;
    mount_keepalive(&server, 403).await;

    let result = client.keepalive().await;
    assert!(matches!(result, Err(Error::SessionExpired { status: 403 })), "got: {result:?}");
    assert_eq!(client.state(), SessionState::Expired);
}

#[tokio::test]
async fn test_keepalive_401_drops_to_unauthenticated() {
    let (server, client) = logged_in().await;
    mount_keepalive(&server, 401).await;

    let result = client.keepalive().await;
    assert!(matches!(result, Err(Error::SessionExpired { status: 401 })), "got: {result:?}");
    assert_eq!(client.state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (_server, client) = logged_in().await;
    assert!(!client.jar().is_empty());

    client.close();
    client.close();

    assert_eq!(client.state(), SessionState::Unauthenticated);
    assert!(client.jar().is_empty());
    assert!(matches!(client.get("Account/KeepAlive").await, Err(Error::NotAuthenticated)));
}
