//! Common test utilities for E2E tests
#![allow(dead_code)]

use std::collections::HashMap;

use axum::{
    Form, Json, Router,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use oauthgate::{AppState, config};
use serde_json::json;
use tokio::net::TcpListener;

/// Authorization code the fake provider accepts
pub const GOOD_CODE: &str = "good-code";
/// Access token the fake provider issues for `GOOD_CODE`
pub const PROVIDER_TOKEN: &str = "gho_test_token";

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub provider_addr: String,
    pub state: AppState,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting the default test configuration
    pub async fn with_config(configure: impl FnOnce(&mut config::AppConfig)) -> Self {
        oauthgate::metrics::init_metrics();

        let provider_addr = spawn(fake_provider_router()).await;

        let mut config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "test.example.com".to_string(),
                protocol: "http".to_string(),
            },
            gate: config::GateConfig::default(),
            providers: HashMap::from([(
                "github".to_string(),
                config::ProviderConfig {
                    client_id: "test-client-id".to_string(),
                    client_secret: "test-client-secret".to_string(),
                    authorize_url: Some(format!("{provider_addr}/login/oauth/authorize")),
                    token_url: Some(format!("{provider_addr}/login/oauth/access_token")),
                    api_base_url: Some(format!("{provider_addr}/api/")),
                },
            )]),
            session: config::SessionConfig {
                secret: "test-secret-key-32-bytes-long!!!".to_string(),
                cookie_name: "oauthgate_session".to_string(),
                bucket: "oauth".to_string(),
                max_age: 3600,
            },
            users: config::UsersConfig::default(),
            logging: config::LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        };
        configure(&mut config);

        let state = AppState::new(config).unwrap();
        let addr = spawn(oauthgate::build_router(state.clone())).await;

        Self {
            addr,
            provider_addr,
            state,
            client: no_redirect_client(),
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Run login start and callback; returns the session cookie and user token
    pub async fn login(&self) -> (String, String) {
        let start = self
            .client
            .get(self.url("/auth/github?return=/whoami"))
            .send()
            .await
            .unwrap();
        assert_eq!(start.status(), 302);
        let cookie = session_cookie(&start).expect("login start sets a session cookie");
        let state = query_value(location(&start).unwrap(), "state").unwrap();

        let callback = self
            .client
            .get(self.url(&format!(
                "/auth/github/callback?code={GOOD_CODE}&state={state}"
            )))
            .header("cookie", cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(callback.status(), 200);

        let token = callback
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .expect("callback returns the user token")
            .to_string();
        let cookie = session_cookie(&callback).expect("callback refreshes the session cookie");

        (cookie, token)
    }
}

async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Wait a bit for server to start
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    addr
}

/// HTTP client that does not follow redirects
pub fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("failed to build no-redirect client")
}

/// `name=value` of the session cookie set by a response
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("oauthgate_session="))
        .and_then(|v| v.split(';').next())
        .map(ToOwned::to_owned)
}

pub fn location(response: &reqwest::Response) -> Option<&str> {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
}

pub fn query_value(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Minimal OAuth provider: token endpoint and profile API
fn fake_provider_router() -> Router {
    Router::new()
        .route("/login/oauth/access_token", post(token_endpoint))
        .route("/api/user", get(user_endpoint))
}

async fn token_endpoint(Form(form): Form<HashMap<String, String>>) -> Response {
    if form.get("code").map(String::as_str) != Some(GOOD_CODE) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "bad_verification_code"})),
        )
            .into_response();
    }

    Json(json!({
        "access_token": PROVIDER_TOKEN,
        "token_type": "bearer",
        "scope": "user",
    }))
    .into_response()
}

async fn user_endpoint(headers: HeaderMap) -> Response {
    let authorized = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {PROVIDER_TOKEN}").as_str());

    if !authorized {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    Json(json!({"id": 42, "login": "octocat", "name": "The Octocat"})).into_response()
}
