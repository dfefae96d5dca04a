//! OAuthGate - session-backed OAuth2 login gate for axum
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Gate middleware (Axum)                    │
//! │  - Route classification (ignored / login / callback)        │
//! │  - Encrypted session cookie                                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     OAuth factory                            │
//! │  - Per-request provider clients (oauth2 crate)              │
//! │  - Session-backed token storage                             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User service                            │
//! │  - Account creation on login                                │
//! │  - Token -> user lookup                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `auth`: the gate, its session store and provider clients
//! - `api`: handlers served behind the gate
//! - `config`: Configuration management
//! - `error`: Error types
//! - `metrics`: Prometheus counters

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

use std::sync::Arc;

use auth::{AuthGate, ClientBuilder, InMemoryUserService, Oauth2ClientBuilder, UserService};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::AppConfig>,

    /// The login gate; also the middleware state
    pub gate: Arc<AuthGate>,

    pub users: Arc<dyn UserService>,
}

impl AppState {
    /// Initialize application state with the built-in components
    ///
    /// # Errors
    /// Returns error if the HTTP client or the gate cannot be built
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        let builder = Arc::new(Oauth2ClientBuilder::new()?);
        let users = Arc::new(InMemoryUserService::new(
            config.users.allowed_logins.clone(),
            config.gate.default_role.clone(),
        ));

        Self::with_components(config, builder, users)
    }

    /// Initialize application state with custom provider clients and users
    pub fn with_components(
        config: config::AppConfig,
        builder: Arc<dyn ClientBuilder>,
        users: Arc<dyn UserService>,
    ) -> Result<Self, error::AppError> {
        let gate = AuthGate::new(&config, builder, users.clone())?;

        tracing::info!(
            providers = ?config.gate.allowed_providers,
            ignored = ?config.gate.ignored_routes,
            "Auth gate initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            gate: Arc::new(gate),
            users,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::{Router, middleware};
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::account_router())
        .merge(api::metrics_router())
        .layer(middleware::from_fn_with_state(
            state.gate.clone(),
            auth::oauth_gate,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}
