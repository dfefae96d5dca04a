//! Auth gate
//!
//! Classifies each request and drives the OAuth login dance:
//!
//! ```text
//! GET /auth/{provider}           -> 302 to the provider (Login-Start)
//! GET /auth/{provider}/callback  -> code exchange, user, token (Login-Callback)
//! anything else                  -> resolve user, continue (Normal)
//! ```
//!
//! Failures other than an unusable `return` URL answer 403 with a
//! `Location` pointing at the unauthenticated route.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, LOCATION};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use super::credentials::CredentialStore;
use super::factory::OAuthFactory;
use super::provider::ClientBuilder;
use super::routes::{RouteKind, RouteMatcher, bearer_credential, request_url, validate_return_url};
use super::session::SessionCookie;
use super::store::{SessionValueStore, TokenStorage};
use super::token::random_token;
use super::user::{User, UserService};
use crate::config::{AppConfig, CallbackStatus, GateConfig};
use crate::error::AppError;
use crate::metrics::{DENIALS_TOTAL, GATE_REQUESTS_TOTAL, LOGINS_TOTAL};

/// Post-login destination saved at login start
pub const ORIGINAL_DESTINATION: &str = "originalDestination";
/// Older name of `ORIGINAL_DESTINATION`, still honoured on callback
pub const LEGACY_RETURN_URL: &str = "oauth_return_url";
/// Provider the session authenticated with
pub const SERVICE_TYPE: &str = "oauth_service_type";
/// Single-use CSRF value bound to a login attempt
pub const CSRF_STATE: &str = "oauth_state";
/// Application token of the signed-in user
pub const USER_TOKEN: &str = "oauth_user_token";

const DEFAULT_DESTINATION: &str = "/";

/// Result of running the gate on one request
#[derive(Debug)]
pub enum GateOutcome {
    /// Hand the request to the next handler
    Continue {
        /// Identity to attach; `None` for ignored routes
        user: Option<User>,
        /// Value for the response `Authorization` header
        authorization: Option<String>,
    },
    /// Answer without calling the next handler
    Respond(Response),
}

/// The authentication gate shared by all requests
pub struct AuthGate {
    config: GateConfig,
    routes: RouteMatcher,
    credentials: Arc<CredentialStore>,
    builder: Arc<dyn ClientBuilder>,
    users: Arc<dyn UserService>,
    session: SessionCookie,
    bucket: String,
    default_scheme: String,
    default_host: String,
}

impl AuthGate {
    /// # Errors
    /// Returns `Config` if an ignore-list pattern does not compile
    pub fn new(
        config: &AppConfig,
        builder: Arc<dyn ClientBuilder>,
        users: Arc<dyn UserService>,
    ) -> Result<Self, AppError> {
        let secure = config.server.protocol.eq_ignore_ascii_case("https");

        Ok(Self {
            routes: RouteMatcher::new(&config.gate.ignored_routes)?,
            config: config.gate.clone(),
            credentials: Arc::new(config.credentials()),
            builder,
            users,
            session: SessionCookie::new(&config.session, secure),
            bucket: config.session.bucket.clone(),
            default_scheme: config.server.protocol.clone(),
            default_host: config.server.domain.clone(),
        })
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn session_cookie(&self) -> &SessionCookie {
        &self.session
    }

    pub fn classify(&self, path: &str) -> RouteKind {
        self.routes.classify(path)
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.routes.is_ignored(path)
    }

    /// Session store for this request, read from its cookie
    pub fn load_session(&self, parts: &Parts) -> SessionValueStore {
        SessionValueStore::new(self.session.load(&parts.headers), self.bucket.clone())
    }

    /// Fresh factory bound to this request and session
    pub fn factory(
        &self,
        parts: &Parts,
        storage: SessionValueStore,
    ) -> Result<OAuthFactory, AppError> {
        let current_url = request_url(
            &parts.uri,
            &parts.headers,
            &self.default_scheme,
            &self.default_host,
        )?;

        Ok(OAuthFactory::new(
            self.credentials.clone(),
            self.builder.clone(),
            current_url,
            storage,
        )
        .with_default_scopes(self.config.scopes.clone()))
    }

    /// Run the gate for one request
    ///
    /// # Errors
    /// Only an unusable `return` URL on login start is an error; every other
    /// failure is answered with a 403 redirect.
    pub async fn process(
        &self,
        parts: &Parts,
        factory: &mut OAuthFactory,
    ) -> Result<GateOutcome, AppError> {
        let kind = self.classify(parts.uri.path());
        GATE_REQUESTS_TOTAL.with_label_values(&[kind.label()]).inc();
        tracing::debug!(path = %parts.uri.path(), kind = kind.label(), "Gate classified request");

        match kind {
            RouteKind::Ignored => Ok(GateOutcome::Continue {
                user: None,
                authorization: None,
            }),
            RouteKind::LoginStart { provider } => self.login_start(&provider, parts, factory),
            RouteKind::LoginCallback { provider } => {
                Ok(self.login_callback(&provider, parts, factory).await)
            }
            RouteKind::Normal => Ok(self.authenticate(parts, factory).await),
        }
    }

    fn login_start(
        &self,
        provider: &str,
        parts: &Parts,
        factory: &mut OAuthFactory,
    ) -> Result<GateOutcome, AppError> {
        if !self.is_allowed(provider) {
            tracing::warn!(provider = %provider, "Login requested for unknown provider");
            return Ok(self.deny("unknown_provider"));
        }

        let query = query_params(&parts.uri);
        let return_url = query.get("return");
        if let Some(return_url) = return_url {
            if self.config.validate_return_url {
                validate_return_url(return_url, &self.config.allowed_return_hosts)?;
            }
        }

        let Some(handle) = factory.get_or_create_by_type(provider) else {
            tracing::warn!(provider = %provider, "No OAuth client available for provider");
            return Ok(self.deny("missing_credentials"));
        };

        if let Some(destination) = return_url.cloned().or_else(|| self.config.return_route.clone())
        {
            factory.store_value(ORIGINAL_DESTINATION, destination);
        }

        let state = self.config.csrf_state.then(random_token);
        if let Some(state) = &state {
            factory.store_value(CSRF_STATE, state.clone());
        }

        let location = handle.authorization_uri(state);
        LOGINS_TOTAL
            .with_label_values(&[handle.provider_name(), "started"])
            .inc();
        tracing::info!(provider = %handle.provider_name(), "Redirecting to OAuth provider");

        Ok(GateOutcome::Respond(
            (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response(),
        ))
    }

    async fn login_callback(
        &self,
        provider: &str,
        parts: &Parts,
        factory: &mut OAuthFactory,
    ) -> GateOutcome {
        if !self.is_allowed(provider) {
            tracing::warn!(provider = %provider, "Callback for unknown provider");
            return self.deny("unknown_provider");
        }

        let query = query_params(&parts.uri);

        if self.config.csrf_state {
            let expected = factory.take_value(CSRF_STATE);
            let verified = match (expected.as_deref(), query.get("state")) {
                (Some(expected), Some(given)) => {
                    constant_time_eq(expected.as_bytes(), given.as_bytes())
                }
                _ => false,
            };
            if !verified {
                tracing::warn!(provider = %provider, "OAuth state mismatch");
                return self.deny("csrf_state");
            }
        }

        let Some(code) = query.get("code").filter(|code| !code.is_empty()) else {
            tracing::warn!(provider = %provider, "Callback without authorization code");
            return self.deny("missing_code");
        };

        let Some(handle) = factory.get_or_create_by_type(provider) else {
            return self.deny("missing_credentials");
        };
        let provider = handle.provider_name().to_string();

        let token = match handle.request_access_token(code).await {
            Ok(token) => token,
            Err(error) => {
                tracing::warn!(provider = %provider, %error, "Authorization code exchange failed");
                LOGINS_TOTAL.with_label_values(&[provider.as_str(), "failed"]).inc();
                return self.deny("token_exchange");
            }
        };
        factory.storage_mut().store_access_token(&provider, &token);

        let user = match self.users.create_user(&handle).await {
            Ok(user) => user,
            Err(error) => {
                tracing::warn!(provider = %provider, %error, "User could not be created");
                factory.storage_mut().clear_token(&provider);
                LOGINS_TOTAL.with_label_values(&[provider.as_str(), "rejected"]).inc();
                return self.deny("user_rejected");
            }
        };

        let saved = factory.take_value(ORIGINAL_DESTINATION);
        let legacy = factory.take_value(LEGACY_RETURN_URL);
        let destination = saved
            .or(legacy)
            .unwrap_or_else(|| DEFAULT_DESTINATION.to_string());

        factory.store_value(SERVICE_TYPE, provider.clone());
        match &user.token {
            Some(user_token) => factory.store_value(USER_TOKEN, user_token.clone()),
            None => factory.del_value(USER_TOKEN),
        }

        LOGINS_TOTAL.with_label_values(&[provider.as_str(), "succeeded"]).inc();
        tracing::info!(
            provider = %provider,
            user_id = ?user.id,
            destination = %destination,
            "OAuth login completed"
        );

        let status = match self.config.callback_status {
            CallbackStatus::Ok => StatusCode::OK,
            CallbackStatus::Redirect => StatusCode::FOUND,
        };
        let mut response = status.into_response();
        let location = HeaderValue::from_str(&destination)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_DESTINATION));
        response.headers_mut().insert(LOCATION, location);
        if let Some(value) = user
            .token
            .as_ref()
            .and_then(|token| HeaderValue::from_str(&format!("Bearer {token}")).ok())
        {
            response.headers_mut().insert(AUTHORIZATION, value);
        }

        GateOutcome::Respond(response)
    }

    async fn authenticate(&self, parts: &Parts, factory: &mut OAuthFactory) -> GateOutcome {
        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_credential)
            .map(ToOwned::to_owned);

        let token = match &presented {
            Some(token) => Some(token.clone()),
            None => self.session_token(factory),
        };

        let user = self.users.find_or_new(token).await;
        if user.is_guest() && self.config.deny_unauthenticated {
            tracing::debug!(path = %parts.uri.path(), "Denying unauthenticated request");
            return self.deny("unauthenticated");
        }

        let authorization = user
            .token
            .as_ref()
            .filter(|token| presented.as_deref() != Some(token.as_str()))
            .map(|token| format!("Bearer {token}"));

        GateOutcome::Continue {
            user: Some(user),
            authorization,
        }
    }

    /// User token remembered by an authenticated session
    fn session_token(&self, factory: &mut OAuthFactory) -> Option<String> {
        let provider = factory.get_value(SERVICE_TYPE)?.to_string();
        if !factory.is_authenticated(&provider) {
            return None;
        }
        factory.get_value(USER_TOKEN).map(ToOwned::to_owned)
    }

    fn is_allowed(&self, provider: &str) -> bool {
        self.config
            .allowed_providers
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(provider))
    }

    fn deny(&self, reason: &'static str) -> GateOutcome {
        GateOutcome::Respond(self.denial(reason))
    }

    /// 403 pointing at the unauthenticated route
    pub fn denial(&self, reason: &'static str) -> Response {
        DENIALS_TOTAL.with_label_values(&[reason]).inc();
        (
            StatusCode::FORBIDDEN,
            [(LOCATION, self.config.unauthenticated_route.clone())],
        )
            .into_response()
    }
}

/// Query parameters; the first occurrence of a name wins
fn query_params(uri: &Uri) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (name, value) in url::form_urlencoded::parse(uri.query().unwrap_or("").as_bytes()) {
        params
            .entry(name.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0_u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
