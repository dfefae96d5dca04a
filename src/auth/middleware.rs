//! Gate middleware
//!
//! Runs the `AuthGate` in front of every route and attaches the resolved
//! `User` to request extensions.

use std::sync::Arc;

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{
        HeaderValue, Request,
        header::{AUTHORIZATION, SET_COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::gate::{AuthGate, GateOutcome};
use super::store::SessionValueStore;
use super::user::User;
use crate::error::AppError;
use crate::metrics::GATE_REQUESTS_TOTAL;

/// Middleware running the OAuth gate
///
/// # Usage
/// ```ignore
/// let app = Router::new()
///     .route("/me", get(me))
///     .layer(middleware::from_fn_with_state(gate, oauth_gate));
/// ```
pub async fn oauth_gate(
    State(gate): State<Arc<AuthGate>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // Ignored routes never touch the session
    if gate.is_ignored(request.uri().path()) {
        GATE_REQUESTS_TOTAL.with_label_values(&["ignored"]).inc();
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let mut factory = match gate.factory(&parts, gate.load_session(&parts)) {
        Ok(factory) => factory,
        Err(error) => {
            tracing::warn!(%error, path = %parts.uri.path(), "Cannot derive request URL");
            return gate.denial("bad_request_url");
        }
    };

    let outcome = gate.process(&parts, &mut factory).await;
    let storage = factory.into_storage();

    let mut response = match outcome {
        Ok(GateOutcome::Continue {
            user,
            authorization,
        }) => {
            if let Some(user) = user {
                parts.extensions.insert(user);
            }
            let mut response = next.run(Request::from_parts(parts, body)).await;
            if let Some(value) = authorization.and_then(|a| HeaderValue::from_str(&a).ok()) {
                response.headers_mut().insert(AUTHORIZATION, value);
            }
            response
        }
        Ok(GateOutcome::Respond(response)) => response,
        Err(error) => {
            tracing::warn!(%error, path = %parts.uri.path(), "Gate rejected request");
            error.into_response()
        }
    };

    save_session(&gate, &storage, &mut response);
    response
}

fn save_session(gate: &AuthGate, storage: &SessionValueStore, response: &mut Response) {
    if !storage.is_dirty() {
        return;
    }

    match gate.session_cookie().set_cookie_header(storage.data()) {
        Ok(cookie) => {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        Err(error) => {
            tracing::error!(%error, "Failed to write session cookie");
        }
    }
}

/// Extractor for the signed-in user
///
/// Rejects guests with 401.
///
/// # Usage
/// ```ignore
/// async fn handler(CurrentUser(user): CurrentUser) -> impl IntoResponse {
///     format!("Hello, {}", user.login.unwrap_or_default())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<User>()
            .filter(|user| !user.is_guest())
            .cloned()
            .map(CurrentUser)
            .ok_or(AppError::Unauthorized)
    }
}

/// Optional signed-in user; `None` for guests and ignored routes
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .extensions
            .get::<User>()
            .filter(|user| !user.is_guest())
            .cloned();

        Ok(MaybeUser(user))
    }
}
