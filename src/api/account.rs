//! Index and current-user endpoints

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::AppState;
use crate::auth::{CurrentUser, MaybeUser, User};

#[derive(Debug, Serialize)]
struct IndexResponse {
    /// Login start path per allowed provider
    login: Vec<String>,
}

/// Login links; `/` is on the default ignore-list so no user is attached
async fn index(State(state): State<AppState>) -> Json<IndexResponse> {
    let login = state
        .config
        .gate
        .allowed_providers
        .iter()
        .map(|provider| format!("/auth/{}", provider.to_lowercase()))
        .collect();

    Json(IndexResponse { login })
}

/// The signed-in user; guests get 401
async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

#[derive(Debug, Serialize)]
struct WhoAmI {
    guest: bool,
    login: Option<String>,
    provider: Option<String>,
}

/// Like `/me` but answers guests too
async fn whoami(MaybeUser(user): MaybeUser) -> Json<WhoAmI> {
    Json(WhoAmI {
        guest: user.is_none(),
        login: user.as_ref().and_then(|u| u.login.clone()),
        provider: user.and_then(|u| u.provider),
    })
}

pub fn account_router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/me", get(me))
        .route("/whoami", get(whoami))
}
