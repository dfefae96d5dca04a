//! Application users
//!
//! `UserService` maps a logged-in provider account or a bearer token to an
//! application `User`. `InMemoryUserService` is the built-in implementation
//! used by the binary; applications with a database plug in their own.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::factory::ServiceHandle;
use super::token::random_token;
use crate::error::AppError;

/// Identity attached to every request that passes the gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Application user ID; `None` for guests
    pub id: Option<String>,
    /// Provider login name (e.g. GitHub username)
    pub login: Option<String>,
    /// Provider the user signed in with
    pub provider: Option<String>,
    /// Bearer token issued to the user
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub role: String,
    /// Raw provider profile
    pub profile: serde_json::Value,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn guest(role: impl Into<String>) -> Self {
        Self {
            id: None,
            login: None,
            provider: None,
            token: None,
            role: role.into(),
            profile: serde_json::Value::Null,
            created_at: None,
        }
    }

    pub fn is_guest(&self) -> bool {
        self.id.is_none()
    }
}

/// User persistence used by the gate
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserService: Send + Sync {
    /// Create (or update) the user behind a freshly authenticated service
    ///
    /// This is also where membership checks belong (e.g. allowed logins or
    /// organization membership).
    async fn create_user(&self, service: &ServiceHandle) -> Result<User, AppError>;

    /// Find the user owning `token`, or a guest when there is none
    async fn find_or_new(&self, token: Option<String>) -> User;
}

#[derive(Default)]
struct UserIndex {
    /// token -> user
    by_token: HashMap<String, User>,
    /// (provider, provider account id) -> token
    by_account: HashMap<(String, String), String>,
}

/// Process-local `UserService`
pub struct InMemoryUserService {
    index: RwLock<UserIndex>,
    allowed_logins: Vec<String>,
    default_role: String,
}

impl InMemoryUserService {
    /// # Arguments
    /// * `allowed_logins` - Logins permitted to sign in; empty allows all
    /// * `default_role` - Role for guests
    pub fn new(allowed_logins: Vec<String>, default_role: impl Into<String>) -> Self {
        Self {
            index: RwLock::new(UserIndex::default()),
            allowed_logins,
            default_role: default_role.into(),
        }
    }

    fn is_allowed(&self, login: Option<&str>) -> bool {
        if self.allowed_logins.is_empty() {
            return true;
        }
        login.is_some_and(|login| {
            self.allowed_logins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(login))
        })
    }
}

#[async_trait]
impl UserService for InMemoryUserService {
    async fn create_user(&self, service: &ServiceHandle) -> Result<User, AppError> {
        let profile = service.fetch_profile().await?;
        let provider = service.provider_name().to_string();

        let account_id = profile_string(&profile, &["id", "sub"]).ok_or_else(|| {
            AppError::Internal(anyhow::anyhow!("{provider} profile has no account id"))
        })?;
        let login = profile_string(&profile, &["login", "username", "email"]);

        if !self.is_allowed(login.as_deref()) {
            tracing::warn!(
                provider = %provider,
                login = ?login,
                "Login not permitted"
            );
            return Err(AppError::Forbidden);
        }

        let mut index = self.index.write().await;
        let account = (provider.clone(), account_id);

        // Re-login keeps the account's token so other sessions stay signed in
        let previous = index
            .by_account
            .get(&account)
            .and_then(|token| index.by_token.get(token))
            .cloned();
        let token = previous
            .as_ref()
            .and_then(|user| user.token.clone())
            .unwrap_or_else(random_token);

        let user = User {
            id: Some(
                previous
                    .as_ref()
                    .and_then(|user| user.id.clone())
                    .unwrap_or_else(|| ulid::Ulid::new().to_string()),
            ),
            login,
            provider: Some(provider),
            token: Some(token.clone()),
            role: "user".to_string(),
            profile,
            created_at: Some(
                previous
                    .and_then(|user| user.created_at)
                    .unwrap_or_else(Utc::now),
            ),
        };

        index.by_account.insert(account, token.clone());
        index.by_token.insert(token, user.clone());

        tracing::info!(user_id = ?user.id, login = ?user.login, "User signed in");
        Ok(user)
    }

    async fn find_or_new(&self, token: Option<String>) -> User {
        if let Some(token) = token {
            if let Some(user) = self.index.read().await.by_token.get(&token) {
                return user.clone();
            }
        }
        User::guest(self.default_role.clone())
    }
}

fn profile_string(profile: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| profile.get(*key))
        .find_map(|value| match value {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
