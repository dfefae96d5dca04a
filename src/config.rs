//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::collections::HashMap;

use crate::auth::{CredentialStore, ProviderCredential, RouteMatcher, validate_return_url};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub gate: GateConfig,
    /// OAuth client credentials keyed by provider name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub session: SessionConfig,
    #[serde(default)]
    pub users: UsersConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
    /// Public domain (e.g., "app.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the instance
    ///
    /// # Returns
    /// Full URL like "https://app.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// How a successful callback is answered
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    /// 200 with `Authorization` and `Location` headers
    #[default]
    Ok,
    /// 302 with `Authorization` and `Location` headers
    Redirect,
}

/// Auth gate behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Provider names accepted in `/auth/{provider}` (default: ["github"])
    pub allowed_providers: Vec<String>,
    /// Paths (or anchored patterns) that bypass the gate
    pub ignored_routes: Vec<String>,
    /// Location sent with every 403 denial
    pub unauthenticated_route: String,
    /// Destination used when login start carries no `return` parameter
    pub return_route: Option<String>,
    /// Reject login starts whose `return` parameter is not a usable URL
    pub validate_return_url: bool,
    /// When non-empty, absolute return URLs must target one of these hosts
    pub allowed_return_hosts: Vec<String>,
    /// Deny (403) requests without credentials instead of passing a guest
    pub deny_unauthenticated: bool,
    /// Bind a single-use `state` value to the session during login
    pub csrf_state: bool,
    pub callback_status: CallbackStatus,
    /// Role given to guest users
    pub default_role: String,
    /// Scopes requested from the provider
    pub scopes: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            allowed_providers: vec!["github".to_string()],
            ignored_routes: vec!["/".to_string(), "/auth".to_string()],
            unauthenticated_route: "/".to_string(),
            return_route: None,
            validate_return_url: true,
            allowed_return_hosts: Vec::new(),
            deny_unauthenticated: false,
            csrf_state: true,
            callback_status: CallbackStatus::Ok,
            default_role: "guest".to_string(),
            scopes: vec!["user".to_string()],
        }
    }
}

/// OAuth client credentials for one provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Overrides the well-known authorization endpoint
    pub authorize_url: Option<String>,
    /// Overrides the well-known token endpoint
    pub token_url: Option<String>,
    /// Overrides the well-known API base used for profile requests
    pub api_base_url: Option<String>,
}

/// Session cookie configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Secret the session encryption key is derived from (32+ bytes)
    pub secret: String,
    /// Cookie name (default: "oauthgate_session")
    pub cookie_name: String,
    /// Session bucket the gate owns (default: "oauth")
    pub bucket: String,
    /// Session max age in seconds (default: 604800 = 7 days)
    pub max_age: i64,
}

/// Built-in user service configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct UsersConfig {
    /// Provider logins allowed to sign in; empty allows everyone
    #[serde(default)]
    pub allowed_logins: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (OAUTHGATE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.domain", "localhost:8080")?
            .set_default("server.protocol", "http")?
            .set_default("session.cookie_name", "oauthgate_session")?
            .set_default("session.bucket", "oauth")?
            .set_default("session.max_age", 604800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (OAUTHGATE__*)
            .add_source(
                Environment::with_prefix("OAUTHGATE")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("gate.allowed_providers")
                    .with_list_parse_key("gate.ignored_routes")
                    .with_list_parse_key("gate.allowed_return_hosts")
                    .with_list_parse_key("gate.scopes")
                    .with_list_parse_key("users.allowed_logins")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Build the credential store from the `providers` table
    pub fn credentials(&self) -> CredentialStore {
        CredentialStore::new(self.providers.iter().map(|(name, provider)| {
            ProviderCredential {
                name: name.clone(),
                client_id: provider.client_id.clone(),
                client_secret: provider.client_secret.clone(),
                authorize_url: provider.authorize_url.clone(),
                token_url: provider.token_url.clone(),
                api_base_url: provider.api_base_url.clone(),
            }
        }))
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        const MIN_SESSION_SECRET_BYTES: usize = 32;

        if self.session.secret.as_bytes().len() < MIN_SESSION_SECRET_BYTES {
            return Err(AppError::Config(format!(
                "session.secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.session.max_age <= 0 {
            return Err(AppError::Config(
                "session.max_age must be greater than 0".to_string(),
            ));
        }

        if self.session.bucket.trim().is_empty() {
            return Err(AppError::Config(
                "session.bucket must not be empty".to_string(),
            ));
        }

        if self.gate.allowed_providers.is_empty() {
            return Err(AppError::Config(
                "gate.allowed_providers must list at least one provider".to_string(),
            ));
        }

        let credentials = self.credentials();
        for provider in &self.gate.allowed_providers {
            if !credentials.contains(provider) {
                tracing::warn!(
                    provider = %provider,
                    "Allowed provider has no credentials; logins will be denied"
                );
            }
        }

        for (name, provider) in &self.providers {
            for (field, value) in [
                ("authorize_url", &provider.authorize_url),
                ("token_url", &provider.token_url),
                ("api_base_url", &provider.api_base_url),
            ] {
                if let Some(value) = value {
                    url::Url::parse(value).map_err(|e| {
                        AppError::Config(format!("providers.{name}.{field} is invalid: {e}"))
                    })?;
                }
            }
        }

        RouteMatcher::new(&self.gate.ignored_routes)?;

        validate_return_url(&self.gate.unauthenticated_route, &[]).map_err(|_| {
            AppError::Config("gate.unauthenticated_route must be a valid URL or path".to_string())
        })?;

        if let Some(return_route) = &self.gate.return_route {
            validate_return_url(return_route, &self.gate.allowed_return_hosts).map_err(|_| {
                AppError::Config("gate.return_route must be a valid URL or path".to_string())
            })?;
        }

        // Fallback for requests whose Host header is unusable
        url::Url::parse(&self.server.base_url()).map_err(|e| {
            AppError::Config(format!("server.protocol/server.domain do not form a URL: {e}"))
        })?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn valid_config() -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            gate: GateConfig::default(),
            providers: HashMap::from([(
                "github".to_string(),
                ProviderConfig {
                    client_id: "github-client-id".to_string(),
                    client_secret: "github-client-secret".to_string(),
                    authorize_url: None,
                    token_url: None,
                    api_base_url: None,
                },
            )]),
            session: SessionConfig {
                secret: "x".repeat(32),
                cookie_name: "oauthgate_session".to_string(),
                bucket: "oauth".to_string(),
                max_age: 604_800,
            },
            users: UsersConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    #[test]
    fn validate_accepts_default_gate() {
        let config = valid_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_short_session_secret() {
        let mut config = valid_config();
        config.session.secret = "short-secret".to_string();

        let error = config
            .validate()
            .expect_err("session secret shorter than 32 bytes must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("session.secret")
        ));
    }

    #[test]
    fn validate_rejects_empty_provider_allow_list() {
        let mut config = valid_config();
        config.gate.allowed_providers.clear();

        let error = config
            .validate()
            .expect_err("an empty allow-list must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("gate.allowed_providers")
        ));
    }

    #[test]
    fn validate_rejects_invalid_ignore_pattern() {
        let mut config = valid_config();
        config.gate.ignored_routes.push("/static/(".to_string());

        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_invalid_endpoint_override() {
        let mut config = valid_config();
        if let Some(github) = config.providers.get_mut("github") {
            github.token_url = Some("not a url".to_string());
        }

        let error = config
            .validate()
            .expect_err("endpoint overrides must be absolute URLs");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("providers.github.token_url")
        ));
    }

    #[test]
    fn validate_checks_return_route() {
        let mut config = valid_config();
        config.gate.return_route = Some("/dashboard".to_string());
        assert!(config.validate().is_ok());

        config.gate.return_route = Some("//evil.example.com".to_string());
        let error = config
            .validate()
            .expect_err("return route must be a safe destination");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message) if message.contains("gate.return_route")
        ));
    }

    #[test]
    fn validate_rejects_unusable_server_domain() {
        let mut config = valid_config();
        config.server.domain = "bad domain".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn credentials_are_built_from_provider_table() {
        let config = valid_config();
        let credentials = config.credentials();

        let github = credentials.get("GitHub").expect("github credential");
        assert_eq!(github.client_id, "github-client-id");
    }
}
