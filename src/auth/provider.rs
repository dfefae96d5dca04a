//! OAuth2 protocol client
//!
//! `OAuthClient` is the seam to the protocol library: authorization URL
//! construction, code exchange and authenticated API requests. The default
//! implementation wraps the `oauth2` crate with `reqwest` as transport.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use url::Url;

use super::credentials::ProviderCredential;
use crate::error::AppError;

/// Opaque credential returned by a provider
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    scopes: Vec<String>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            scopes: Vec::new(),
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Scopes granted by the provider, if it reported them
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"[redacted]")
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Provider-specific OAuth2 client for one callback URL
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Authorization URL the user agent is redirected to
    ///
    /// `state` is echoed back by the provider on the callback.
    fn authorization_uri(&self, state: Option<String>) -> Url;

    /// Exchange an authorization code for an access token
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, AppError>;

    /// GET a provider API path with the given token, returning JSON
    async fn request(&self, token: &AccessToken, path: &str)
    -> Result<serde_json::Value, AppError>;

    /// Fetch the authenticated account's profile
    async fn fetch_profile(&self, token: &AccessToken) -> Result<serde_json::Value, AppError>;
}

/// Builds `OAuthClient`s from credentials
#[cfg_attr(test, mockall::automock)]
pub trait ClientBuilder: Send + Sync {
    fn build(
        &self,
        credential: &ProviderCredential,
        callback_url: &Url,
        scopes: &[String],
    ) -> Result<Arc<dyn OAuthClient>, AppError>;
}

/// Endpoints of one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    /// Base for API requests; must end with `/`
    pub api_base_url: String,
    /// Profile path relative to `api_base_url`
    pub profile_path: String,
}

impl ProviderEndpoints {
    /// Endpoints for providers that need no configuration beyond credentials
    pub fn well_known(provider: &str) -> Option<Self> {
        let (authorize_url, token_url, api_base_url, profile_path) =
            match provider.to_lowercase().as_str() {
                "github" => (
                    "https://github.com/login/oauth/authorize",
                    "https://github.com/login/oauth/access_token",
                    "https://api.github.com/",
                    "user",
                ),
                "gitlab" => (
                    "https://gitlab.com/oauth/authorize",
                    "https://gitlab.com/oauth/token",
                    "https://gitlab.com/api/v4/",
                    "user",
                ),
                "google" => (
                    "https://accounts.google.com/o/oauth2/v2/auth",
                    "https://oauth2.googleapis.com/token",
                    "https://www.googleapis.com/oauth2/v3/",
                    "userinfo",
                ),
                _ => return None,
            };

        Some(Self {
            authorize_url: authorize_url.to_string(),
            token_url: token_url.to_string(),
            api_base_url: api_base_url.to_string(),
            profile_path: profile_path.to_string(),
        })
    }

    /// Well-known endpoints with the credential's overrides applied
    ///
    /// Providers without well-known endpoints must override all three URLs.
    pub fn resolve(credential: &ProviderCredential) -> Option<Self> {
        let mut endpoints = match Self::well_known(&credential.name) {
            Some(endpoints) => endpoints,
            None => Self {
                authorize_url: credential.authorize_url.clone()?,
                token_url: credential.token_url.clone()?,
                api_base_url: credential.api_base_url.clone()?,
                profile_path: "user".to_string(),
            },
        };

        if let Some(url) = &credential.authorize_url {
            endpoints.authorize_url = url.clone();
        }
        if let Some(url) = &credential.token_url {
            endpoints.token_url = url.clone();
        }
        if let Some(url) = &credential.api_base_url {
            endpoints.api_base_url = url.clone();
        }
        if !endpoints.api_base_url.ends_with('/') {
            endpoints.api_base_url.push('/');
        }

        Some(endpoints)
    }
}

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// `OAuthClient` backed by the `oauth2` crate
pub struct Oauth2Client {
    provider: String,
    client: ConfiguredClient,
    scopes: Vec<String>,
    api_base_url: Url,
    profile_path: String,
    http: reqwest::Client,
}

#[async_trait]
impl OAuthClient for Oauth2Client {
    fn authorization_uri(&self, state: Option<String>) -> Url {
        let (url, _state) = self
            .client
            .authorize_url(|| state.map(CsrfToken::new).unwrap_or_else(CsrfToken::new_random))
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .url();
        url
    }

    async fn exchange_code(&self, code: &str) -> Result<AccessToken, AppError> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| {
                tracing::warn!(provider = %self.provider, error = %e, "Code exchange failed");
                AppError::TokenExchange(e.to_string())
            })?;

        let scopes = response
            .scopes()
            .map(|scopes| scopes.iter().map(|scope| scope.to_string()).collect())
            .unwrap_or_default();

        Ok(AccessToken::new(response.access_token().secret().clone()).with_scopes(scopes))
    }

    async fn request(
        &self,
        token: &AccessToken,
        path: &str,
    ) -> Result<serde_json::Value, AppError> {
        let url = self
            .api_base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| AppError::Validation(format!("invalid provider API path: {e}")))?;

        let value = self
            .http
            .get(url)
            .bearer_auth(token.secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;

        Ok(value)
    }

    async fn fetch_profile(&self, token: &AccessToken) -> Result<serde_json::Value, AppError> {
        self.request(token, &self.profile_path).await
    }
}

/// Default `ClientBuilder` using the `oauth2` crate
#[derive(Clone)]
pub struct Oauth2ClientBuilder {
    http: reqwest::Client,
}

impl Oauth2ClientBuilder {
    /// Create a builder with its own HTTP client
    ///
    /// Redirects are not followed, as the `oauth2` crate recommends for
    /// token endpoints.
    pub fn new() -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .user_agent("OAuthGate/0.1.0")
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { http })
    }
}

impl ClientBuilder for Oauth2ClientBuilder {
    fn build(
        &self,
        credential: &ProviderCredential,
        callback_url: &Url,
        scopes: &[String],
    ) -> Result<Arc<dyn OAuthClient>, AppError> {
        let endpoints = ProviderEndpoints::resolve(credential)
            .ok_or_else(|| AppError::UnknownProvider(credential.name.clone()))?;

        let invalid =
            |field: &str, e: url::ParseError| AppError::Config(format!("invalid {field}: {e}"));

        let client = BasicClient::new(ClientId::new(credential.client_id.clone()))
            .set_client_secret(ClientSecret::new(credential.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(endpoints.authorize_url.clone())
                    .map_err(|e| invalid("authorization endpoint", e))?,
            )
            .set_token_uri(
                TokenUrl::new(endpoints.token_url.clone())
                    .map_err(|e| invalid("token endpoint", e))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(callback_url.to_string())
                    .map_err(|e| invalid("callback url", e))?,
            );

        let api_base_url =
            Url::parse(&endpoints.api_base_url).map_err(|e| invalid("API base url", e))?;

        Ok(Arc::new(Oauth2Client {
            provider: credential.name.to_lowercase(),
            client,
            scopes: scopes.to_vec(),
            api_base_url,
            profile_path: endpoints.profile_path,
            http: self.http.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> Oauth2ClientBuilder {
        Oauth2ClientBuilder::new().expect("http client builds")
    }

    fn callback() -> Url {
        Url::parse("https://app.example.com/auth/github/callback").unwrap()
    }

    #[test]
    fn github_authorization_uri_carries_client_and_redirect() {
        let credential = ProviderCredential::new("github", "client-123", "secret");
        let client = builder()
            .build(&credential, &callback(), &["user".to_string()])
            .expect("github client builds");

        let url = client.authorization_uri(Some("csrf-state".to_string()));
        assert_eq!(url.host_str(), Some("github.com"));
        assert_eq!(url.path(), "/login/oauth/authorize");

        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("client_id".to_string(), "client-123".to_string())));
        assert!(query.contains(&("state".to_string(), "csrf-state".to_string())));
        assert!(query.contains(&("scope".to_string(), "user".to_string())));
        assert!(query.contains(&(
            "redirect_uri".to_string(),
            "https://app.example.com/auth/github/callback".to_string()
        )));
    }

    #[test]
    fn unknown_provider_without_overrides_is_rejected() {
        let credential = ProviderCredential::new("bitbucket", "id", "secret");
        let result = builder().build(&credential, &callback(), &[]);

        assert!(matches!(result, Err(AppError::UnknownProvider(name)) if name == "bitbucket"));
    }

    #[test]
    fn overrides_apply_on_top_of_well_known_endpoints() {
        let mut credential = ProviderCredential::new("GitHub", "id", "secret");
        credential.api_base_url = Some("https://ghe.example.com/api/v3".to_string());

        let endpoints = ProviderEndpoints::resolve(&credential).expect("endpoints resolve");
        assert_eq!(endpoints.authorize_url, "https://github.com/login/oauth/authorize");
        assert_eq!(endpoints.api_base_url, "https://ghe.example.com/api/v3/");
    }

    #[test]
    fn custom_provider_requires_all_endpoints() {
        let mut credential = ProviderCredential::new("forgejo", "id", "secret");
        credential.authorize_url = Some("https://git.example.com/login/oauth/authorize".to_string());
        assert!(ProviderEndpoints::resolve(&credential).is_none());

        credential.token_url = Some("https://git.example.com/login/oauth/access_token".to_string());
        credential.api_base_url = Some("https://git.example.com/api/v1/".to_string());
        assert!(ProviderEndpoints::resolve(&credential).is_some());
    }

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("gho_secret");
        let debug = format!("{token:?}");
        assert!(!debug.contains("gho_secret"));
    }
}
