//! OAuth service factory
//!
//! Builds the provider client for the current request and keeps it for the
//! rest of that request. One factory is created per request; it also owns
//! the request's session store, which doubles as token storage.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use url::Url;

use super::credentials::CredentialStore;
use super::provider::{AccessToken, ClientBuilder, OAuthClient};
use super::routes::callback_url;
use super::store::{SessionValueStore, TokenStorage};
use crate::error::AppError;

/// Scopes requested when the caller does not name any
pub const DEFAULT_SCOPES: &[&str] = &["user"];

/// OAuth client configured for one provider and one request
pub struct ServiceHandle {
    provider: String,
    callback_url: Url,
    client: Arc<dyn OAuthClient>,
    token: Mutex<Option<AccessToken>>,
}

impl ServiceHandle {
    pub fn new(provider: impl Into<String>, callback_url: Url, client: Arc<dyn OAuthClient>) -> Self {
        Self {
            provider: provider.into(),
            callback_url,
            client,
            token: Mutex::new(None),
        }
    }

    /// Lowercase provider name; also the token storage key
    pub fn provider_name(&self) -> &str {
        &self.provider
    }

    pub fn callback_url(&self) -> &Url {
        &self.callback_url
    }

    pub fn authorization_uri(&self, state: Option<String>) -> Url {
        self.client.authorization_uri(state)
    }

    /// Exchange `code` and keep the resulting token on the handle
    pub async fn request_access_token(&self, code: &str) -> Result<AccessToken, AppError> {
        let token = self.client.exchange_code(code).await?;
        self.set_access_token(token.clone());
        Ok(token)
    }

    pub fn access_token(&self) -> Option<AccessToken> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_access_token(&self, token: AccessToken) {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    /// GET a provider API path as the authenticated account
    ///
    /// # Errors
    /// Returns `Unauthorized` before a token has been obtained
    pub async fn request(&self, path: &str) -> Result<serde_json::Value, AppError> {
        let token = self.access_token().ok_or(AppError::Unauthorized)?;
        self.client.request(&token, path).await
    }

    /// Fetch the authenticated account's profile
    pub async fn fetch_profile(&self) -> Result<serde_json::Value, AppError> {
        let token = self.access_token().ok_or(AppError::Unauthorized)?;
        self.client.fetch_profile(&token).await
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("provider", &self.provider)
            .field("callback_url", &self.callback_url.as_str())
            .field("authenticated", &self.access_token().is_some())
            .finish()
    }
}

/// Per-request factory for `ServiceHandle`s
pub struct OAuthFactory {
    credentials: Arc<CredentialStore>,
    builder: Arc<dyn ClientBuilder>,
    current_url: Url,
    default_scopes: Vec<String>,
    storage: SessionValueStore,
    registered: Option<Arc<ServiceHandle>>,
}

impl OAuthFactory {
    /// # Arguments
    /// * `current_url` - Absolute URL of the request being handled
    /// * `storage` - The request's session store
    pub fn new(
        credentials: Arc<CredentialStore>,
        builder: Arc<dyn ClientBuilder>,
        current_url: Url,
        storage: SessionValueStore,
    ) -> Self {
        Self {
            credentials,
            builder,
            current_url,
            default_scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            storage,
            registered: None,
        }
    }

    pub fn with_default_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_scopes = scopes;
        self
    }

    /// Build a handle for `provider` and cache it
    ///
    /// Returns `None` when the provider has no credentials or its client
    /// cannot be built; callers treat that like an unknown provider.
    pub fn create_service(
        &mut self,
        provider: &str,
        scopes: &[String],
    ) -> Option<Arc<ServiceHandle>> {
        let provider = provider.to_lowercase();
        let Some(credential) = self.credentials.get(&provider) else {
            tracing::debug!(provider = %provider, "No credentials for provider");
            return None;
        };

        let callback = callback_url(&self.current_url);
        let client = match self.builder.build(credential, &callback, scopes) {
            Ok(client) => client,
            Err(error) => {
                tracing::warn!(provider = %provider, %error, "Failed to build OAuth client");
                return None;
            }
        };

        let handle = Arc::new(ServiceHandle::new(provider, callback, client));
        self.registered = Some(handle.clone());
        Some(handle)
    }

    /// Cached handle for `provider`, or a new one with the default scopes
    pub fn get_or_create_by_type(&mut self, provider: &str) -> Option<Arc<ServiceHandle>> {
        if let Some(handle) = &self.registered {
            if handle.provider_name().eq_ignore_ascii_case(provider) {
                return Some(handle.clone());
            }
        }

        let scopes = self.default_scopes.clone();
        self.create_service(provider, &scopes)
    }

    pub fn get_service(&self) -> Option<Arc<ServiceHandle>> {
        self.registered.clone()
    }

    /// Whether this session holds an access token for `provider`
    pub fn is_authenticated(&mut self, provider: &str) -> bool {
        self.get_or_create_by_type(provider).is_some_and(|handle| {
            self.storage.has_access_token(handle.provider_name())
        })
    }

    pub fn store_value(&mut self, name: &str, value: impl Into<String>) {
        self.storage.store_value(name, value);
    }

    pub fn get_value(&self, name: &str) -> Option<&str> {
        self.storage.get_value(name)
    }

    pub fn del_value(&mut self, name: &str) {
        self.storage.del_value(name);
    }

    pub fn take_value(&mut self, name: &str) -> Option<String> {
        self.storage.take_value(name)
    }

    pub fn storage(&self) -> &SessionValueStore {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut SessionValueStore {
        &mut self.storage
    }

    pub fn into_storage(self) -> SessionValueStore {
        self.storage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::ProviderCredential;
    use crate::auth::provider::{MockClientBuilder, MockOAuthClient};

    fn credentials() -> Arc<CredentialStore> {
        Arc::new(CredentialStore::new([ProviderCredential::new(
            "github", "id", "secret",
        )]))
    }

    fn current_url() -> Url {
        Url::parse("https://app.example.com/auth/github?return=/dashboard").unwrap()
    }

    fn factory(builder: MockClientBuilder) -> OAuthFactory {
        OAuthFactory::new(
            credentials(),
            Arc::new(builder),
            current_url(),
            SessionValueStore::default(),
        )
    }

    #[test]
    fn get_or_create_reuses_cached_handle() {
        let mut builder = MockClientBuilder::new();
        builder
            .expect_build()
            .times(1)
            .returning(|_, _, _| Ok(Arc::new(MockOAuthClient::new())));
        let mut factory = factory(builder);

        let first = factory.get_or_create_by_type("github").expect("handle");
        let second = factory.get_or_create_by_type("GitHub").expect("handle");

        assert!(Arc::ptr_eq(&first, &second));
        assert!(factory.get_service().is_some_and(|h| Arc::ptr_eq(&h, &first)));
    }

    #[test]
    fn unknown_provider_yields_no_handle() {
        let mut builder = MockClientBuilder::new();
        builder.expect_build().never();
        let mut factory = factory(builder);

        assert!(factory.get_or_create_by_type("gitlab").is_none());
        assert!(factory.get_service().is_none());
    }

    #[test]
    fn builder_failure_yields_no_handle() {
        let mut builder = MockClientBuilder::new();
        builder
            .expect_build()
            .returning(|_, _, _| Err(AppError::Config("invalid token endpoint".to_string())));
        let mut factory = factory(builder);

        assert!(factory.create_service("github", &[]).is_none());
    }

    #[test]
    fn create_service_derives_callback_and_passes_scopes() {
        let mut builder = MockClientBuilder::new();
        builder
            .expect_build()
            .withf(|credential, callback, scopes| {
                credential.client_id == "id"
                    && callback.as_str() == "https://app.example.com/auth/github/callback"
                    && scopes.len() == 1
                    && scopes[0] == "user"
            })
            .times(1)
            .returning(|_, _, _| Ok(Arc::new(MockOAuthClient::new())));
        let mut factory = factory(builder);

        let handle = factory.get_or_create_by_type("GITHUB").expect("handle");
        assert_eq!(handle.provider_name(), "github");
    }

    #[test]
    fn is_authenticated_requires_stored_token() {
        let mut builder = MockClientBuilder::new();
        builder
            .expect_build()
            .returning(|_, _, _| Ok(Arc::new(MockOAuthClient::new())));
        let mut factory = factory(builder);

        assert!(!factory.is_authenticated("github"));

        factory
            .storage_mut()
            .store_access_token("github", &AccessToken::new("gho_abc"));
        assert!(factory.is_authenticated("github"));
        assert!(!factory.is_authenticated("gitlab"));
    }

    #[test]
    fn session_values_are_proxied() {
        let factory_builder = MockClientBuilder::new();
        let mut factory = factory(factory_builder);

        factory.store_value("oauth_service_type", "github");
        assert_eq!(factory.get_value("oauth_service_type"), Some("github"));

        factory.del_value("oauth_service_type");
        assert_eq!(factory.get_value("oauth_service_type"), None);
    }

    #[tokio::test]
    async fn handle_keeps_exchanged_token() {
        let mut client = MockOAuthClient::new();
        client
            .expect_exchange_code()
            .withf(|code| code == "abc123")
            .returning(|_| Ok(AccessToken::new("gho_abc")));
        let handle = ServiceHandle::new(
            "github",
            Url::parse("https://app.example.com/auth/github/callback").unwrap(),
            Arc::new(client),
        );

        assert!(handle.access_token().is_none());
        assert!(matches!(handle.fetch_profile().await, Err(AppError::Unauthorized)));

        let token = handle.request_access_token("abc123").await.unwrap();
        assert_eq!(token.secret(), "gho_abc");
        assert_eq!(handle.access_token(), Some(token));
    }
}
