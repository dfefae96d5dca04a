//! Provider credential store
//!
//! Client id/secret pairs loaded at startup, looked up by lowercase
//! provider name.

use std::collections::HashMap;

/// OAuth client credentials for one provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCredential {
    /// Provider name as configured (e.g. "github")
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    /// Overrides the well-known authorization endpoint
    pub authorize_url: Option<String>,
    /// Overrides the well-known token endpoint
    pub token_url: Option<String>,
    /// Overrides the well-known API base used for profile requests
    pub api_base_url: Option<String>,
}

impl ProviderCredential {
    /// Credential without endpoint overrides
    pub fn new(
        name: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            authorize_url: None,
            token_url: None,
            api_base_url: None,
        }
    }
}

/// Immutable map of provider name to credential
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    entries: HashMap<String, ProviderCredential>,
}

impl CredentialStore {
    pub fn new(credentials: impl IntoIterator<Item = ProviderCredential>) -> Self {
        let entries = credentials
            .into_iter()
            .map(|credential| (credential.name.to_lowercase(), credential))
            .collect();
        Self { entries }
    }

    /// Look up a credential, ignoring the case of `provider`
    pub fn get(&self, provider: &str) -> Option<&ProviderCredential> {
        self.entries.get(&provider.to_lowercase())
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.get(provider).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
