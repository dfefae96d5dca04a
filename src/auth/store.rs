//! Session value store
//!
//! Key/value access to the session bucket owned by the gate. The same
//! store backs provider token storage.

use super::provider::AccessToken;
use super::session::SessionData;

/// Default session bucket name
pub const DEFAULT_BUCKET: &str = "oauth";

const TOKEN_KEY_PREFIX: &str = "token.";

/// Token persistence keyed by provider (service) name
pub trait TokenStorage {
    fn store_access_token(&mut self, service: &str, token: &AccessToken);

    fn retrieve_access_token(&self, service: &str) -> Option<AccessToken>;

    fn has_access_token(&self, service: &str) -> bool {
        self.retrieve_access_token(service).is_some()
    }

    fn clear_token(&mut self, service: &str);
}

/// Namespaced view over one request's session
#[derive(Debug, Clone)]
pub struct SessionValueStore {
    data: SessionData,
    bucket: String,
    dirty: bool,
}

impl Default for SessionValueStore {
    fn default() -> Self {
        Self::new(SessionData::default(), DEFAULT_BUCKET)
    }
}

impl SessionValueStore {
    pub fn new(data: SessionData, bucket: impl Into<String>) -> Self {
        Self {
            data,
            bucket: bucket.into(),
            dirty: false,
        }
    }

    pub fn store_value(&mut self, name: &str, value: impl Into<String>) {
        self.data
            .bucket_mut(&self.bucket)
            .insert(name.to_string(), value.into());
        self.dirty = true;
    }

    /// `None` when the bucket or key is absent
    pub fn get_value(&self, name: &str) -> Option<&str> {
        self.data
            .bucket(&self.bucket)
            .and_then(|bucket| bucket.get(name))
            .map(String::as_str)
    }

    /// Remove a value; missing keys are ignored
    pub fn del_value(&mut self, name: &str) {
        let removed = self
            .data
            .bucket(&self.bucket)
            .is_some_and(|bucket| bucket.contains_key(name));
        if removed {
            self.data.bucket_mut(&self.bucket).remove(name);
            self.data.prune(&self.bucket);
            self.dirty = true;
        }
    }

    /// Remove and return a value
    pub fn take_value(&mut self, name: &str) -> Option<String> {
        let value = self.get_value(name).map(ToOwned::to_owned);
        self.del_value(name);
        value
    }

    /// Whether the session changed since it was loaded
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn into_data(self) -> SessionData {
        self.data
    }
}

impl TokenStorage for SessionValueStore {
    fn store_access_token(&mut self, service: &str, token: &AccessToken) {
        self.store_value(&token_key(service), token.secret());
    }

    fn retrieve_access_token(&self, service: &str) -> Option<AccessToken> {
        self.get_value(&token_key(service)).map(AccessToken::new)
    }

    fn clear_token(&mut self, service: &str) {
        self.del_value(&token_key(service));
    }
}

fn token_key(service: &str) -> String {
    format!("{TOKEN_KEY_PREFIX}{}", service.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_value_is_returned() {
        let mut store = SessionValueStore::default();
        store.store_value("k", "v");

        assert_eq!(store.get_value("k"), Some("v"));
        assert!(store.is_dirty());
    }

    #[test]
    fn deleted_value_is_absent() {
        let mut store = SessionValueStore::default();
        store.store_value("k", "v");
        store.del_value("k");

        assert_eq!(store.get_value("k"), None);
    }

    #[test]
    fn empty_string_is_distinct_from_absent() {
        let mut store = SessionValueStore::default();
        store.store_value("k", "");

        assert_eq!(store.get_value("k"), Some(""));
        assert_eq!(store.get_value("missing"), None);
    }

    #[test]
    fn deleting_missing_key_is_a_noop() {
        let mut store = SessionValueStore::default();
        store.del_value("missing");

        assert!(!store.is_dirty());
        assert!(store.data().is_empty());
    }

    #[test]
    fn values_are_scoped_to_the_bucket() {
        let mut data = SessionData::default();
        data.bucket_mut("app")
            .insert("originalDestination".to_string(), "/elsewhere".to_string());

        let mut store = SessionValueStore::new(data, "oauth");
        assert_eq!(store.get_value("originalDestination"), None);

        store.store_value("originalDestination", "/dashboard");
        let data = store.into_data();
        assert_eq!(
            data.bucket("app").and_then(|b| b.get("originalDestination")),
            Some(&"/elsewhere".to_string())
        );
    }

    #[test]
    fn take_value_clears_entry() {
        let mut store = SessionValueStore::default();
        store.store_value("originalDestination", "/dashboard");

        assert_eq!(store.take_value("originalDestination").as_deref(), Some("/dashboard"));
        assert_eq!(store.get_value("originalDestination"), None);
        assert!(store.data().is_empty());
    }

    #[test]
    fn token_storage_is_keyed_by_service() {
        let mut store = SessionValueStore::default();
        store.store_access_token("GitHub", &AccessToken::new("gho_abc"));

        assert!(store.has_access_token("github"));
        assert!(!store.has_access_token("gitlab"));
        assert_eq!(
            store.retrieve_access_token("github").map(|t| t.secret().to_string()),
            Some("gho_abc".to_string())
        );

        store.clear_token("github");
        assert!(!store.has_access_token("github"));
    }
}
