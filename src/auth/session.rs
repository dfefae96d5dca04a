//! Session cookie
//!
//! The whole session travels in one encrypted cookie, so no server-side
//! session storage is needed. Provider access tokens are kept in the
//! session, hence AES-256-GCM rather than a bare signature.
//!
//! Token format: base64(nonce || aes_gcm(json(session)))

use std::collections::BTreeMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use axum::http::{HeaderMap, HeaderValue};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::SessionConfig;
use crate::error::AppError;

const AES_GCM_NONCE_BYTES: usize = 12;

/// Session contents: named buckets of string values
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    buckets: BTreeMap<String, BTreeMap<String, String>>,
}

impl SessionData {
    pub fn bucket(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.buckets.get(name)
    }

    /// Mutable bucket, created on first use
    pub fn bucket_mut(&mut self, name: &str) -> &mut BTreeMap<String, String> {
        self.buckets.entry(name.to_string()).or_default()
    }

    /// Drop a bucket once its last value is gone
    pub fn prune(&mut self, name: &str) {
        if self.buckets.get(name).is_some_and(BTreeMap::is_empty) {
            self.buckets.remove(name);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[derive(Serialize, Deserialize)]
struct SealedSession {
    #[serde(flatten)]
    data: SessionData,
    expires_at: DateTime<Utc>,
}

/// Encrypts, decrypts and issues the session cookie
#[derive(Clone)]
pub struct SessionCookie {
    name: String,
    key: [u8; 32],
    max_age: Duration,
    secure: bool,
}

impl SessionCookie {
    /// # Arguments
    /// * `config` - Session section of the app config
    /// * `secure` - Whether to mark the cookie `Secure`
    pub fn new(config: &SessionConfig, secure: bool) -> Self {
        let key: [u8; 32] = Sha256::digest(config.secret.as_bytes()).into();
        Self {
            name: config.cookie_name.clone(),
            key,
            max_age: Duration::seconds(config.max_age),
            secure,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Load the session from request headers
    ///
    /// A missing, tampered or expired cookie yields an empty session.
    pub fn load(&self, headers: &HeaderMap) -> SessionData {
        let jar = CookieJar::from_headers(headers);
        let Some(cookie) = jar.get(&self.name) else {
            return SessionData::default();
        };

        match self.open(cookie.value()) {
            Ok(data) => data,
            Err(error) => {
                tracing::debug!(%error, "Discarding unreadable session cookie");
                SessionData::default()
            }
        }
    }

    /// Encrypt a session into a cookie value
    pub fn seal(&self, data: &SessionData) -> Result<String, AppError> {
        let payload = serde_json::to_vec(&SealedSession {
            data: data.clone(),
            expires_at: Utc::now() + self.max_age,
        })
        .map_err(|e| AppError::Internal(e.into()))?;

        let cipher = self.cipher()?;
        let mut nonce = [0_u8; AES_GCM_NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), payload.as_slice())
            .map_err(|_| AppError::Encryption("session encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(AES_GCM_NONCE_BYTES + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(general_purpose::URL_SAFE_NO_PAD.encode(out))
    }

    /// Decrypt a cookie value
    ///
    /// # Errors
    /// Returns `Unauthorized` if the value is malformed, tampered or expired
    pub fn open(&self, value: &str) -> Result<SessionData, AppError> {
        let raw = general_purpose::URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|_| AppError::Unauthorized)?;
        if raw.len() <= AES_GCM_NONCE_BYTES {
            return Err(AppError::Unauthorized);
        }

        let (nonce, ciphertext) = raw.split_at(AES_GCM_NONCE_BYTES);
        let payload = self
            .cipher()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| AppError::Unauthorized)?;

        let sealed: SealedSession =
            serde_json::from_slice(&payload).map_err(|_| AppError::Unauthorized)?;
        if sealed.expires_at < Utc::now() {
            return Err(AppError::Unauthorized);
        }

        Ok(sealed.data)
    }

    /// `Set-Cookie` value carrying the session
    ///
    /// An empty session clears the cookie.
    pub fn set_cookie_header(&self, data: &SessionData) -> Result<HeaderValue, AppError> {
        let cookie = if data.is_empty() {
            let mut cookie = Cookie::build((self.name.clone(), ""))
                .path("/")
                .http_only(true)
                .build();
            cookie.make_removal();
            cookie
        } else {
            Cookie::build((self.name.clone(), self.seal(data)?))
                .path("/")
                .http_only(true)
                .secure(self.secure)
                .same_site(SameSite::Lax)
                .build()
        };

        HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| AppError::Internal(anyhow::anyhow!("invalid session cookie: {e}")))
    }

    fn cipher(&self) -> Result<Aes256Gcm, AppError> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|_| AppError::Encryption("invalid session key length".to_string()))
    }
}
