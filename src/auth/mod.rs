//! OAuth login gate
//!
//! Handles:
//! - Provider login redirects and callbacks
//! - Encrypted session cookie and token storage
//! - User resolution and the gate middleware

mod credentials;
mod factory;
mod gate;
mod middleware;
mod provider;
mod routes;
pub mod session;
mod store;
mod token;
mod user;

pub use credentials::{CredentialStore, ProviderCredential};
pub use factory::{DEFAULT_SCOPES, OAuthFactory, ServiceHandle};
pub use gate::{
    AuthGate, CSRF_STATE, GateOutcome, LEGACY_RETURN_URL, ORIGINAL_DESTINATION, SERVICE_TYPE,
    USER_TOKEN,
};
pub use middleware::{CurrentUser, MaybeUser, oauth_gate};
pub use provider::{
    AccessToken, ClientBuilder, OAuthClient, Oauth2Client, Oauth2ClientBuilder, ProviderEndpoints,
};
pub use routes::{
    RouteKind, RouteMatcher, bearer_credential, callback_url, request_url, validate_return_url,
};
pub use session::{SessionCookie, SessionData};
pub use store::{DEFAULT_BUCKET, SessionValueStore, TokenStorage};
pub use user::{InMemoryUserService, User, UserService};
