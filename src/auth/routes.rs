//! Route classification and URL helpers for the gate

use axum::http::{HeaderMap, Uri, header};
use regex::Regex;
use url::Url;

use crate::error::AppError;

const AUTH_ROUTE: &str = r"/auth/(?P<provider>\w+)";
const CALLBACK_ROUTE: &str = r"/auth/(?P<provider>\w+)/callback";
const CALLBACK_SUFFIX: &str = "/callback";

/// What the gate should do with a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteKind {
    /// Listed in the ignore-list; passed through untouched
    Ignored,
    LoginStart { provider: String },
    LoginCallback { provider: String },
    Normal,
}

impl RouteKind {
    /// Label used for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            RouteKind::Ignored => "ignored",
            RouteKind::LoginStart { .. } => "login_start",
            RouteKind::LoginCallback { .. } => "login_callback",
            RouteKind::Normal => "normal",
        }
    }
}

/// Anchored route patterns
#[derive(Debug, Clone)]
pub struct RouteMatcher {
    auth: Regex,
    callback: Regex,
    ignored: Vec<Regex>,
}

impl RouteMatcher {
    /// # Errors
    /// Returns `Config` if an ignore-list entry is not a valid pattern
    pub fn new(ignored_routes: &[String]) -> Result<Self, AppError> {
        let ignored = ignored_routes
            .iter()
            .map(|route| anchored(route))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            auth: anchored(AUTH_ROUTE)?,
            callback: anchored(CALLBACK_ROUTE)?,
            ignored,
        })
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored.iter().any(|route| route.is_match(path))
    }

    pub fn classify(&self, path: &str) -> RouteKind {
        if self.is_ignored(path) {
            return RouteKind::Ignored;
        }

        if let Some(provider) = capture_provider(&self.auth, path) {
            return RouteKind::LoginStart { provider };
        }

        if let Some(provider) = capture_provider(&self.callback, path) {
            return RouteKind::LoginCallback { provider };
        }

        RouteKind::Normal
    }
}

fn anchored(route: &str) -> Result<Regex, AppError> {
    Regex::new(&format!("^{route}$"))
        .map_err(|e| AppError::Config(format!("invalid route pattern {route:?}: {e}")))
}

fn capture_provider(route: &Regex, path: &str) -> Option<String> {
    route
        .captures(path)
        .and_then(|captures| captures.name("provider"))
        .map(|provider| provider.as_str().to_string())
}

/// Check that a post-login destination is safe to redirect to
///
/// Accepts absolute http(s) URLs with a host, or paths with a single
/// leading `/`. When `allowed_hosts` is non-empty, absolute URLs must
/// target one of them.
///
/// # Errors
/// Returns `Validation` for anything else
pub fn validate_return_url(value: &str, allowed_hosts: &[String]) -> Result<(), AppError> {
    let invalid = || AppError::Validation("Invalid return url".to_string());

    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid());
    }

    if value.starts_with('/') {
        // "//host" and "/\host" are treated as network paths by browsers
        if value.starts_with("//") || value.starts_with("/\\") || value.contains('\\') {
            return Err(invalid());
        }
        let base = Url::parse("http://localhost").map_err(|_| invalid())?;
        let joined = base.join(value).map_err(|_| invalid())?;
        if joined.host_str() != Some("localhost") {
            return Err(invalid());
        }
        return Ok(());
    }

    let url = Url::parse(value).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid());
    }
    let host = url.host_str().ok_or_else(invalid)?;

    if !allowed_hosts.is_empty()
        && !allowed_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(host))
    {
        return Err(invalid());
    }

    Ok(())
}

/// Extract the credential from an `Authorization` header value
///
/// The header is read as comma-separated `scheme value` pairs; the first
/// pair with a `bearer` or `token` scheme wins.
pub fn bearer_credential(header: &str) -> Option<&str> {
    header.split(',').find_map(|pair| {
        let (scheme, value) = pair.trim().split_once(char::is_whitespace)?;
        let value = value.trim();
        let accepted =
            scheme.eq_ignore_ascii_case("bearer") || scheme.eq_ignore_ascii_case("token");
        (accepted && !value.is_empty()).then_some(value)
    })
}

/// Absolute URL of the current request
///
/// The host is taken from the URI authority, then the `Host` header, then
/// `default_host`; the first one that forms a valid URL wins, so a garbage
/// `Host` header falls back to the configured domain. The scheme comes from
/// the URI or `default_scheme`.
///
/// # Errors
/// Returns `Validation` only if even `default_host` is unusable
pub fn request_url(
    uri: &Uri,
    headers: &HeaderMap,
    default_scheme: &str,
    default_host: &str,
) -> Result<Url, AppError> {
    let scheme = uri.scheme_str().unwrap_or(default_scheme);
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let hosts = uri
        .authority()
        .map(|authority| authority.as_str())
        .into_iter()
        .chain(
            headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok()),
        )
        .chain(std::iter::once(default_host));

    let mut last_error = None;
    for host in hosts {
        match Url::parse(&format!("{scheme}://{host}{path_and_query}")) {
            Ok(url) if url.host_str().is_some() => return Ok(url),
            Ok(_) => last_error = Some(format!("{host:?} has no host")),
            Err(e) => {
                tracing::debug!(host = %host, error = %e, "Skipping unusable request host");
                last_error = Some(e.to_string());
            }
        }
    }

    Err(AppError::Validation(format!(
        "invalid request url: {}",
        last_error.unwrap_or_default()
    )))
}

/// Callback URL for a login started at `current`
///
/// The query is dropped and `/callback` appended, unless the path already
/// is a callback path.
pub fn callback_url(current: &Url) -> Url {
    let mut url = current.clone();
    url.set_query(None);
    url.set_fragment(None);

    let path = url.path().trim_end_matches('/').to_string();
    if !path.ends_with(CALLBACK_SUFFIX) {
        url.set_path(&format!("{path}{CALLBACK_SUFFIX}"));
    }
    url
}
