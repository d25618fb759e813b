//! Session credentials are owned elsewhere; the transport only reads them.

/// Source of the anti-forgery token (and optionally the session cookie) attached
/// to outgoing requests. Values are treated as opaque strings.
pub trait Credentials: Send + Sync {
    fn csrf_token(&self) -> Option<String>;

    /// Raw `Cookie` header to send, if the caller manages cookies itself.
    fn cookie_header(&self) -> Option<String> {
        None
    }
}

/// No credentials at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

impl Credentials for NoCredentials {
    fn csrf_token(&self) -> Option<String> {
        None
    }
}

/// A fixed CSRF token.
#[derive(Debug, Clone)]
pub struct StaticCsrf(pub String);

impl Credentials for StaticCsrf {
    fn csrf_token(&self) -> Option<String> {
        (!self.0.is_empty()).then(|| self.0.clone())
    }
}

/// A `Cookie` header string (`a=1; csrf_token=xyz`) that is forwarded as-is and
/// from which the CSRF token is read.
#[derive(Debug, Clone)]
pub struct CookieJar {
    header: String,
    csrf_cookie: String,
}

impl CookieJar {
    pub const CSRF_COOKIE: &'static str = "csrf_token";

    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            csrf_cookie: Self::CSRF_COOKIE.to_string(),
        }
    }

    pub fn with_csrf_cookie(mut self, name: impl Into<String>) -> Self {
        self.csrf_cookie = name.into();
        self
    }

    /// Value of cookie `name`, if present and non-empty.
    pub fn get(&self, name: &str) -> Option<String> {
        self.header
            .split(';')
            .map(str::trim)
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| k.trim() == name)
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl Credentials for CookieJar {
    fn csrf_token(&self) -> Option<String> {
        self.get(&self.csrf_cookie)
    }

    fn cookie_header(&self) -> Option<String> {
        (!self.header.trim().is_empty()).then(|| self.header.clone())
    }
}
