use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;

use crate::http::cookies::{Cookie, CookieJar};
use crate::http::headers::Headers;
use crate::http::parser::ParseError;
use crate::http::response::Response;
use crate::http::uri::Uri;
use crate::http::writer;
use crate::net::tls::{ClientCert, TlsOptions};

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// HTTP request methods.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Method {
    /// GET - Retrieve a resource
    #[default]
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }

    /// Methods that always announce a `Content-Length`, even for an empty body.
    fn sends_body(&self) -> bool {
        matches!(self, Method::POST | Method::PUT | Method::PATCH)
    }
}

impl FromStr for Method {
    type Err = ParseError;

    /// Parses an HTTP method (case-sensitive, uppercase).
    ///
    /// ```
    /// # use std::str::FromStr;
    /// # use courier::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Ok(Method::GET));
    /// assert!(Method::from_str("get").is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            "HEAD" => Ok(Method::HEAD),
            "OPTIONS" => Ok(Method::OPTIONS),
            "PATCH" => Ok(Method::PATCH),
            _ => Err(ParseError::InvalidMethod),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login(pub String);

#[derive(Clone, PartialEq, Eq)]
pub struct Password(pub String);

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Basic authentication credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    pub login: Login,
    pub password: Password,
}

impl Auth {
    pub fn new(login: Login, password: Password) -> Self {
        Self { login, password }
    }

    /// `Authorization` header value.
    pub fn header_value(&self) -> String {
        let credentials = format!("{}:{}", self.login.0, self.password.0);
        format!("Basic {}", STANDARD.encode(credentials))
    }
}

/// Hook invoked with every finished response, errors included.
#[derive(Clone)]
pub struct FinalCallback(Arc<dyn Fn(&Response) + Send + Sync>);

impl FinalCallback {
    pub fn new(callback: impl Fn(&Response) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub(crate) fn call(&self, response: &Response) {
        (self.0)(response)
    }
}

impl fmt::Debug for FinalCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FinalCallback")
    }
}

/// Everything needed to perform one logical request.
///
/// `url` is parsed into `uri` by [`Request::prepare`]; until then `uri` may
/// hold nothing but explicit params.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Option<String>,
    pub uri: Uri,
    pub headers: Headers,
    pub body: Bytes,
    pub auth: Option<Auth>,
    pub tls: TlsOptions,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    /// Gzip the request body.
    pub gzip: bool,
    pub keep_alive: bool,
    pub throw_on_error: bool,
    pub cache_redirects: bool,
    /// Budget for the whole exchange, redirects included.
    pub timeout: Duration,
    /// How long a finished connection stays queryable before it expires.
    pub store_timeout: Duration,
    pub final_callback: Option<FinalCallback>,
    pub cookies: CookieJar,
}

impl Default for Request {
    fn default() -> Self {
        let headers = [
            ("Accept", "*/*"),
            ("Accept-Encoding", "gzip, deflate"),
            ("Connection", "close"),
            ("User-Agent", DEFAULT_USER_AGENT),
        ]
        .into_iter()
        .collect();

        Self {
            method: Method::GET,
            url: None,
            uri: Uri::default(),
            headers,
            body: Bytes::new(),
            auth: None,
            tls: TlsOptions::default(),
            follow_redirects: true,
            max_redirects: 10,
            gzip: true,
            keep_alive: true,
            throw_on_error: false,
            cache_redirects: true,
            timeout: Duration::from_secs(60),
            store_timeout: Duration::from_secs(60),
            final_callback: None,
            cookies: CookieJar::new(),
        }
    }
}

impl Request {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn builder() -> RequestBuilder {
        RequestBuilder::new()
    }

    /// Normalise the target and derive the headers that depend on it.
    ///
    /// An unparseable `url` is kept and the domain cleared, so the
    /// connection fails at resolution.
    pub fn prepare(&mut self) {
        if let Some(url) = &self.url {
            match Uri::parse(url) {
                Ok(mut parsed) => {
                    parsed.params = std::mem::take(&mut self.uri.params);
                    self.uri = parsed;
                    self.url = None;
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Invalid url");
                    self.uri.domain.clear();
                }
            }
        }
        self.uri.prepare();

        let payload = writer::encode_body(self);
        if self.gzip && !self.body.is_empty() {
            self.headers.insert("Content-Encoding", "gzip");
        }
        if let Some(auth) = &self.auth {
            self.headers.insert("Authorization", auth.header_value());
        }
        if self.keep_alive {
            self.headers.insert("Connection", "keep-alive");
        }
        if !payload.is_empty() || self.method.sends_body() {
            self.headers.insert("Content-Length", payload.len().to_string());
        }
        if !self.uri.domain.is_empty() {
            self.headers.insert("Host", self.uri.authority());
        }
    }

    pub fn is_ssl(&self) -> bool {
        self.uri.is_ssl()
    }

    /// Serialized request line, headers and payload.
    pub fn to_wire(&self) -> Vec<u8> {
        writer::serialize_request(self)
    }
}

/// Builder for constructing Request objects.
#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    request: Request,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.request.method = method;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.request.url = Some(url.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.uri.params.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.headers.insert(key, value);
        self
    }

    /// Replace every header, defaults included.
    pub fn headers(mut self, headers: Headers) -> Self {
        self.request.headers = headers;
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.request.body = body.into();
        self
    }

    pub fn auth(mut self, login: Login, password: Password) -> Self {
        self.request.auth = Some(Auth::new(login, password));
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.request.follow_redirects = follow;
        self
    }

    pub fn max_redirects(mut self, max: usize) -> Self {
        self.request.max_redirects = max;
        self
    }

    pub fn gzip(mut self, gzip: bool) -> Self {
        self.request.gzip = gzip;
        self
    }

    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.request.keep_alive = keep_alive;
        self
    }

    pub fn throw_on_error(mut self, throw: bool) -> Self {
        self.request.throw_on_error = throw;
        self
    }

    pub fn cache_redirects(mut self, cache: bool) -> Self {
        self.request.cache_redirects = cache;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.request.timeout = timeout;
        self
    }

    pub fn store_timeout(mut self, store_timeout: Duration) -> Self {
        self.request.store_timeout = store_timeout;
        self
    }

    pub fn verify_peer(mut self, verify: bool) -> Self {
        self.request.tls.verify_peer = verify;
        self
    }

    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.request.tls.ca_file = Some(path.into());
        self
    }

    pub fn ca_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.request.tls.ca_path = Some(path.into());
        self
    }

    pub fn client_cert(mut self, certificate_file: impl Into<PathBuf>, private_key_file: impl Into<PathBuf>) -> Self {
        self.request.tls.client_cert = Some(ClientCert {
            certificate_file: certificate_file.into(),
            private_key_file: private_key_file.into(),
        });
        self
    }

    pub fn final_callback(mut self, callback: impl Fn(&Response) + Send + Sync + 'static) -> Self {
        self.request.final_callback = Some(FinalCallback::new(callback));
        self
    }

    /// Add a cookie as if `domain` had set it at `/`.
    pub fn cookie(mut self, cookie: Cookie, domain: &str) -> Self {
        self.request.cookies.add(cookie, domain, "/");
        self
    }

    pub fn cookies(mut self, cookies: CookieJar) -> Self {
        self.request.cookies = cookies;
        self
    }

    pub fn build(self) -> Request {
        self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_sets_derived_headers() {
        let mut request = Request::builder()
            .method(Method::POST)
            .url("example.com:8080/submit")
            .auth(Login("user".into()), Password("pass".into()))
            .gzip(false)
            .body("payload")
            .build();
        request.prepare();

        assert_eq!(request.headers.get("Host"), Some("example.com:8080"));
        assert_eq!(request.headers.get("Connection"), Some("keep-alive"));
        assert_eq!(request.headers.get("Content-Length"), Some("7"));
        assert_eq!(request.headers.get("Authorization"), Some("Basic dXNlcjpwYXNz"));
        assert_eq!(request.headers.get("Content-Encoding"), None);
    }

    #[test]
    fn invalid_url_clears_domain() {
        let mut request = Request::new("http://");
        request.prepare();
        assert!(request.uri.domain.is_empty());
        assert!(request.url.is_some());
    }

    #[test]
    fn password_is_redacted_in_debug() {
        let auth = Auth::new(Login("user".into()), Password("secret".into()));
        assert!(!format!("{auth:?}").contains("secret"));
    }
}
