use std::io::Read;
use std::sync::OnceLock;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};

use crate::error::Error;
use crate::http::cookies::CookieJar;
use crate::http::headers::Headers;
use crate::http::parser::StatusLine;
use crate::http::redirects::RedirectHistory;
use crate::http::request::Request;

/// Outcome of one logical request.
///
/// Built up by its connection while the exchange runs and shared read-only
/// once it completes. Every response carries exactly one terminal
/// [`Error`]; `error().is_error()` is false only on success.
#[derive(Debug, Clone)]
pub struct Response {
    request: Request,
    status: StatusLine,
    headers: Headers,
    raw: Bytes,
    content: OnceLock<Bytes>,
    error: Error,
    redirect_count: usize,
    redirects: RedirectHistory,
    cookies: CookieJar,
}

impl Response {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            status: StatusLine::default(),
            headers: Headers::new(),
            raw: Bytes::new(),
            content: OnceLock::new(),
            error: Error::default(),
            redirect_count: 0,
            redirects: RedirectHistory::default(),
            cookies: CookieJar::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn status(&self) -> &StatusLine {
        &self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.code
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Body bytes exactly as received.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Body decoded according to `Content-Encoding`, falling back to the
    /// raw bytes when decoding fails.
    pub fn content(&self) -> &Bytes {
        self.content
            .get_or_init(|| decode(self.headers.get("Content-Encoding"), &self.raw))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.content()).into_owned()
    }

    pub fn error(&self) -> &Error {
        &self.error
    }

    pub fn redirect_count(&self) -> usize {
        self.redirect_count
    }

    pub fn redirects(&self) -> &RedirectHistory {
        &self.redirects
    }

    /// Cookies set by this response.
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// 301, 302 and 303 are followed; other 3xx codes are returned as is.
    pub fn is_redirect(&self) -> bool {
        matches!(self.status.code, 301..=303)
    }

    pub(crate) fn set_status(&mut self, status: StatusLine) {
        self.status = status;
    }

    /// Record a received header; `Set-Cookie` also lands in the jar.
    pub(crate) fn push_header(&mut self, name: String, value: String) {
        if name.eq_ignore_ascii_case("set-cookie") {
            let uri = &self.request.uri;
            self.cookies.add_set_cookie(&value, &uri.domain, &uri.path);
        }
        self.headers.append(name, value);
    }

    pub(crate) fn set_raw(&mut self, raw: Bytes) {
        self.raw = raw;
        self.content = OnceLock::new();
    }

    pub(crate) fn set_error(&mut self, error: Error) {
        self.error = error;
    }

    pub(crate) fn set_redirects(&mut self, count: usize, history: RedirectHistory) {
        self.redirect_count = count;
        self.redirects = history;
    }

    pub(crate) fn take_redirects(&mut self) -> RedirectHistory {
        std::mem::take(&mut self.redirects)
    }

    /// Forget anything read off a socket that is about to be replaced.
    pub(crate) fn clear_wire(&mut self) {
        self.status = StatusLine::default();
        self.headers = Headers::new();
        self.cookies = CookieJar::new();
        self.set_raw(Bytes::new());
    }
}

fn decode(encoding: Option<&str>, raw: &Bytes) -> Bytes {
    let encoding = encoding.map(|e| e.trim().to_ascii_lowercase()).unwrap_or_default();
    let decoded = match encoding.as_str() {
        "gzip" | "x-gzip" => read_all(GzDecoder::new(&raw[..])),
        "deflate" => read_all(ZlibDecoder::new(&raw[..])).or_else(|_| read_all(DeflateDecoder::new(&raw[..]))),
        _ => return raw.clone(),
    };

    match decoded {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            tracing::debug!(encoding = %encoding, error = %e, "Failed to decode content, using raw body");
            raw.clone()
        }
    }
}

fn read_all(mut reader: impl Read) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    Ok(out)
}
