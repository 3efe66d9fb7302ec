//! Cookie parsing and the per-request cookie jar.
//!
//! Cookies are bucketed by the lower-cased domain they apply to. A bucket
//! holds at most one cookie per name. Storing a cookie requires its domain to
//! match the origin the response came from; a public suffix never qualifies.
//! Lookups walk from the requested domain up to the first public-suffix
//! ancestor and collect whatever matches path, scheme and expiry.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// Suffixes under which anybody can register names. IP literals and
/// single-label names are treated the same way.
const PUBLIC_SUFFIXES: &[&str] = &["compute.amazonaws.com"];

/// Roughly four centuries; keeps `Max-Age` arithmetic in range.
const MAX_AGE_CAP: i64 = 400 * 366 * 24 * 3600;

const DATE_FORMATS: &[&str] = &["%d %b %Y %H:%M:%S", "%d-%b-%Y %H:%M:%S", "%d-%b-%y %H:%M:%S"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Declared `Domain`, without a leading dot. Empty when not declared.
    pub domain: String,
    /// Declared `Path`. Empty when not declared.
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// `None` means the cookie never expires.
    pub expires: Option<DateTime<Utc>>,
    pub origin_domain: String,
    pub origin_path: String,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    /// Parse a `Set-Cookie` value. Returns `None` when there is no name.
    pub fn parse(header: &str) -> Option<Self> {
        let mut cookie = Cookie::default();
        let mut max_age = false;

        for (i, part) in header.split(';').enumerate() {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = match part.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (part, ""),
            };

            if i == 0 {
                cookie.name = key.to_string();
                cookie.value = value.to_string();
                continue;
            }

            match key.to_ascii_lowercase().as_str() {
                "expires" if !max_age => cookie.expires = parse_http_date(value),
                "max-age" => {
                    if let Ok(seconds) = value.parse::<i64>() {
                        max_age = true;
                        cookie.expires = Some(Utc::now() + Duration::seconds(seconds.clamp(-1, MAX_AGE_CAP)));
                    }
                }
                "path" => cookie.path = value.to_string(),
                "domain" => cookie.domain = value.trim_start_matches('.').to_ascii_lowercase(),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                _ => {}
            }
        }

        if cookie.name.is_empty() {
            None
        } else {
            Some(cookie)
        }
    }

    pub fn effective_domain(&self) -> &str {
        if self.domain.is_empty() { &self.origin_domain } else { &self.domain }
    }

    pub fn effective_path(&self) -> &str {
        match (self.path.is_empty(), self.origin_path.is_empty()) {
            (false, _) => &self.path,
            (true, false) => &self.origin_path,
            (true, true) => "/",
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|at| at <= now)
    }

    /// `name=value` pair as sent in a `Cookie` request header.
    pub fn pair(&self) -> String {
        if self.value.is_empty() {
            self.name.clone()
        } else {
            format!("{}={}", self.name, self.value)
        }
    }
}

/// Renders back to `Set-Cookie` form.
impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pair())?;
        if let Some(at) = self.expires {
            write!(f, "; Expires={}", at.format("%a, %d %b %Y %H:%M:%S GMT"))?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        if !self.path.is_empty() {
            write!(f, "; Path={}", self.path)?;
        }
        if !self.domain.is_empty() {
            write!(f, "; Domain={}", self.domain)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    buckets: BTreeMap<String, BTreeMap<String, Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `cookie` received from `origin_domain`/`origin_path`.
    ///
    /// Returns false when the cookie's domain does not match the origin.
    pub fn add(&mut self, mut cookie: Cookie, origin_domain: &str, origin_path: &str) -> bool {
        let origin = origin_domain.to_ascii_lowercase();
        cookie.origin_domain = origin.clone();
        cookie.origin_path = origin_path.to_string();

        let bucket = if cookie.domain.is_empty() {
            origin.clone()
        } else {
            cookie.domain.to_ascii_lowercase()
        };

        if !domain_matches(&bucket, &origin) {
            tracing::debug!(cookie = %cookie.name, domain = %bucket, origin = %origin, "Rejected cookie");
            return false;
        }

        self.buckets
            .entry(bucket)
            .or_default()
            .insert(cookie.name.clone(), cookie);
        true
    }

    /// Parse and store a `Set-Cookie` header value.
    pub fn add_set_cookie(&mut self, header: &str, origin_domain: &str, origin_path: &str) -> bool {
        match Cookie::parse(header) {
            Some(cookie) => self.add(cookie, origin_domain, origin_path),
            None => false,
        }
    }

    /// Cookies to send to `domain`/`path`, evicting expired entries on the way.
    pub fn get(&mut self, domain: &str, path: &str, ssl: bool) -> Vec<Cookie> {
        let now = Utc::now();
        for level in lookup_levels(&domain.to_ascii_lowercase()) {
            if let Some(bucket) = self.buckets.get_mut(&level) {
                bucket.retain(|_, cookie| !cookie.is_expired(now));
            }
        }
        self.matching(domain, path, ssl)
    }

    /// Same as [`CookieJar::get`] without evicting anything.
    pub fn matching(&self, domain: &str, path: &str, ssl: bool) -> Vec<Cookie> {
        let now = Utc::now();
        let requested = domain.to_ascii_lowercase();
        let mut found: BTreeMap<(String, String, String), Cookie> = BTreeMap::new();

        for level in lookup_levels(&requested) {
            let Some(bucket) = self.buckets.get(&level) else {
                continue;
            };
            for cookie in bucket.values() {
                if cookie.is_expired(now)
                    || (cookie.secure && !ssl)
                    || !path_matches(cookie.effective_path(), path)
                {
                    continue;
                }
                if level != requested && !same_lineage(&requested, &cookie.origin_domain) {
                    continue;
                }
                let key = (
                    cookie.name.clone(),
                    cookie.effective_domain().to_string(),
                    cookie.effective_path().to_string(),
                );
                found.insert(key, cookie.clone());
            }
        }

        found.into_values().collect()
    }

    /// `Cookie` header value for a request, if anything applies.
    pub fn header_value(&self, domain: &str, path: &str, ssl: bool) -> Option<String> {
        let cookies = self.matching(domain, path, ssl);
        if cookies.is_empty() {
            return None;
        }
        Some(cookies.iter().map(Cookie::pair).collect::<Vec<_>>().join("; "))
    }

    /// Copy every cookie of `other` into this jar, replacing same-named ones.
    pub fn merge(&mut self, other: &CookieJar) {
        for (domain, bucket) in &other.buckets {
            let target = self.buckets.entry(domain.clone()).or_default();
            for (name, cookie) in bucket {
                target.insert(name.clone(), cookie.clone());
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.buckets.values().flat_map(|bucket| bucket.values())
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let value = value.split_once(", ").map_or(value, |(_, rest)| rest);
    let value = value.trim_end_matches(" GMT").trim_end_matches(" UTC");

    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|at| at.and_utc())
}

fn is_public_suffix(domain: &str) -> bool {
    domain.parse::<IpAddr>().is_ok() || !domain.contains('.') || PUBLIC_SUFFIXES.contains(&domain)
}

fn dots(domain: &str) -> usize {
    domain.bytes().filter(|b| *b == b'.').count()
}

fn parent(domain: &str) -> Option<&str> {
    domain.split_once('.').map(|(_, rest)| rest)
}

/// Domains to search for `domain`: itself, then each parent up to and
/// including the first public suffix.
fn lookup_levels(domain: &str) -> Vec<String> {
    let mut levels = Vec::new();
    let mut level = domain;
    loop {
        levels.push(level.to_string());
        if is_public_suffix(level) {
            break;
        }
        match parent(level) {
            Some(next) => level = next,
            None => break,
        }
    }
    levels
}

/// Whether a cookie for `domain` may be stored when set by `origin`.
fn domain_matches(domain: &str, origin: &str) -> bool {
    let distance = dots(domain) as isize - dots(origin) as isize;
    match distance {
        0 => domain == origin,
        d if d < 0 => covers(domain, origin, d.unsigned_abs()),
        d => covers(origin, domain, d.unsigned_abs()),
    }
}

/// `ancestor` covers `descendant` when walking `distance` labels up from
/// the descendant lands on it without crossing a public suffix.
fn covers(ancestor: &str, descendant: &str, distance: usize) -> bool {
    if is_public_suffix(ancestor) {
        return false;
    }

    let mut current = descendant;
    for _ in 0..distance {
        if is_public_suffix(current) {
            return false;
        }
        match parent(current) {
            Some(next) => current = next,
            None => return false,
        }
    }

    current.contains('.') && current == ancestor
}

fn same_lineage(a: &str, b: &str) -> bool {
    a == b || is_subdomain(a, b) || is_subdomain(b, a)
}

fn is_subdomain(child: &str, ancestor: &str) -> bool {
    child
        .strip_suffix(ancestor)
        .is_some_and(|head| head.ends_with('.'))
}

/// RFC 6265 5.1.4 path-match.
fn path_matches(cookie_path: &str, request_path: &str) -> bool {
    if cookie_path == request_path {
        return true;
    }
    match request_path.strip_prefix(cookie_path) {
        Some(rest) => cookie_path.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}
