use std::collections::BTreeMap;
use std::fmt;

use url::Url;
use url::form_urlencoded;

/// A request target split into the pieces the client works with.
///
/// `params` and `query` are kept in sync by [`Uri::prepare`]: query pairs are
/// folded into `params` (explicit params win) and the query string is
/// re-rendered from the sorted map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Uri {
    pub protocol: String,
    pub domain: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: String,
    pub fragment: String,
    pub params: BTreeMap<String, String>,
}

impl Uri {
    /// Parse an absolute or scheme-less URL (`"example.com:443/a"` becomes https).
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        let input = input.trim();
        let url = if input.contains("://") {
            Url::parse(input)?
        } else {
            Url::parse(&format!("{}://{}", infer_protocol(input), input))?
        };
        Self::from_url(&url)
    }

    fn from_url(url: &Url) -> Result<Self, url::ParseError> {
        let domain = url.host_str().ok_or(url::ParseError::EmptyHost)?;

        Ok(Self {
            protocol: url.scheme().to_string(),
            domain: domain.to_ascii_lowercase(),
            port: url.port_or_known_default(),
            path: url.path().to_string(),
            query: url.query().unwrap_or_default().to_string(),
            fragment: url.fragment().unwrap_or_default().to_string(),
            params: BTreeMap::new(),
        })
    }

    /// Normalise in place: merge params with the query string and fill in
    /// protocol, port and path defaults.
    pub fn prepare(&mut self) {
        let mut params: BTreeMap<String, String> = form_urlencoded::parse(self.query.as_bytes())
            .into_owned()
            .collect();
        params.extend(std::mem::take(&mut self.params));
        self.params = params;
        self.query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.params)
            .finish();

        if self.protocol.is_empty() {
            self.protocol = match self.port {
                Some(443) => "https".to_string(),
                _ => "http".to_string(),
            };
        }
        if self.port.is_none() {
            self.port = Some(default_port(&self.protocol));
        }
        if self.path.is_empty() {
            self.path = "/".to_string();
        }
    }

    /// Resolve a `Location` value against this URI.
    pub fn resolve(&self, location: &str) -> Result<Uri, url::ParseError> {
        if location.contains("://") {
            return Uri::parse(location);
        }
        let base = Url::parse(&self.to_string())?;
        Uri::from_url(&base.join(location)?)
    }

    pub fn is_ssl(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("https")
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| default_port(&self.protocol))
    }

    /// Domain without IPv6 brackets, suitable for DNS and TLS server names.
    pub fn host(&self) -> &str {
        self.domain.trim_start_matches('[').trim_end_matches(']')
    }

    /// `Host` header value: the domain, plus the port when it is not the default.
    pub fn authority(&self) -> String {
        let port = self.effective_port();
        if port == default_port(&self.protocol) {
            self.domain.clone()
        } else {
            format!("{}:{}", self.domain, port)
        }
    }

    /// Path plus query, as written on the request line.
    pub fn target(&self) -> String {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        if self.query.is_empty() {
            path.to_string()
        } else {
            format!("{}?{}", path, self.query)
        }
    }

    /// Whether a socket opened for `self` can carry a request for `other`.
    pub fn same_endpoint(&self, other: &Uri) -> bool {
        self.domain == other.domain
            && self.effective_port() == other.effective_port()
            && self.protocol.eq_ignore_ascii_case(&other.protocol)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let protocol = if self.protocol.is_empty() { "http" } else { &self.protocol };
        write!(f, "{}://{}{}", protocol, self.authority(), self.target())?;
        if !self.fragment.is_empty() {
            write!(f, "#{}", self.fragment)?;
        }
        Ok(())
    }
}

fn default_port(protocol: &str) -> u16 {
    if protocol.eq_ignore_ascii_case("https") { 443 } else { 80 }
}

fn infer_protocol(input: &str) -> &'static str {
    let authority = input
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let port = authority
        .rsplit_once(':')
        .filter(|(host, _)| !host.ends_with('['))
        .and_then(|(_, port)| port.parse::<u16>().ok());

    match port {
        Some(443) => "https",
        _ => "http",
    }
}
