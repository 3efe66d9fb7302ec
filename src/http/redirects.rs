use crate::http::request::Request;
use crate::http::response::Response;

/// Responses that redirected somewhere, at most one per domain.
///
/// A domain that was already seen is not recorded again, which keeps the
/// history bounded by the number of distinct hosts in a chain.
#[derive(Debug, Clone, Default)]
pub struct RedirectHistory {
    entries: Vec<Response>,
}

impl RedirectHistory {
    /// Record `response` unless its domain is already present.
    pub fn add(&mut self, response: Response) -> bool {
        if self.contains_domain(&response.request().uri.domain) {
            return false;
        }
        self.entries.push(response);
        true
    }

    pub fn contains_domain(&self, domain: &str) -> bool {
        self.entries.iter().any(|r| r.request().uri.domain == domain)
    }

    /// The recorded response for the domain `request` targets, if any.
    pub fn find(&self, request: &Request) -> Option<&Response> {
        self.entries
            .iter()
            .find(|r| r.request().uri.domain == request.uri.domain)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Response> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
