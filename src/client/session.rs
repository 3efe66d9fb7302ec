use std::sync::Arc;

use crate::client::Service;
use crate::error::Error;
use crate::http::connection::Connection;
use crate::http::request::{Method, Request};
use crate::http::response::Response;

/// A sequence of requests built from one template.
///
/// Consecutive requests to the same endpoint reuse the previous socket,
/// cookies set by responses are fed back into the template, and with
/// `cache_redirects` a host that redirected before is skipped straight to
/// where it led.
pub struct Session {
    service: Service,
    template: Request,
    connection: Option<Connection>,
}

impl Session {
    pub fn new(service: &Service) -> Self {
        Self::with_request(service, service.config().request.to_request())
    }

    pub fn with_request(service: &Service, request: Request) -> Self {
        Self {
            service: service.clone(),
            template: request,
            connection: None,
        }
    }

    /// The template every request is cloned from.
    pub fn request(&self) -> &Request {
        &self.template
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.template
    }

    /// The connection of the most recent request.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn is_expired(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_expired)
    }

    pub async fn get(&mut self) -> Result<Arc<Response>, Error> {
        self.send(Method::GET).await
    }

    pub async fn post(&mut self) -> Result<Arc<Response>, Error> {
        self.send(Method::POST).await
    }

    pub async fn put(&mut self) -> Result<Arc<Response>, Error> {
        self.send(Method::PUT).await
    }

    pub async fn patch(&mut self) -> Result<Arc<Response>, Error> {
        self.send(Method::PATCH).await
    }

    pub async fn delete(&mut self) -> Result<Arc<Response>, Error> {
        self.send(Method::DELETE).await
    }

    pub async fn head(&mut self) -> Result<Arc<Response>, Error> {
        self.send(Method::HEAD).await
    }

    pub async fn send(&mut self, method: Method) -> Result<Arc<Response>, Error> {
        let mut request = self.template.clone();
        request.method = method;
        request.prepare();

        let previous = match &self.connection {
            Some(connection) => connection.response().settled().await,
            None => None,
        };

        let connection = match (&self.connection, previous) {
            (Some(last_connection), Some(last)) => {
                if request.cache_redirects {
                    skip_known_redirect(&mut request, &last);
                }
                if request.uri.same_endpoint(&last.request().uri) {
                    Connection::reusing(&self.service, request, last_connection)
                } else {
                    Connection::new(&self.service, request)
                }
            }
            _ => Connection::new(&self.service, request),
        };

        connection.start();
        let outcome = connection.response();
        self.connection = Some(connection);

        let response = outcome.settled().await;
        if let Some(response) = &response {
            self.template.cookies.merge(response.cookies());
        }
        crate::http::connection::deliver(response)
    }

    pub fn get_blocking(&mut self) -> Result<Arc<Response>, Error> {
        self.send_blocking(Method::GET)
    }

    pub fn send_blocking(&mut self, method: Method) -> Result<Arc<Response>, Error> {
        let service = self.service.clone();
        service.block_on(self.send(method))
    }
}

/// Point `request` at the final target of a redirect its host issued before.
fn skip_known_redirect(request: &mut Request, last: &Response) {
    if last.redirects().find(request).is_none() {
        return;
    }
    let target = last.request();
    tracing::debug!(from = %request.uri, to = %target.uri, "Using cached redirect");

    request.uri = target.uri.clone();
    request.auth = target.auth.clone();
    request.cookies.merge(&target.cookies);
    request.prepare();
}
