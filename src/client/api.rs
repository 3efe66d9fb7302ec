//! One-shot requests.
//!
//! Each call runs in a throwaway [`Session`], so nothing is shared between
//! calls except the service.

use std::sync::Arc;

use crate::client::{Service, Session};
use crate::error::Error;
use crate::http::request::{Method, Request, RequestBuilder};
use crate::http::response::Response;

/// Anything a one-shot call accepts as its request.
///
/// Bare URLs start from the service's request defaults, the same as
/// [`Service::request`]. Built requests are taken as they are.
pub trait IntoRequest {
    fn into_request(self, service: &Service) -> Request;
}

impl IntoRequest for &str {
    fn into_request(self, service: &Service) -> Request {
        service.request(self).build()
    }
}

impl IntoRequest for String {
    fn into_request(self, service: &Service) -> Request {
        service.request(self).build()
    }
}

impl IntoRequest for RequestBuilder {
    fn into_request(self, _: &Service) -> Request {
        self.build()
    }
}

impl IntoRequest for Request {
    fn into_request(self, _: &Service) -> Request {
        self
    }
}

pub async fn send(service: &Service, method: Method, request: impl IntoRequest) -> Result<Arc<Response>, Error> {
    let mut session = Session::with_request(service, request.into_request(service));
    session.send(method).await
}

pub async fn get(service: &Service, request: impl IntoRequest) -> Result<Arc<Response>, Error> {
    send(service, Method::GET, request).await
}

pub async fn post(service: &Service, request: impl IntoRequest) -> Result<Arc<Response>, Error> {
    send(service, Method::POST, request).await
}

pub async fn put(service: &Service, request: impl IntoRequest) -> Result<Arc<Response>, Error> {
    send(service, Method::PUT, request).await
}

pub async fn patch(service: &Service, request: impl IntoRequest) -> Result<Arc<Response>, Error> {
    send(service, Method::PATCH, request).await
}

pub async fn delete(service: &Service, request: impl IntoRequest) -> Result<Arc<Response>, Error> {
    send(service, Method::DELETE, request).await
}

pub async fn head(service: &Service, request: impl IntoRequest) -> Result<Arc<Response>, Error> {
    send(service, Method::HEAD, request).await
}

/// Blocking [`send`]. Must not be called from a task of the service runtime.
pub fn send_blocking(service: &Service, method: Method, request: impl IntoRequest) -> Result<Arc<Response>, Error> {
    service.block_on(send(service, method, request))
}

pub fn get_blocking(service: &Service, request: impl IntoRequest) -> Result<Arc<Response>, Error> {
    send_blocking(service, Method::GET, request)
}
