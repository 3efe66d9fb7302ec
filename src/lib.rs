//! Courier - asynchronous HTTP(S) client
//!
//! Requests run as connection state machines on a tokio runtime owned or
//! borrowed by a [`Service`]. Every request settles into a [`Response`]
//! carrying exactly one terminal [`Error`] code.

pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod net;

pub use client::{Service, Session, api};
pub use config::Config;
pub use error::{Error, ErrorCode};
pub use http::request::{Method, Request, RequestBuilder};
pub use http::response::Response;
