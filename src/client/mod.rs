//! Client surface: the service that runs connections, sessions that chain
//! requests over one socket, and one-shot helpers.

pub mod api;
pub mod service;
pub mod session;

pub use service::Service;
pub use session::Session;
