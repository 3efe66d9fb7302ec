//! Client sockets: plain TCP or TLS behind one interface.

pub mod stream;
pub mod tls;
