use std::io::{self, Write};

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::http::request::Request;
use crate::net::stream::Transport;

const HTTP_VERSION: &str = "HTTP/1.1";

/// The body as it goes on the wire: gzipped when the request asks for it.
pub fn encode_body(request: &Request) -> Bytes {
    if !request.gzip || request.body.is_empty() {
        return request.body.clone();
    }

    match gzip(&request.body) {
        Ok(compressed) => Bytes::from(compressed),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to gzip request body, sending it as is");
            request.body.clone()
        }
    }
}

fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Request line, headers sorted by name then value, blank line, payload.
///
/// The `Cookie` header is computed from the request's jar.
pub fn serialize_request(request: &Request) -> Vec<u8> {
    let mut buf = Vec::new();

    // Request line
    let request_line = format!("{} {} {}\r\n", request.method, request.uri.target(), HTTP_VERSION);
    buf.extend_from_slice(request_line.as_bytes());

    // Headers
    let mut headers = request.headers.clone();
    let cookies = request
        .cookies
        .header_value(&request.uri.domain, &request.uri.path, request.is_ssl());
    if let Some(cookies) = cookies {
        headers.insert("Cookie", cookies);
    }

    for (k, v) in headers.sorted() {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    // Body
    buf.extend_from_slice(&encode_body(request));

    buf
}

pub struct RequestWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl RequestWriter {
    pub fn new(request: &Request) -> Self {
        Self {
            buffer: serialize_request(request),
            written: 0,
        }
    }

    pub async fn write_to(&mut self, stream: &mut Transport) -> io::Result<usize> {
        while self.written < self.buffer.len() {
            let n = stream.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "connection closed while writing"));
            }

            self.written += n;
        }

        Ok(self.written)
    }
}
