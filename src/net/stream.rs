use std::io;
use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::client::TlsStream;

use crate::net::tls::{self, TlsOptions};

/// Read granularity for socket reads
const READ_CHUNK: usize = 8192;

enum Io {
    Plain(TcpStream),
    Secure(Box<TlsStream<TcpStream>>),
}

/// A client socket that is plain TCP or TLS over TCP.
///
/// Created unconnected; [`Transport::connect`] opens the TCP socket and
/// [`Transport::handshake`] upgrades it when the target is https (a no-op
/// otherwise). Reads report a peer close as `UnexpectedEof`.
pub struct Transport {
    io: Option<Io>,
    secure: bool,
    tls: TlsOptions,
    eof: bool,
    cancelled: bool,
}

impl Transport {
    pub fn new(secure: bool, tls: TlsOptions) -> Self {
        Self {
            io: None,
            secure,
            tls,
            eof: false,
            cancelled: false,
        }
    }

    /// Connected, not cancelled and not known to be closed by the peer.
    pub fn is_open(&self) -> bool {
        self.io.is_some() && !self.eof && !self.cancelled
    }

    /// Try each address in turn; the last failure is returned if none connects.
    pub async fn connect(&mut self, addrs: &[SocketAddr], keep_alive: bool) -> io::Result<()> {
        self.check_cancelled()?;

        let mut last_error = None;
        for addr in addrs {
            match open(*addr, keep_alive).await {
                Ok(stream) => {
                    self.io = Some(Io::Plain(stream));
                    self.eof = false;
                    return Ok(());
                }
                Err(e) => {
                    tracing::trace!(%addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses to connect to")))
    }

    pub async fn handshake(&mut self, domain: &str) -> io::Result<()> {
        self.check_cancelled()?;
        if !self.secure {
            return Ok(());
        }

        let tcp = match self.io.take() {
            Some(Io::Plain(tcp)) => tcp,
            Some(secure @ Io::Secure(_)) => {
                self.io = Some(secure);
                return Ok(());
            }
            None => return Err(not_connected()),
        };

        let connector = tls::connector(&self.tls)?;
        let stream = connector.connect(tls::server_name(domain)?, tcp).await?;
        self.io = Some(Io::Secure(Box::new(stream)));
        Ok(())
    }

    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_cancelled()?;
        match self.io.as_mut() {
            Some(Io::Plain(s)) => s.write(buf).await,
            Some(Io::Secure(s)) => {
                let n = s.write(buf).await?;
                s.flush().await?;
                Ok(n)
            }
            None => Err(not_connected()),
        }
    }

    /// Read until `buf` contains `delim`; returns the offset just past it.
    pub async fn read_until(&mut self, buf: &mut BytesMut, delim: &[u8]) -> io::Result<usize> {
        loop {
            if let Some(pos) = find(buf, delim) {
                return Ok(pos + delim.len());
            }
            self.read_some(buf).await?;
        }
    }

    /// Read at least `min` more bytes into `buf`.
    pub async fn read_at_least(&mut self, buf: &mut BytesMut, min: usize) -> io::Result<usize> {
        let mut total = 0;
        while total < min {
            total += self.read_some(buf).await?;
        }
        Ok(total)
    }

    async fn read_some(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        self.check_cancelled()?;
        buf.reserve(READ_CHUNK);
        let n = match self.io.as_mut() {
            Some(Io::Plain(s)) => s.read_buf(buf).await?,
            Some(Io::Secure(s)) => s.read_buf(buf).await?,
            None => return Err(not_connected()),
        };

        if n == 0 {
            self.eof = true;
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"));
        }
        Ok(n)
    }

    /// Abort: later operations fail with `Interrupted`.
    pub fn cancel(&mut self) {
        self.cancelled = true;
        self.io = None;
    }

    pub fn close(&mut self) {
        self.io = None;
    }

    pub fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        match self.io.as_ref() {
            Some(Io::Plain(s)) => s.set_nodelay(nodelay),
            Some(Io::Secure(s)) => s.get_ref().0.set_nodelay(nodelay),
            None => Err(not_connected()),
        }
    }

    fn check_cancelled(&self) -> io::Result<()> {
        if self.cancelled {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "operation aborted"));
        }
        Ok(())
    }
}

async fn open(addr: SocketAddr, keep_alive: bool) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_keepalive(keep_alive)?;
    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "socket is not connected")
}

/// The peer went away: EOF, reset, aborted or broken pipe.
pub fn is_socket_closed(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

pub fn is_eof(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::UnexpectedEof
}

/// Raised by our own [`Transport::cancel`], never by the peer.
pub fn is_aborted(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::Interrupted
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reads_until_delimiter_and_reports_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"line one\r\nrest").await.unwrap();
        });

        let mut transport = Transport::new(false, TlsOptions::default());
        transport.connect(&[addr], true).await.unwrap();
        transport.handshake("127.0.0.1").await.unwrap();
        assert!(transport.is_open());

        let mut buf = BytesMut::new();
        let end = transport.read_until(&mut buf, b"\r\n").await.unwrap();
        assert_eq!(&buf[..end], b"line one\r\n");

        let err = transport.read_at_least(&mut buf, 100).await.unwrap_err();
        assert!(is_eof(&err));
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn cancelled_transport_reports_aborted() {
        let mut transport = Transport::new(false, TlsOptions::default());
        transport.cancel();
        let err = transport.write(b"x").await.unwrap_err();
        assert!(is_aborted(&err));
        assert!(!is_socket_closed(&err));
    }
}
